// Build script compiling the demo's GLSL shaders to SPIR-V with glslc

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 2] = ["vert", "frag"];

/// Compile every stale shader in `shader_dir` into `target_dir`
fn compile_shaders(shader_dir: &Path, target_dir: &Path, glslc: &Path) -> usize {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {}", shader_dir.display());
            return 0;
        }
    };

    let mut compiled = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_shader = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_EXTENSIONS.contains(&ext));
        let Some(stem) = path.file_stem() else { continue };
        if !is_shader {
            continue;
        }

        let out_file = target_dir.join(stem).with_extension("spv");
        let needs_compile = match (std::fs::metadata(&path), std::fs::metadata(&out_file)) {
            (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
                (Ok(src), Ok(dst)) => src > dst,
                _ => true,
            },
            _ => true,
        };
        if !needs_compile {
            eprintln!("info: Shader {} is up to date", path.display());
            continue;
        }

        let status = Command::new(glslc).arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {} -> {}", path.display(), out_file.display());
                compiled += 1;
            }
            Ok(s) => panic!("glslc failed for {} with exit code {}", path.display(), s.code().unwrap_or(-1)),
            Err(e) => panic!("Failed to run glslc for {}: {e}", path.display()),
        }
    }
    compiled
}

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        PathBuf::from(&vulkan_sdk).join("Bin").join("glslc.exe")
    } else {
        PathBuf::from(&vulkan_sdk).join("bin").join("glslc")
    };
    if !glslc.exists() {
        panic!("Shader compiler not found at {}", glslc.display());
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let shader_dir = manifest_dir.join("resources").join("shaders");
    // Shared with the renderer's default shader_dir, relative to the workspace root
    let target_dir = manifest_dir.join("..").join("target").join("shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create {}: {e}", target_dir.display());
        return;
    }

    let compiled = compile_shaders(&shader_dir, &target_dir, &glslc);
    if compiled > 0 {
        eprintln!("info: Successfully compiled {compiled} shader(s)");
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
