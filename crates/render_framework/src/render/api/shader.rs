//! Shader binary sources
//!
//! Pipelines consume shaders as opaque precompiled binaries. A
//! [`ShaderSource`] names them, either as one of the built-in default shaders
//! or as a pair of files, and a [`ShaderProvider`] turns that name into bytes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::render::{RenderError, RenderResult};

/// Built-in vertex shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultVertexShader {
    /// Passes world-space normals through for lighting
    Lit,
    /// Position only
    Unlit,
}

/// Built-in fragment shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultFragmentShader {
    /// Directional light plus ambient term
    Lit,
    /// Flat material colour
    Unlit,
}

/// Which shader binaries a pipeline uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderSource {
    /// Built-in shaders
    Default {
        /// Vertex stage
        vertex: DefaultVertexShader,
        /// Fragment stage
        fragment: DefaultFragmentShader,
    },
    /// Precompiled binaries on disk
    Files {
        /// Vertex stage binary
        vertex: PathBuf,
        /// Fragment stage binary
        fragment: PathBuf,
    },
}

impl ShaderSource {
    /// Lit default shaders
    pub const LIT: Self = Self::Default {
        vertex: DefaultVertexShader::Lit,
        fragment: DefaultFragmentShader::Lit,
    };

    /// Unlit default shaders
    pub const UNLIT: Self = Self::Default {
        vertex: DefaultVertexShader::Unlit,
        fragment: DefaultFragmentShader::Unlit,
    };

    /// Shader files on disk
    pub fn files(vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        Self::Files { vertex: vertex.into(), fragment: fragment.into() }
    }

    /// The vertex stage of this source
    pub fn vertex(&self) -> ShaderRef<'_> {
        match self {
            Self::Default { vertex, .. } => ShaderRef::DefaultVertex(*vertex),
            Self::Files { vertex, .. } => ShaderRef::File(vertex),
        }
    }

    /// The fragment stage of this source
    pub fn fragment(&self) -> ShaderRef<'_> {
        match self {
            Self::Default { fragment, .. } => ShaderRef::DefaultFragment(*fragment),
            Self::Files { fragment, .. } => ShaderRef::File(fragment),
        }
    }
}

impl Default for ShaderSource {
    fn default() -> Self {
        Self::LIT
    }
}

/// A single shader stage to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderRef<'a> {
    /// Built-in vertex shader
    DefaultVertex(DefaultVertexShader),
    /// Built-in fragment shader
    DefaultFragment(DefaultFragmentShader),
    /// Binary file on disk
    File(&'a Path),
}

/// Supplies shader bytecode
pub trait ShaderProvider {
    /// Load one shader stage
    fn load(&self, shader: ShaderRef<'_>) -> RenderResult<Vec<u8>>;
}

/// Loads shaders from disk, resolving the defaults inside one directory
#[derive(Debug, Clone)]
pub struct FileShaderProvider {
    shader_dir: PathBuf,
}

impl FileShaderProvider {
    /// Create a provider rooted at `shader_dir`
    pub fn new(shader_dir: impl Into<PathBuf>) -> Self {
        Self { shader_dir: shader_dir.into() }
    }

    /// Path a shader stage resolves to
    pub fn resolve(&self, shader: ShaderRef<'_>) -> PathBuf {
        let file_name = match shader {
            ShaderRef::DefaultVertex(DefaultVertexShader::Lit) => "lit_vert.spv",
            ShaderRef::DefaultVertex(DefaultVertexShader::Unlit) => "unlit_vert.spv",
            ShaderRef::DefaultFragment(DefaultFragmentShader::Lit) => "lit_frag.spv",
            ShaderRef::DefaultFragment(DefaultFragmentShader::Unlit) => "unlit_frag.spv",
            ShaderRef::File(path) => return path.to_path_buf(),
        };
        self.shader_dir.join(file_name)
    }
}

impl ShaderProvider for FileShaderProvider {
    fn load(&self, shader: ShaderRef<'_>) -> RenderResult<Vec<u8>> {
        let path = self.resolve(shader);
        log::debug!("Loading shader from {}", path.display());
        std::fs::read(&path).map_err(|source| RenderError::ShaderLoad {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shaders_resolve_inside_dir() {
        let provider = FileShaderProvider::new("shaders");
        assert_eq!(
            provider.resolve(ShaderSource::LIT.vertex()),
            Path::new("shaders").join("lit_vert.spv")
        );
        assert_eq!(
            provider.resolve(ShaderSource::UNLIT.fragment()),
            Path::new("shaders").join("unlit_frag.spv")
        );
    }

    #[test]
    fn test_file_shaders_resolve_verbatim() {
        let provider = FileShaderProvider::new("shaders");
        let source = ShaderSource::files("custom/a.spv", "custom/b.spv");
        assert_eq!(provider.resolve(source.vertex()), PathBuf::from("custom/a.spv"));
        assert_eq!(provider.resolve(source.fragment()), PathBuf::from("custom/b.spv"));
    }

    #[test]
    fn test_missing_file_reports_shader_load() {
        let provider = FileShaderProvider::new("no/such/dir");
        let err = provider.load(ShaderSource::LIT.vertex()).unwrap_err();
        assert!(matches!(err, RenderError::ShaderLoad { .. }));
    }
}
