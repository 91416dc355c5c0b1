//! Meshes and the mesh table
//!
//! A [`Mesh`] keeps its vertex streams on the CPU until it is loaded. Loading
//! interleaves the streams into one vertex buffer using the same
//! [`InterleavedLayout`] pipelines derive their vertex input from, and uploads
//! the vertex and index buffers either once into device-local memory through
//! a staging buffer (static) or into persistently mapped host memory that the
//! `*_dynamic` setters keep editing (dynamic).
//!
//! Meshes are owned by a [`MeshTable`] and shared by handle. Retaining a
//! handle shares the mesh, duplicating it makes an unloaded deep copy of its
//! CPU data, and releasing the last reference unloads and frees it.

use std::collections::HashMap;

use bytemuck::Pod;

use crate::foundation::collections::{MeshHandle, SlotMap};
use crate::foundation::math::{Vec3, Vec4};
use crate::render::api::{BufferHandle, BufferUsage, CommandBufferHandle, MemoryLocation, RenderDevice};
use crate::render::pipeline::layout::{vertex_data_size, InterleavedLayout};
use crate::render::pipeline::pipeline_config::VertDataLayout;
use crate::render::pipeline::uniform_schema::write_f32s;
use crate::render::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy)]
struct GpuMesh {
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
    dynamic: bool,
}

/// Indexed triangle or line geometry
#[derive(Debug)]
pub struct Mesh {
    layout: VertDataLayout,
    interleaved: InterleavedLayout,
    vertex_count: u32,
    index_count: u32,
    vertices: Vec<Vec4>,
    normals: Vec<Vec3>,
    indices: Vec<u32>,
    custom_data: HashMap<u32, Vec<u8>>,
    gpu: Option<GpuMesh>,
}

impl Mesh {
    /// An empty mesh of `vertex_count` vertices and `index_count` indices
    pub fn new(layout: VertDataLayout, vertex_count: u32, index_count: u32) -> Self {
        Self {
            interleaved: InterleavedLayout::new(&layout),
            layout,
            vertex_count,
            index_count,
            vertices: Vec::new(),
            normals: Vec::new(),
            indices: Vec::new(),
            custom_data: HashMap::new(),
            gpu: None,
        }
    }

    /// Change the vertex layout. Only allowed while unloaded.
    pub fn set_layout(&mut self, layout: VertDataLayout) -> RenderResult<()> {
        if self.is_loaded() {
            return Err(RenderError::invalid("cannot change the layout of a loaded mesh"));
        }
        self.interleaved = InterleavedLayout::new(&layout);
        self.layout = layout;
        Ok(())
    }

    /// Replace the positions
    pub fn set_vertices(&mut self, vertices: Vec<Vec4>) {
        self.vertices = vertices;
    }

    /// Replace the normals. Each one is normalized.
    pub fn set_vertex_normals(&mut self, normals: Vec<Vec3>) {
        self.normals = normals.into_iter().map(unit_or_zero).collect();
    }

    /// Replace the indices
    pub fn set_indices(&mut self, indices: Vec<u32>) {
        self.indices = indices;
    }

    /// Replace the data of the custom attribute at `slot`
    pub fn set_custom_vertex_data<T: Pod>(&mut self, slot: u32, data: &[T]) {
        self.custom_data.insert(slot, bytemuck::cast_slice(data).to_vec());
    }

    /// Vertex layout
    pub fn layout(&self) -> &VertDataLayout {
        &self.layout
    }

    /// Declared vertex count
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Declared index count
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Positions
    pub fn vertices(&self) -> &[Vec4] {
        &self.vertices
    }

    /// Normals
    pub fn vertex_normals(&self) -> &[Vec3] {
        &self.normals
    }

    /// Indices
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Raw bytes of the custom attribute at `slot`
    pub fn custom_vertex_data(&self, slot: u32) -> Option<&[u8]> {
        self.custom_data.get(&slot).map(Vec::as_slice)
    }

    /// Whether the mesh is on the device
    pub fn is_loaded(&self) -> bool {
        self.gpu.is_some()
    }

    /// Whether the mesh is loaded into mapped host memory
    pub fn is_dynamic(&self) -> bool {
        self.gpu.is_some_and(|gpu| gpu.dynamic)
    }

    /// Device vertex buffer
    pub fn vertex_buffer(&self) -> Option<BufferHandle> {
        self.gpu.map(|gpu| gpu.vertex_buffer)
    }

    /// Device index buffer
    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.gpu.map(|gpu| gpu.index_buffer)
    }

    /// Number of indices a draw limited to `max_indices` issues. Zero means
    /// the whole uploaded index buffer.
    pub fn draw_index_count(&self, max_indices: u32) -> u32 {
        let available = self.gpu.map_or(0, |gpu| gpu.index_count);
        if max_indices == 0 {
            available
        } else {
            max_indices.min(available)
        }
    }

    /// Unloaded deep copy of the CPU data
    pub fn duplicate(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            interleaved: self.interleaved.clone(),
            vertex_count: self.vertex_count,
            index_count: self.index_count,
            vertices: self.vertices.clone(),
            normals: self.normals.clone(),
            indices: self.indices.clone(),
            custom_data: self.custom_data.clone(),
            gpu: None,
        }
    }

    /// Upload the mesh.
    ///
    /// Fails if the mesh is already loaded, a count is zero, there are no
    /// indices, or an index names a vertex past `vertex_count`.
    pub fn load(&mut self, device: &mut dyn RenderDevice, dynamic: bool) -> RenderResult<()> {
        if self.is_loaded() {
            return Err(RenderError::invalid("mesh is already loaded"));
        }
        if self.vertex_count == 0 || self.index_count == 0 {
            return Err(RenderError::invalid("mesh has no vertices or no indices"));
        }
        if self.interleaved.stride == 0 {
            return Err(RenderError::invalid("mesh layout has no vertex streams"));
        }
        if let Some(index) = self.indices.iter().find(|&&i| i >= self.vertex_count) {
            return Err(RenderError::invalid(format!(
                "index {index} out of range for {} vertices",
                self.vertex_count
            )));
        }
        let index_count = self.index_count.min(self.indices.len() as u32);
        if index_count == 0 {
            return Err(RenderError::invalid("mesh index buffer is empty"));
        }

        let vertex_bytes = self.interleave();
        let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices[..index_count as usize]);

        let vertex_buffer = upload(device, &vertex_bytes, BufferUsage::VERTEX, dynamic)?;
        let index_buffer = match upload(device, index_bytes, BufferUsage::INDEX, dynamic) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        self.gpu = Some(GpuMesh { vertex_buffer, index_buffer, index_count, dynamic });
        log::debug!(
            "Loaded {} mesh: {} vertices ({} bytes), {} indices",
            if dynamic { "dynamic" } else { "static" },
            self.vertex_count,
            vertex_bytes.len(),
            index_count
        );
        Ok(())
    }

    /// Release the device buffers
    pub fn unload(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let gpu = self.gpu.take().ok_or(RenderError::MeshNotLoaded)?;
        device.destroy_buffer(gpu.vertex_buffer);
        device.destroy_buffer(gpu.index_buffer);
        Ok(())
    }

    /// Unload if loaded, then load again
    pub fn reload(&mut self, device: &mut dyn RenderDevice, dynamic: bool) -> RenderResult<()> {
        if self.is_loaded() {
            self.unload(device)?;
        }
        self.load(device, dynamic)
    }

    /// Replace one position, on the device too when loaded dynamically
    pub fn set_vertex_dynamic(&mut self, device: &mut dyn RenderDevice, index: u32, position: Vec4) -> RenderResult<()> {
        self.check_dynamic_edit()?;
        let (_, offset) = self
            .interleaved
            .position
            .ok_or_else(|| RenderError::invalid("mesh layout has no positions"))?;
        if let Some(slot) = self.vertices.get_mut(index as usize) {
            *slot = position;
        }
        self.write_vertex_bytes(device, index, offset, bytemuck::cast_slice(position.as_slice()))
    }

    /// Replace one normal, on the device too when loaded dynamically
    pub fn set_vertex_normal_dynamic(&mut self, device: &mut dyn RenderDevice, index: u32, normal: Vec3) -> RenderResult<()> {
        self.check_dynamic_edit()?;
        let (_, offset) = self
            .interleaved
            .normal
            .ok_or_else(|| RenderError::invalid("mesh layout has no normals"))?;
        let normal = unit_or_zero(normal);
        if let Some(slot) = self.normals.get_mut(index as usize) {
            *slot = normal;
        }
        self.write_vertex_bytes(device, index, offset, bytemuck::cast_slice(normal.as_slice()))
    }

    /// Replace one index, on the device too when loaded dynamically
    pub fn set_index_dynamic(&mut self, device: &mut dyn RenderDevice, index: u32, vertex: u32) -> RenderResult<()> {
        self.check_dynamic_edit()?;
        if vertex >= self.vertex_count {
            return Err(RenderError::invalid(format!("vertex {vertex} out of range")));
        }
        if let Some(slot) = self.indices.get_mut(index as usize) {
            *slot = vertex;
        }
        let Some(gpu) = self.gpu else {
            return Ok(());
        };
        if index >= gpu.index_count {
            return Err(RenderError::invalid(format!("index {index} out of range")));
        }
        let mapped = device
            .mapped_memory(gpu.index_buffer)
            .ok_or_else(|| RenderError::Device("index buffer is not mapped".to_string()))?;
        let at = index as usize * 4;
        mapped[at..at + 4].copy_from_slice(&vertex.to_ne_bytes());
        Ok(())
    }

    /// Replace the custom attribute at `slot` for one vertex. At most one
    /// attribute's worth of `bytes` is used.
    pub fn set_custom_vertex_data_dynamic(
        &mut self,
        device: &mut dyn RenderDevice,
        vertex: u32,
        slot: u32,
        bytes: &[u8],
    ) -> RenderResult<()> {
        self.check_dynamic_edit()?;
        let (offset, size) = self
            .interleaved
            .custom_offset(slot)
            .ok_or_else(|| RenderError::invalid(format!("no custom vertex input at slot {slot}")))?;
        let size = size as usize;
        let bytes = &bytes[..bytes.len().min(size)];

        if let Some(data) = self.custom_data.get_mut(&slot) {
            let at = vertex as usize * size;
            if let Some(target) = data.get_mut(at..at + bytes.len()) {
                target.copy_from_slice(bytes);
            }
        }
        self.write_vertex_bytes(device, vertex, offset, bytes)
    }

    /// Bind the buffers and draw up to `max_indices` indices
    pub fn record_draw(
        &self,
        device: &mut dyn RenderDevice,
        command_buffer: CommandBufferHandle,
        max_indices: u32,
    ) -> RenderResult<()> {
        let gpu = self.gpu.ok_or(RenderError::MeshNotLoaded)?;
        device.cmd_bind_vertex_buffer(command_buffer, gpu.vertex_buffer);
        device.cmd_bind_index_buffer(command_buffer, gpu.index_buffer);
        device.cmd_draw_indexed(command_buffer, self.draw_index_count(max_indices));
        Ok(())
    }

    fn check_dynamic_edit(&self) -> RenderResult<()> {
        match self.gpu {
            Some(gpu) if !gpu.dynamic => Err(RenderError::invalid("mesh was loaded statically")),
            _ => Ok(()),
        }
    }

    fn write_vertex_bytes(
        &self,
        device: &mut dyn RenderDevice,
        vertex: u32,
        offset: u32,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let Some(gpu) = self.gpu else {
            return Ok(());
        };
        if vertex >= self.vertex_count {
            return Err(RenderError::invalid(format!("vertex {vertex} out of range")));
        }
        let mapped = device
            .mapped_memory(gpu.vertex_buffer)
            .ok_or_else(|| RenderError::Device("vertex buffer is not mapped".to_string()))?;
        let at = (vertex * self.interleaved.stride + offset) as usize;
        mapped
            .get_mut(at..at + bytes.len())
            .ok_or_else(|| RenderError::invalid("vertex write past the end of the buffer"))?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Pack the vertex streams into one interleaved buffer. Missing or short
    /// streams leave their bytes zeroed.
    fn interleave(&self) -> Vec<u8> {
        let stride = self.interleaved.stride as usize;
        let mut bytes = vec![0u8; stride * self.vertex_count as usize];

        for (i, vertex) in bytes.chunks_exact_mut(stride).enumerate() {
            if let (Some((_, offset)), Some(position)) = (self.interleaved.position, self.vertices.get(i)) {
                write_f32s(vertex, offset as usize, position.as_slice());
            }
            if let (Some((_, offset)), Some(normal)) = (self.interleaved.normal, self.normals.get(i)) {
                write_f32s(vertex, offset as usize, normal.as_slice());
            }
            for (input, offset) in &self.interleaved.custom {
                let size = vertex_data_size(input.glsl_type, input.components) as usize;
                let Some(src) = self
                    .custom_data
                    .get(&input.slot)
                    .and_then(|data| data.get(i * size..(i + 1) * size))
                else {
                    continue;
                };
                let offset = *offset as usize;
                vertex[offset..offset + size].copy_from_slice(src);
            }
        }
        bytes
    }
}

fn unit_or_zero(v: Vec3) -> Vec3 {
    v.try_normalize(f32::EPSILON).unwrap_or(v)
}

fn upload(device: &mut dyn RenderDevice, bytes: &[u8], usage: BufferUsage, dynamic: bool) -> RenderResult<BufferHandle> {
    let size = bytes.len() as u64;
    if dynamic {
        let buffer = device.create_buffer(size, usage, MemoryLocation::HostVisible)?;
        match device.mapped_memory(buffer) {
            Some(mapped) => {
                mapped[..bytes.len()].copy_from_slice(bytes);
                Ok(buffer)
            }
            None => {
                device.destroy_buffer(buffer);
                Err(RenderError::Device("dynamic mesh buffer is not mapped".to_string()))
            }
        }
    } else {
        let staging = device.create_buffer(size, BufferUsage::TRANSFER_SRC, MemoryLocation::HostVisible)?;
        let result = upload_through_staging(device, staging, bytes, usage);
        device.destroy_buffer(staging);
        result
    }
}

fn upload_through_staging(
    device: &mut dyn RenderDevice,
    staging: BufferHandle,
    bytes: &[u8],
    usage: BufferUsage,
) -> RenderResult<BufferHandle> {
    let size = bytes.len() as u64;
    device
        .mapped_memory(staging)
        .ok_or_else(|| RenderError::Device("staging buffer is not mapped".to_string()))?[..bytes.len()]
        .copy_from_slice(bytes);
    let buffer = device.create_buffer(size, usage | BufferUsage::TRANSFER_DST, MemoryLocation::DeviceLocal)?;
    if let Err(e) = device.copy_buffer(staging, buffer, size) {
        device.destroy_buffer(buffer);
        return Err(e);
    }
    Ok(buffer)
}

struct MeshEntry {
    mesh: Mesh,
    refs: u32,
}

/// Reference-counted mesh storage
#[derive(Default)]
pub struct MeshTable {
    meshes: SlotMap<MeshHandle, MeshEntry>,
}

impl std::fmt::Debug for MeshTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshTable").field("meshes", &self.meshes.len()).finish()
    }
}

impl MeshTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a mesh into the table with one reference
    pub fn add(&mut self, mesh: Mesh) -> MeshHandle {
        self.meshes.insert(MeshEntry { mesh, refs: 1 })
    }

    /// Add a reference to a mesh and return the same handle
    pub fn retain(&mut self, handle: MeshHandle) -> RenderResult<MeshHandle> {
        let entry = self.meshes.get_mut(handle).ok_or(RenderError::MeshNotFound)?;
        entry.refs += 1;
        Ok(handle)
    }

    /// Add an unloaded deep copy of a mesh
    pub fn duplicate(&mut self, handle: MeshHandle) -> RenderResult<MeshHandle> {
        let copy = self.get(handle)?.duplicate();
        Ok(self.add(copy))
    }

    /// Drop one reference. The last one unloads and frees the mesh.
    pub fn release(&mut self, device: &mut dyn RenderDevice, handle: MeshHandle) -> RenderResult<()> {
        let entry = self.meshes.get_mut(handle).ok_or(RenderError::MeshNotFound)?;
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(mut entry) = self.meshes.remove(handle) {
                if entry.mesh.is_loaded() {
                    entry.mesh.unload(device)?;
                }
            }
        }
        Ok(())
    }

    /// Number of references to a mesh
    pub fn ref_count(&self, handle: MeshHandle) -> Option<u32> {
        self.meshes.get(handle).map(|entry| entry.refs)
    }

    /// Borrow a mesh
    pub fn get(&self, handle: MeshHandle) -> RenderResult<&Mesh> {
        self.meshes.get(handle).map(|entry| &entry.mesh).ok_or(RenderError::MeshNotFound)
    }

    /// Mutably borrow a mesh
    pub fn get_mut(&mut self, handle: MeshHandle) -> RenderResult<&mut Mesh> {
        self.meshes.get_mut(handle).map(|entry| &mut entry.mesh).ok_or(RenderError::MeshNotFound)
    }

    /// Number of meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Unload and drop every mesh regardless of references
    pub fn clear(&mut self, device: &mut dyn RenderDevice) {
        for (_, mut entry) in self.meshes.drain() {
            if entry.mesh.is_loaded() {
                // Unload only fails for an unloaded mesh
                let _ = entry.mesh.unload(device);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{RecordedCommand, RecordingDevice};
    use crate::render::pipeline::pipeline_config::GlslType;
    use crate::render::pipeline::uniform_schema::read_f32;

    fn triangle() -> Mesh {
        let mut mesh = Mesh::new(VertDataLayout::default(), 3, 3);
        mesh.set_vertices(vec![
            Vec4::new(0.0, 0.0, 0.0, 1.0),
            Vec4::new(1.0, 0.0, 0.0, 1.0),
            Vec4::new(0.0, 1.0, 0.0, 1.0),
        ]);
        mesh.set_vertex_normals(vec![Vec3::new(0.0, 0.0, 2.0); 3]);
        mesh.set_indices(vec![0, 1, 2]);
        mesh
    }

    #[test]
    fn test_normals_normalized_on_set() {
        let mesh = triangle();
        assert_eq!(mesh.vertex_normals()[0], Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_static_load_uses_staging_copy() {
        let mut device = RecordingDevice::default();
        let mut mesh = triangle();
        mesh.load(&mut device, false).unwrap();

        assert!(mesh.is_loaded());
        assert!(!mesh.is_dynamic());
        // Staging buffers are gone, only vertex and index buffers remain
        assert_eq!(device.live_buffer_count(), 2);

        let vertex_buffer = mesh.vertex_buffer().unwrap();
        assert!(device.mapped_memory(vertex_buffer).is_none());
        let bytes = device.buffer_contents(vertex_buffer).unwrap();
        assert_eq!(bytes.len(), 3 * 28);
        // Second vertex: x then normal z
        assert_eq!(read_f32(bytes, 28), Some(1.0));
        assert_eq!(read_f32(bytes, 28 + 16 + 8), Some(1.0));
    }

    #[test]
    fn test_load_rejections() {
        let mut device = RecordingDevice::default();

        let mut mesh = triangle();
        mesh.load(&mut device, false).unwrap();
        assert!(mesh.load(&mut device, false).is_err());

        let mut empty = Mesh::new(VertDataLayout::default(), 0, 3);
        assert!(empty.load(&mut device, false).is_err());

        let mut bad = triangle();
        bad.set_indices(vec![0, 1, 3]);
        assert!(bad.load(&mut device, false).is_err());
        assert!(!bad.is_loaded());
    }

    #[test]
    fn test_missing_custom_data_keeps_later_offsets() {
        let layout = VertDataLayout { use_norm_buffer: false, ..VertDataLayout::default() }
            .with_custom_input(1, GlslType::Float, 2)
            .with_custom_input(2, GlslType::Float, 1);
        let mut mesh = Mesh::new(layout, 2, 2);
        mesh.set_vertices(vec![Vec4::zeros(); 2]);
        mesh.set_indices(vec![0, 1]);
        // Slot 1 has no data at all
        mesh.set_custom_vertex_data(2, &[5.0f32, 6.0]);

        let mut device = RecordingDevice::default();
        mesh.load(&mut device, true).unwrap();
        let buffer = mesh.vertex_buffer().unwrap();
        let bytes = device.buffer_contents(buffer).unwrap();
        // Stride 16 + 8 + 4, slot 2 sits at 24
        assert_eq!(bytes.len(), 2 * 28);
        assert_eq!(read_f32(bytes, 24), Some(5.0));
        assert_eq!(read_f32(bytes, 28 + 24), Some(6.0));
        assert_eq!(read_f32(bytes, 16), Some(0.0));
    }

    #[test]
    fn test_index_buffer_holds_available_indices() {
        let mut device = RecordingDevice::default();
        let mut mesh = triangle();
        mesh.set_indices(vec![0, 1]);
        mesh.load(&mut device, false).unwrap();

        assert_eq!(device.buffer_contents(mesh.index_buffer().unwrap()).unwrap().len(), 8);
        assert_eq!(mesh.draw_index_count(0), 2);
        assert_eq!(mesh.draw_index_count(100), 2);
        assert_eq!(mesh.draw_index_count(1), 1);
    }

    #[test]
    fn test_dynamic_setters_write_through() {
        let mut device = RecordingDevice::default();
        let mut mesh = triangle();
        mesh.load(&mut device, true).unwrap();

        mesh.set_vertex_dynamic(&mut device, 2, Vec4::new(7.0, 8.0, 9.0, 1.0)).unwrap();
        mesh.set_vertex_normal_dynamic(&mut device, 1, Vec3::new(3.0, 0.0, 0.0)).unwrap();
        mesh.set_index_dynamic(&mut device, 0, 2).unwrap();

        let vertices = device.buffer_contents(mesh.vertex_buffer().unwrap()).unwrap();
        assert_eq!(read_f32(vertices, 2 * 28), Some(7.0));
        assert_eq!(read_f32(vertices, 28 + 16), Some(1.0));
        let indices = device.buffer_contents(mesh.index_buffer().unwrap()).unwrap();
        assert_eq!(indices[..4], 2u32.to_ne_bytes());
        assert_eq!(mesh.vertices()[2], Vec4::new(7.0, 8.0, 9.0, 1.0));

        assert!(mesh.set_vertex_dynamic(&mut device, 3, Vec4::zeros()).is_err());
        assert!(mesh.set_index_dynamic(&mut device, 0, 3).is_err());
    }

    #[test]
    fn test_dynamic_setters_rejected_for_static_mesh() {
        let mut device = RecordingDevice::default();
        let mut mesh = triangle();
        mesh.load(&mut device, false).unwrap();
        assert!(mesh.set_vertex_dynamic(&mut device, 0, Vec4::zeros()).is_err());
        assert!(mesh.set_index_dynamic(&mut device, 0, 1).is_err());

        // Unloaded meshes only update CPU data
        mesh.unload(&mut device).unwrap();
        mesh.set_vertex_dynamic(&mut device, 0, Vec4::new(1.0, 1.0, 1.0, 1.0)).unwrap();
        assert_eq!(mesh.vertices()[0], Vec4::new(1.0, 1.0, 1.0, 1.0));
    }

    #[test]
    fn test_record_draw_clamps_indices() {
        let mut device = RecordingDevice::default();
        let mut mesh = triangle();
        let cb = CommandBufferHandle(1);
        assert!(matches!(mesh.record_draw(&mut device, cb, 0), Err(RenderError::MeshNotLoaded)));

        mesh.load(&mut device, false).unwrap();
        mesh.record_draw(&mut device, cb, 10).unwrap();
        assert_eq!(device.commands().last(), Some(&RecordedCommand::DrawIndexed { index_count: 3 }));
    }

    #[test]
    fn test_table_reference_counting() {
        let mut device = RecordingDevice::default();
        let mut table = MeshTable::new();
        let handle = table.add(triangle());
        table.get_mut(handle).unwrap().load(&mut device, false).unwrap();

        assert_eq!(table.retain(handle).unwrap(), handle);
        assert_eq!(table.ref_count(handle), Some(2));

        let copy = table.duplicate(handle).unwrap();
        assert_ne!(copy, handle);
        assert!(!table.get(copy).unwrap().is_loaded());
        assert_eq!(table.get(copy).unwrap().indices(), &[0, 1, 2]);

        table.release(&mut device, handle).unwrap();
        assert!(table.get(handle).unwrap().is_loaded());
        table.release(&mut device, handle).unwrap();
        assert!(matches!(table.get(handle), Err(RenderError::MeshNotFound)));
        assert_eq!(device.live_buffer_count(), 0);
    }
}
