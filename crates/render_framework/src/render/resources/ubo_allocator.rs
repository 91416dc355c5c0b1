//! Pooled uniform-set allocator
//!
//! Every draw needs its own object-tier descriptor set with freshly written
//! uniform buffers, because the GPU reads them only after the whole frame has
//! been recorded. The allocator hands those sets out from fixed-size pools of
//! pre-built sets whose buffers stay persistently mapped, and takes them all
//! back in one sweep once the frame is presented.
//!
//! Set ids are flat: `id = pool_index * pool_size + slot`. Released ids go on a
//! LIFO free stack; when the stack is empty a new pool of the same size is
//! appended. One global-tier set, shared by every draw, is built up front.

use std::collections::HashMap;

use crate::render::api::{
    BufferHandle, BufferUsage, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle,
    MemoryLocation, PipelineLayoutHandle, RenderDevice, SetLayoutHandle,
};
use crate::render::pipeline::layout::{global_set_bindings, object_set_bindings};
use crate::render::pipeline::uniform_schema::{camera, dir_light, material, TransformBlockLayout};
use crate::render::pipeline::UniformLayout;
use crate::render::{RenderError, RenderResult};

/// Default number of uniform sets per pool
pub const DEFAULT_POOL_SIZE: u32 = 100;

/// Object-tier blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectBlock {
    /// Transform matrices and object scale
    Transform,
    /// Material constants
    Material,
    /// Camera transform
    Camera,
    /// Custom block at a binding slot
    Custom(u32),
}

/// Global-tier blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalBlock {
    /// Directional light
    DirectionalLight,
    /// Custom block at a binding slot
    Custom(u32),
}

#[derive(Debug, Clone, Copy)]
struct UniformBuffer {
    buffer: BufferHandle,
    size: u64,
}

#[derive(Debug, Default)]
struct ObjectUniformSet {
    used: bool,
    descriptor_set: DescriptorSetHandle,
    transform: Option<UniformBuffer>,
    material: Option<UniformBuffer>,
    camera: Option<UniformBuffer>,
    custom: HashMap<u32, UniformBuffer>,
}

impl ObjectUniformSet {
    fn buffers(&self) -> impl Iterator<Item = &UniformBuffer> {
        self.transform
            .iter()
            .chain(self.material.iter())
            .chain(self.camera.iter())
            .chain(self.custom.values())
    }
}

#[derive(Debug, Default)]
struct GlobalUniformSet {
    pool: DescriptorPoolHandle,
    descriptor_set: DescriptorSetHandle,
    dir_light: Option<UniformBuffer>,
    custom: HashMap<u32, UniformBuffer>,
}

/// Allocates per-draw object uniform sets and owns the global set
#[derive(Debug)]
pub struct UniformBufferAllocator {
    pool_size: u32,
    layout: UniformLayout,
    transform_layout: TransformBlockLayout,
    object_set_layout: SetLayoutHandle,
    global_set_layout: SetLayoutHandle,
    pools: Vec<DescriptorPoolHandle>,
    object_sets: Vec<Vec<ObjectUniformSet>>,
    available: Vec<u32>,
    global_set: GlobalUniformSet,
}

impl UniformBufferAllocator {
    /// Build the global set and the first pool of object sets.
    ///
    /// The set layouts are borrowed: the caller creates them from the same
    /// `layout` and destroys them after [`destroy`](Self::destroy).
    pub fn new(
        device: &mut dyn RenderDevice,
        layout: &UniformLayout,
        object_set_layout: SetLayoutHandle,
        global_set_layout: SetLayoutHandle,
        pool_size: u32,
    ) -> RenderResult<Self> {
        if pool_size == 0 {
            return Err(RenderError::invalid("uniform pool size must be at least 1"));
        }

        let mut allocator = Self {
            pool_size,
            layout: layout.clone(),
            transform_layout: TransformBlockLayout::new(&layout.object),
            object_set_layout,
            global_set_layout,
            pools: Vec::new(),
            object_sets: Vec::new(),
            available: Vec::new(),
            global_set: GlobalUniformSet::default(),
        };

        let mut result = allocator.create_global_set(device);
        if result.is_ok() {
            result = allocator.add_new_pool(device);
        }
        if let Err(e) = result {
            allocator.destroy(device);
            return Err(e);
        }
        Ok(allocator)
    }

    /// Sets per pool
    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Number of pools created so far
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Total number of sets across all pools
    pub fn capacity(&self) -> usize {
        self.pools.len() * self.pool_size as usize
    }

    /// Number of ids on the free stack
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    /// Whether `id` names an allocated set
    pub fn is_used(&self, id: u32) -> bool {
        self.slot(id).is_some_and(|set| set.used)
    }

    fn split(&self, id: u32) -> Option<(usize, usize)> {
        let pool = (id / self.pool_size) as usize;
        let slot = (id % self.pool_size) as usize;
        (pool < self.object_sets.len()).then_some((pool, slot))
    }

    fn slot(&self, id: u32) -> Option<&ObjectUniformSet> {
        let (pool, slot) = self.split(id)?;
        self.object_sets.get(pool)?.get(slot)
    }

    fn slot_mut(&mut self, id: u32) -> Option<&mut ObjectUniformSet> {
        let (pool, slot) = self.split(id)?;
        self.object_sets.get_mut(pool)?.get_mut(slot)
    }

    /// Take a set off the free stack, appending a new pool when it is empty
    pub fn allocate(&mut self, device: &mut dyn RenderDevice) -> RenderResult<u32> {
        if self.available.is_empty() {
            self.add_new_pool(device)?;
        }
        let id = self
            .available
            .pop()
            .ok_or_else(|| RenderError::invalid("uniform pool produced no free sets"))?;
        if let Some(set) = self.slot_mut(id) {
            set.used = true;
        }
        Ok(id)
    }

    /// Return one set. Ids that are out of range or already free are ignored.
    pub fn free(&mut self, id: u32) {
        if let Some(set) = self.slot_mut(id) {
            if set.used {
                set.used = false;
                self.available.push(id);
            }
        }
    }

    /// Return every allocated set
    pub fn free_all(&mut self) {
        let capacity = self.capacity();
        for (pool_index, pool) in self.object_sets.iter_mut().enumerate() {
            for (slot, set) in pool.iter_mut().enumerate() {
                if self.available.len() >= capacity {
                    return;
                }
                if set.used {
                    set.used = false;
                    self.available.push(pool_index as u32 * self.pool_size + slot as u32);
                }
            }
        }
    }

    /// Bind `[object set, global set]` at set index 0
    pub fn bind(
        &self,
        device: &mut dyn RenderDevice,
        command_buffer: CommandBufferHandle,
        pipeline_layout: PipelineLayoutHandle,
        id: u32,
    ) -> RenderResult<()> {
        let set = self
            .slot(id)
            .filter(|set| set.used)
            .ok_or(RenderError::UniformSetUnused { id })?;
        device.cmd_bind_descriptor_sets(
            command_buffer,
            pipeline_layout,
            0,
            &[set.descriptor_set, self.global_set.descriptor_set],
        );
        Ok(())
    }

    /// Mapped bytes of one object-tier block. `None` when the id is out of
    /// range, the set is free, or the block is disabled.
    pub fn object_buffer<'d>(
        &self,
        device: &'d mut dyn RenderDevice,
        id: u32,
        block: ObjectBlock,
    ) -> Option<&'d mut [u8]> {
        let set = self.slot(id).filter(|set| set.used)?;
        let buffer = match block {
            ObjectBlock::Transform => set.transform,
            ObjectBlock::Material => set.material,
            ObjectBlock::Camera => set.camera,
            ObjectBlock::Custom(slot) => set.custom.get(&slot).copied(),
        }?;
        mapped(device, buffer)
    }

    /// Mapped bytes of one global-tier block. `None` when the block is disabled.
    pub fn global_buffer<'d>(&self, device: &'d mut dyn RenderDevice, block: GlobalBlock) -> Option<&'d mut [u8]> {
        let buffer = match block {
            GlobalBlock::DirectionalLight => self.global_set.dir_light,
            GlobalBlock::Custom(slot) => self.global_set.custom.get(&slot).copied(),
        }?;
        mapped(device, buffer)
    }

    /// Layout of the transform block the sets were sized for
    pub fn transform_layout(&self) -> &TransformBlockLayout {
        &self.transform_layout
    }

    /// Release every pool, set and buffer
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        for set in self.object_sets.drain(..).flatten() {
            for buffer in set.buffers() {
                device.destroy_buffer(buffer.buffer);
            }
        }
        for pool in self.pools.drain(..) {
            device.destroy_descriptor_pool(pool);
        }
        self.available.clear();

        let global = std::mem::take(&mut self.global_set);
        for buffer in global.dir_light.iter().chain(global.custom.values()) {
            device.destroy_buffer(buffer.buffer);
        }
        if !global.pool.is_null() {
            device.destroy_descriptor_pool(global.pool);
        }
    }

    fn create_global_set(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let descriptors = global_set_bindings(&self.layout.global).len() as u32;
        self.global_set.pool = device.create_descriptor_pool(descriptors, 1)?;
        self.global_set.descriptor_set =
            device.allocate_descriptor_set(self.global_set.pool, self.global_set_layout)?;
        let set = self.global_set.descriptor_set;

        let global = &self.layout.global;
        if global.use_directional_light {
            self.global_set.dir_light = Some(create_uniform_buffer(
                device,
                set,
                global.dir_light_bind_slot,
                dir_light::SIZE as u64,
            )?);
        }
        for custom in global.custom.iter().filter(|c| c.size > 0) {
            let buffer = create_uniform_buffer(device, set, custom.bind_slot, u64::from(custom.size))?;
            self.global_set.custom.insert(custom.bind_slot, buffer);
        }
        Ok(())
    }

    fn add_new_pool(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let bindings = object_set_bindings(&self.layout.object).len() as u32;
        let pool = device.create_descriptor_pool(bindings * self.pool_size, self.pool_size)?;

        let mut sets: Vec<ObjectUniformSet> = Vec::with_capacity(self.pool_size as usize);
        for _ in 0..self.pool_size {
            match self.create_object_set(device, pool) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    for buffer in sets.iter().flat_map(ObjectUniformSet::buffers) {
                        device.destroy_buffer(buffer.buffer);
                    }
                    device.destroy_descriptor_pool(pool);
                    return Err(e);
                }
            }
        }

        let pool_index = self.pools.len() as u32;
        self.pools.push(pool);
        self.object_sets.push(sets);
        let first = pool_index * self.pool_size;
        self.available.extend((first..first + self.pool_size).rev());
        log::debug!("Uniform allocator grew to {} pools ({} sets)", self.pools.len(), self.capacity());
        Ok(())
    }

    fn create_object_set(
        &self,
        device: &mut dyn RenderDevice,
        pool: DescriptorPoolHandle,
    ) -> RenderResult<ObjectUniformSet> {
        let mut set = ObjectUniformSet {
            descriptor_set: device.allocate_descriptor_set(pool, self.object_set_layout)?,
            ..ObjectUniformSet::default()
        };
        if let Err(e) = self.fill_object_set(device, &mut set) {
            for buffer in set.buffers() {
                device.destroy_buffer(buffer.buffer);
            }
            return Err(e);
        }
        Ok(set)
    }

    fn fill_object_set(&self, device: &mut dyn RenderDevice, set: &mut ObjectUniformSet) -> RenderResult<()> {
        let inputs = &self.layout.object;
        let descriptor_set = set.descriptor_set;
        if self.transform_layout.size > 0 {
            set.transform = Some(create_uniform_buffer(
                device,
                descriptor_set,
                inputs.transform_bind_slot,
                self.transform_layout.size as u64,
            )?);
        }
        if inputs.use_material {
            set.material = Some(create_uniform_buffer(
                device,
                descriptor_set,
                inputs.material_bind_slot,
                material::SIZE as u64,
            )?);
        }
        if inputs.use_cam_transform {
            set.camera = Some(create_uniform_buffer(
                device,
                descriptor_set,
                inputs.cam_bind_slot,
                camera::SIZE as u64,
            )?);
        }
        for custom in inputs.custom.iter().filter(|c| c.size > 0) {
            let buffer = create_uniform_buffer(device, descriptor_set, custom.bind_slot, u64::from(custom.size))?;
            set.custom.insert(custom.bind_slot, buffer);
        }
        Ok(())
    }
}

fn create_uniform_buffer(
    device: &mut dyn RenderDevice,
    set: DescriptorSetHandle,
    binding: u32,
    size: u64,
) -> RenderResult<UniformBuffer> {
    let buffer = device.create_buffer(size, BufferUsage::UNIFORM, MemoryLocation::HostVisible)?;
    device.write_uniform_descriptor(set, binding, buffer, size);
    Ok(UniformBuffer { buffer, size })
}

fn mapped(device: &mut dyn RenderDevice, buffer: UniformBuffer) -> Option<&mut [u8]> {
    device
        .mapped_memory(buffer.buffer)
        .and_then(|bytes| bytes.get_mut(..buffer.size as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{RecordedCommand, RecordingDevice};
    use crate::render::pipeline::pipeline_config::{CustomUniformInput, StageUse};
    use std::collections::HashSet;

    fn allocator(device: &mut RecordingDevice, layout: &UniformLayout, pool_size: u32) -> UniformBufferAllocator {
        let object = device.create_descriptor_set_layout(&object_set_bindings(&layout.object)).unwrap();
        let global = device.create_descriptor_set_layout(&global_set_bindings(&layout.global)).unwrap();
        UniformBufferAllocator::new(device, layout, object, global, pool_size).unwrap()
    }

    #[test]
    fn test_initialize_builds_one_pool() {
        let mut device = RecordingDevice::default();
        let alloc = allocator(&mut device, &UniformLayout::default(), 4);
        assert_eq!(alloc.pool_count(), 1);
        assert_eq!(alloc.available_count(), 4);
        // Global pool plus one object pool
        assert_eq!(device.live_pool_count(), 2);
    }

    #[test]
    fn test_first_ids_come_out_in_order() {
        let mut device = RecordingDevice::default();
        let mut alloc = allocator(&mut device, &UniformLayout::default(), 4);
        let ids: Vec<u32> = (0..4).map(|_| alloc.allocate(&mut device).unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        // Exhausted: the next pool's first id
        assert_eq!(alloc.allocate(&mut device).unwrap(), 4);
        assert_eq!(alloc.pool_count(), 2);
    }

    #[test]
    fn test_allocations_grow_pools_with_unique_ids() {
        let mut device = RecordingDevice::default();
        let pool_size = 3;
        let mut alloc = allocator(&mut device, &UniformLayout::default(), pool_size);

        for n in [1usize, 3, 4, 7, 10] {
            alloc.free_all();
            let ids: HashSet<u32> = (0..n).map(|_| alloc.allocate(&mut device).unwrap()).collect();
            assert_eq!(ids.len(), n);
            let expected_pools = n.div_ceil(pool_size as usize);
            assert!(alloc.pool_count() >= expected_pools);
        }
        // Pools are never released, so the count matches the largest frame
        assert_eq!(alloc.pool_count(), 4);
    }

    #[test]
    fn test_fresh_allocator_pool_count_is_ceil() {
        for (n, pools) in [(1usize, 1usize), (5, 1), (6, 2), (11, 3)] {
            let mut device = RecordingDevice::default();
            let mut alloc = allocator(&mut device, &UniformLayout::default(), 5);
            for _ in 0..n {
                alloc.allocate(&mut device).unwrap();
            }
            assert_eq!(alloc.pool_count(), pools, "{n} allocations");
        }
    }

    #[test]
    fn test_free_then_reuse_is_lifo() {
        let mut device = RecordingDevice::default();
        let mut alloc = allocator(&mut device, &UniformLayout::default(), 4);
        let a = alloc.allocate(&mut device).unwrap();
        let b = alloc.allocate(&mut device).unwrap();
        alloc.free(a);
        alloc.free(b);
        assert_eq!(alloc.allocate(&mut device).unwrap(), b);
        assert_eq!(alloc.allocate(&mut device).unwrap(), a);
    }

    #[test]
    fn test_free_ignores_invalid_and_double_free() {
        let mut device = RecordingDevice::default();
        let mut alloc = allocator(&mut device, &UniformLayout::default(), 4);
        let id = alloc.allocate(&mut device).unwrap();
        let before = alloc.available_count();

        alloc.free(id);
        alloc.free(id);
        alloc.free(999);
        assert_eq!(alloc.available_count(), before + 1);
    }

    #[test]
    fn test_free_all_twice_is_stable() {
        let mut device = RecordingDevice::default();
        let mut alloc = allocator(&mut device, &UniformLayout::default(), 4);
        for _ in 0..6 {
            alloc.allocate(&mut device).unwrap();
        }
        alloc.free_all();
        let after_first = alloc.available_count();
        alloc.free_all();
        assert_eq!(alloc.available_count(), after_first);
        assert_eq!(after_first, alloc.capacity());
    }

    #[test]
    fn test_block_lookup_contract() {
        let mut device = RecordingDevice::default();
        let mut layout = UniformLayout::default();
        layout.object.use_cam_transform = false;
        layout.object.custom.push(CustomUniformInput { stages: StageUse::VERTEX, size: 48, bind_slot: 5 });
        let mut alloc = allocator(&mut device, &layout, 2);

        // Free set
        assert!(alloc.object_buffer(&mut device, 0, ObjectBlock::Material).is_none());

        let id = alloc.allocate(&mut device).unwrap();
        assert_eq!(alloc.object_buffer(&mut device, id, ObjectBlock::Transform).map(|b| b.len()), Some(144));
        assert_eq!(alloc.object_buffer(&mut device, id, ObjectBlock::Material).map(|b| b.len()), Some(32));
        assert!(alloc.object_buffer(&mut device, id, ObjectBlock::Camera).is_none());
        assert_eq!(alloc.object_buffer(&mut device, id, ObjectBlock::Custom(5)).map(|b| b.len()), Some(48));
        assert!(alloc.object_buffer(&mut device, id, ObjectBlock::Custom(6)).is_none());
        assert!(alloc.object_buffer(&mut device, 500, ObjectBlock::Material).is_none());

        assert_eq!(
            alloc.global_buffer(&mut device, GlobalBlock::DirectionalLight).map(|b| b.len()),
            Some(144)
        );
        assert!(alloc.global_buffer(&mut device, GlobalBlock::Custom(0)).is_none());
    }

    #[test]
    fn test_descriptors_point_at_block_buffers() {
        let mut device = RecordingDevice::default();
        let mut alloc = allocator(&mut device, &UniformLayout::default(), 1);
        let id = alloc.allocate(&mut device).unwrap();
        let set = alloc.slot(id).unwrap().descriptor_set;

        let (_, range) = device.descriptor_write(set, 0).unwrap();
        assert_eq!(range, 144);
        let (_, range) = device.descriptor_write(set, 1).unwrap();
        assert_eq!(range, 32);
        let (_, range) = device.descriptor_write(set, 2).unwrap();
        assert_eq!(range, 64);
    }

    #[test]
    fn test_bind_requires_used_set() {
        let mut device = RecordingDevice::default();
        let mut alloc = allocator(&mut device, &UniformLayout::default(), 2);
        let layout = PipelineLayoutHandle(42);
        let cb = CommandBufferHandle(1);

        assert!(matches!(
            alloc.bind(&mut device, cb, layout, 0),
            Err(RenderError::UniformSetUnused { id: 0 })
        ));

        let id = alloc.allocate(&mut device).unwrap();
        alloc.bind(&mut device, cb, layout, id).unwrap();
        match device.commands().last() {
            Some(RecordedCommand::BindDescriptorSets { layout: bound, first_set, sets }) => {
                assert_eq!(*bound, layout);
                assert_eq!(*first_set, 0);
                assert_eq!(sets.len(), 2);
                assert_eq!(sets[0], alloc.slot(id).unwrap().descriptor_set);
                assert_eq!(sets[1], alloc.global_set.descriptor_set);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut device = RecordingDevice::default();
        let mut alloc = allocator(&mut device, &UniformLayout::default(), 3);
        for _ in 0..5 {
            alloc.allocate(&mut device).unwrap();
        }
        assert!(device.live_buffer_count() > 0);

        alloc.destroy(&mut device);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_pool_count(), 0);
        assert_eq!(alloc.capacity(), 0);
    }
}
