//! Headless recording device
//!
//! [`RecordingDevice`] implements [`RenderDevice`] without a GPU. Buffers are
//! plain host memory, every other object is a fresh integer handle, and every
//! recorded command, submission and presentation is appended to a log that
//! tests inspect. It can also be told to report a stale swapchain or to fail
//! pipeline creation.

use std::collections::{HashMap, HashSet};

use crate::render::api::*;
use crate::render::{RenderError, RenderResult};

/// A command recorded into a command buffer
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum RecordedCommand {
    BeginCommandBuffer,
    EndCommandBuffer,
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    SetCullMode(CullMode),
    SetViewport(Viewport),
    SetScissor(Rect2D),
    BindPipeline(PipelineHandle),
    BindDescriptorSets {
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    BindVertexBuffer(BufferHandle),
    BindIndexBuffer(BufferHandle),
    DrawIndexed { index_count: u32 },
}

/// Summary of a created graphics pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPipeline {
    /// Handle returned to the caller
    pub handle: PipelineHandle,
    /// Topology
    pub topology: PrimitiveTopology,
    /// Polygon mode
    pub polygon_mode: PolygonMode,
    /// Blending flag
    pub alpha_blend: bool,
    /// Vertex input layout
    pub vertex_input: VertexInputLayout,
    /// Layout handle
    pub layout: PipelineLayoutHandle,
}

#[derive(Debug)]
struct HostBuffer {
    data: Vec<u8>,
    location: MemoryLocation,
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

/// A [`RenderDevice`] that records instead of rendering
#[derive(Debug)]
pub struct RecordingDevice {
    next_handle: u64,
    buffers: HashMap<u64, HostBuffer>,
    pools: HashMap<u64, PoolState>,
    set_layouts: HashMap<u64, Vec<DescriptorBinding>>,
    live: HashSet<u64>,
    descriptor_writes: HashMap<(u64, u32), (BufferHandle, u64)>,
    pipelines: Vec<RecordedPipeline>,
    commands: Vec<RecordedCommand>,
    submissions: Vec<SubmitInfo>,
    presents: Vec<u32>,
    surface: SurfaceSupport,
    swapchains_created: usize,
    swapchain_image_count: u32,
    next_image: u32,
    stale_acquires: u32,
    queue_waits: usize,
    fail_pipeline_creation: bool,
    failed_submissions: u32,
}

impl RecordingDevice {
    /// A device whose surface is `width` x `height`, supports mailbox and
    /// FIFO, and allows two to eight images
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_surface(SurfaceSupport {
            min_image_count: 2,
            max_image_count: 8,
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            formats: vec![ImageFormat::B8G8R8A8Srgb],
            current_extent: Extent2D::new(width, height),
        })
    }

    /// A device with the given surface capabilities
    pub fn with_surface(surface: SurfaceSupport) -> Self {
        Self {
            next_handle: 1,
            buffers: HashMap::new(),
            pools: HashMap::new(),
            set_layouts: HashMap::new(),
            live: HashSet::new(),
            descriptor_writes: HashMap::new(),
            pipelines: Vec::new(),
            commands: Vec::new(),
            submissions: Vec::new(),
            presents: Vec::new(),
            surface,
            swapchains_created: 0,
            swapchain_image_count: 0,
            next_image: 0,
            stale_acquires: 0,
            queue_waits: 0,
            fail_pipeline_creation: false,
            failed_submissions: 0,
        }
    }

    fn next(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.live.insert(handle);
        handle
    }

    fn release(&mut self, handle: u64) {
        self.live.remove(&handle);
    }

    /// Report `OutOfDate` from the next `count` acquires
    pub fn fail_next_acquires(&mut self, count: u32) {
        self.stale_acquires = count;
    }

    /// Reject the next `count` queue submissions with a device error
    pub fn fail_next_submissions(&mut self, count: u32) {
        self.failed_submissions = count;
    }

    /// Make graphics pipeline creation fail until reset
    pub fn set_fail_pipeline_creation(&mut self, fail: bool) {
        self.fail_pipeline_creation = fail;
    }

    /// Change the surface extent reported by `surface_support`
    pub fn set_surface_extent(&mut self, extent: Extent2D) {
        self.surface.current_extent = extent;
    }

    /// Every recorded command, in order
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Forget recorded commands
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of recorded commands matching `predicate`
    pub fn count_commands(&self, predicate: impl Fn(&RecordedCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }

    /// Every submission, in order
    pub fn submissions(&self) -> &[SubmitInfo] {
        &self.submissions
    }

    /// Image indices presented, in order
    pub fn presents(&self) -> &[u32] {
        &self.presents
    }

    /// Graphics pipelines created so far
    pub fn pipelines(&self) -> &[RecordedPipeline] {
        &self.pipelines
    }

    /// Bindings of a descriptor set layout
    pub fn set_layout_bindings(&self, layout: SetLayoutHandle) -> Option<&[DescriptorBinding]> {
        self.set_layouts.get(&layout.0).map(Vec::as_slice)
    }

    /// Buffer and range a descriptor binding was pointed at
    pub fn descriptor_write(&self, set: DescriptorSetHandle, binding: u32) -> Option<(BufferHandle, u64)> {
        self.descriptor_writes.get(&(set.0, binding)).copied()
    }

    /// Contents of any buffer, including device-local ones
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    /// Whether a handle was created and not yet destroyed
    pub fn is_live(&self, handle: u64) -> bool {
        self.live.contains(&handle)
    }

    /// Number of buffers currently alive
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of descriptor pools currently alive
    pub fn live_pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of objects of any kind currently alive
    pub fn live_object_count(&self) -> usize {
        self.live.len()
    }

    /// Number of swapchains created so far
    pub fn swapchains_created(&self) -> usize {
        self.swapchains_created
    }

    /// Number of queue waits so far
    pub fn queue_waits(&self) -> usize {
        self.queue_waits
    }
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl RenderDevice for RecordingDevice {
    fn create_buffer(
        &mut self,
        size: u64,
        _usage: BufferUsage,
        location: MemoryLocation,
    ) -> RenderResult<BufferHandle> {
        if size == 0 {
            return Err(RenderError::invalid("zero-sized buffer"));
        }
        let handle = self.next();
        self.buffers.insert(handle, HostBuffer { data: vec![0; size as usize], location });
        Ok(BufferHandle(handle))
    }

    fn mapped_memory(&mut self, buffer: BufferHandle) -> Option<&mut [u8]> {
        match self.buffers.get_mut(&buffer.0) {
            Some(HostBuffer { data, location: MemoryLocation::HostVisible }) => Some(data.as_mut_slice()),
            _ => None,
        }
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()> {
        let size = size as usize;
        let bytes = self
            .buffers
            .get(&src.0)
            .and_then(|b| b.data.get(..size))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RenderError::invalid("copy source too small"))?;
        let target = self
            .buffers
            .get_mut(&dst.0)
            .and_then(|b| b.data.get_mut(..size))
            .ok_or_else(|| RenderError::invalid("copy destination too small"))?;
        target.copy_from_slice(&bytes);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
        self.release(buffer.0);
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> RenderResult<SetLayoutHandle> {
        let handle = self.next();
        self.set_layouts.insert(handle, bindings.to_vec());
        Ok(SetLayoutHandle(handle))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: SetLayoutHandle) {
        self.set_layouts.remove(&layout.0);
        self.release(layout.0);
    }

    fn create_descriptor_pool(&mut self, _uniform_descriptors: u32, max_sets: u32) -> RenderResult<DescriptorPoolHandle> {
        let handle = self.next();
        self.pools.insert(handle, PoolState { max_sets, allocated: 0 });
        Ok(DescriptorPoolHandle(handle))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        self.pools.remove(&pool.0);
        self.release(pool.0);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: SetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        if !self.set_layouts.contains_key(&layout.0) {
            return Err(RenderError::invalid("unknown descriptor set layout"));
        }
        let state = self
            .pools
            .get_mut(&pool.0)
            .ok_or_else(|| RenderError::invalid("unknown descriptor pool"))?;
        if state.allocated >= state.max_sets {
            return Err(RenderError::Device("descriptor pool exhausted".to_string()));
        }
        state.allocated += 1;
        // Sets die with their pool
        let handle = self.next_handle;
        self.next_handle += 1;
        Ok(DescriptorSetHandle(handle))
    }

    fn write_uniform_descriptor(&mut self, set: DescriptorSetHandle, binding: u32, buffer: BufferHandle, range: u64) {
        self.descriptor_writes.insert((set.0, binding), (buffer, range));
    }

    fn create_pipeline_layout(&mut self, _set_layouts: &[SetLayoutHandle]) -> RenderResult<PipelineLayoutHandle> {
        Ok(PipelineLayoutHandle(self.next()))
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        self.release(layout.0);
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc<'_>) -> RenderResult<PipelineHandle> {
        if self.fail_pipeline_creation {
            return Err(RenderError::Device("pipeline creation rejected".to_string()));
        }
        let handle = PipelineHandle(self.next());
        self.pipelines.push(RecordedPipeline {
            handle,
            topology: desc.topology,
            polygon_mode: desc.polygon_mode,
            alpha_blend: desc.alpha_blend,
            vertex_input: desc.vertex_input.clone(),
            layout: desc.layout,
        });
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.release(pipeline.0);
    }

    fn surface_support(&mut self) -> RenderResult<SurfaceSupport> {
        Ok(self.surface.clone())
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> RenderResult<(SwapchainHandle, Vec<ImageHandle>)> {
        let swapchain = SwapchainHandle(self.next());
        // Swapchain images are owned by the swapchain, not tracked as live
        let images = (0..desc.image_count)
            .map(|_| {
                let handle = self.next_handle;
                self.next_handle += 1;
                ImageHandle(handle)
            })
            .collect();
        self.swapchains_created += 1;
        self.swapchain_image_count = desc.image_count;
        self.next_image = 0;
        Ok((swapchain, images))
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        self.release(swapchain.0);
    }

    fn create_image_view(&mut self, _image: ImageHandle, _format: ImageFormat, _aspect: ImageAspect) -> RenderResult<ImageViewHandle> {
        Ok(ImageViewHandle(self.next()))
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        self.release(view.0);
    }

    fn create_depth_image(&mut self, _extent: Extent2D, _format: ImageFormat) -> RenderResult<ImageHandle> {
        Ok(ImageHandle(self.next()))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.release(image.0);
    }

    fn create_render_pass(&mut self, _color_format: ImageFormat, _depth_format: ImageFormat) -> RenderResult<RenderPassHandle> {
        Ok(RenderPassHandle(self.next()))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        self.release(render_pass.0);
    }

    fn create_framebuffer(
        &mut self,
        _render_pass: RenderPassHandle,
        _attachments: &[ImageViewHandle],
        _extent: Extent2D,
    ) -> RenderResult<FramebufferHandle> {
        Ok(FramebufferHandle(self.next()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.release(framebuffer.0);
    }

    fn acquire_next_image(&mut self, _swapchain: SwapchainHandle, _signal: SemaphoreHandle) -> RenderResult<AcquireOutcome> {
        if self.stale_acquires > 0 {
            self.stale_acquires -= 1;
            return Ok(AcquireOutcome::OutOfDate);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.swapchain_image_count.max(1);
        Ok(AcquireOutcome::Acquired(index))
    }

    fn present(&mut self, _swapchain: SwapchainHandle, image_index: u32, _wait: SemaphoreHandle) -> RenderResult<bool> {
        self.presents.push(image_index);
        Ok(false)
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        Ok(SemaphoreHandle(self.next()))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.release(semaphore.0);
    }

    fn create_command_buffer(&mut self, _queue: QueueType) -> RenderResult<CommandBufferHandle> {
        Ok(CommandBufferHandle(self.next()))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        self.release(command_buffer.0);
    }

    fn wait_for_queue(&mut self, _queue: QueueType) -> RenderResult<()> {
        self.queue_waits += 1;
        Ok(())
    }

    fn submit_command_buffer(&mut self, info: &SubmitInfo) -> RenderResult<()> {
        if self.failed_submissions > 0 {
            self.failed_submissions -= 1;
            return Err(RenderError::Device("queue submission failed".to_string()));
        }
        self.submissions.push(*info);
        Ok(())
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        Ok(())
    }

    fn begin_command_buffer(&mut self, _command_buffer: CommandBufferHandle) -> RenderResult<()> {
        self.commands.push(RecordedCommand::BeginCommandBuffer);
        Ok(())
    }

    fn end_command_buffer(&mut self, _command_buffer: CommandBufferHandle) -> RenderResult<()> {
        self.commands.push(RecordedCommand::EndCommandBuffer);
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, _command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        self.commands.push(RecordedCommand::BeginRenderPass(*begin));
    }

    fn cmd_end_render_pass(&mut self, _command_buffer: CommandBufferHandle) {
        self.commands.push(RecordedCommand::EndRenderPass);
    }

    fn cmd_set_cull_mode(&mut self, _command_buffer: CommandBufferHandle, mode: CullMode) {
        self.commands.push(RecordedCommand::SetCullMode(mode));
    }

    fn cmd_set_viewport(&mut self, _command_buffer: CommandBufferHandle, viewport: &Viewport) {
        self.commands.push(RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&mut self, _command_buffer: CommandBufferHandle, scissor: &Rect2D) {
        self.commands.push(RecordedCommand::SetScissor(*scissor));
    }

    fn cmd_bind_pipeline(&mut self, _command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        _command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.commands.push(RecordedCommand::BindDescriptorSets { layout, first_set, sets: sets.to_vec() });
    }

    fn cmd_bind_vertex_buffer(&mut self, _command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        self.commands.push(RecordedCommand::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&mut self, _command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        self.commands.push(RecordedCommand::BindIndexBuffer(buffer));
    }

    fn cmd_draw_indexed(&mut self, _command_buffer: CommandBufferHandle, index_count: u32) {
        self.commands.push(RecordedCommand::DrawIndexed { index_count });
    }
}

/// Shader provider that hands out the same placeholder binary for every stage
#[derive(Debug, Clone, Copy, Default)]
pub struct StubShaderProvider;

impl ShaderProvider for StubShaderProvider {
    fn load(&self, _shader: ShaderRef<'_>) -> RenderResult<Vec<u8>> {
        // SPIR-V magic number, little endian
        Ok(vec![0x03, 0x02, 0x23, 0x07])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_visible_buffers_are_mapped() {
        let mut device = RecordingDevice::default();
        let host = device.create_buffer(16, BufferUsage::UNIFORM, MemoryLocation::HostVisible).unwrap();
        let local = device.create_buffer(16, BufferUsage::VERTEX, MemoryLocation::DeviceLocal).unwrap();

        assert_eq!(device.mapped_memory(host).map(|m| m.len()), Some(16));
        assert!(device.mapped_memory(local).is_none());
    }

    #[test]
    fn test_copy_buffer_moves_bytes() {
        let mut device = RecordingDevice::default();
        let src = device.create_buffer(4, BufferUsage::TRANSFER_SRC, MemoryLocation::HostVisible).unwrap();
        let dst = device.create_buffer(4, BufferUsage::TRANSFER_DST, MemoryLocation::DeviceLocal).unwrap();
        device.mapped_memory(src).unwrap().copy_from_slice(&[1, 2, 3, 4]);

        device.copy_buffer(src, dst, 4).unwrap();
        assert_eq!(device.buffer_contents(dst), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_descriptor_pool_capacity_enforced() {
        let mut device = RecordingDevice::default();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(0, 1).unwrap();

        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
        assert!(device.allocate_descriptor_set(pool, layout).is_err());
    }

    #[test]
    fn test_stale_acquire_then_cycle() {
        let mut device = RecordingDevice::default();
        let desc = SwapchainDesc {
            image_count: 2,
            format: ImageFormat::B8G8R8A8Srgb,
            present_mode: PresentMode::Fifo,
            extent: Extent2D::new(800, 600),
        };
        let (swapchain, images) = device.create_swapchain(&desc).unwrap();
        assert_eq!(images.len(), 2);

        device.fail_next_acquires(1);
        let sem = SemaphoreHandle::NULL;
        assert_eq!(device.acquire_next_image(swapchain, sem).unwrap(), AcquireOutcome::OutOfDate);
        assert_eq!(device.acquire_next_image(swapchain, sem).unwrap(), AcquireOutcome::Acquired(0));
        assert_eq!(device.acquire_next_image(swapchain, sem).unwrap(), AcquireOutcome::Acquired(1));
        assert_eq!(device.acquire_next_image(swapchain, sem).unwrap(), AcquireOutcome::Acquired(0));
    }
}
