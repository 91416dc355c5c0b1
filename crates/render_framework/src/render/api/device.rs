//! Device capability trait
//!
//! [`RenderDevice`] is everything the frame engine, pipelines and the uniform
//! allocator need from an explicit graphics API: buffer and descriptor
//! management, pipeline objects, presentation, queue submission and command
//! recording. Every GPU object crosses this boundary as an opaque `u64` handle
//! so the control logic above it never names a backend type.
//!
//! Two implementations ship with the crate: the Vulkan backend and the
//! headless recording device used by tests.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::render::RenderResult;

macro_rules! device_handles {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl $name {
                /// The null handle
                pub const NULL: Self = Self(0);

                /// Whether this is the null handle
                pub fn is_null(self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

device_handles! {
    /// Handle to a GPU buffer and its memory
    BufferHandle;
    /// Handle to an allocated descriptor set
    DescriptorSetHandle;
    /// Handle to a descriptor pool
    DescriptorPoolHandle;
    /// Handle to a descriptor set layout
    SetLayoutHandle;
    /// Handle to a pipeline layout
    PipelineLayoutHandle;
    /// Handle to a graphics pipeline
    PipelineHandle;
    /// Handle to a render pass
    RenderPassHandle;
    /// Handle to a framebuffer
    FramebufferHandle;
    /// Handle to an image (swapchain-owned or device-allocated)
    ImageHandle;
    /// Handle to an image view
    ImageViewHandle;
    /// Handle to a semaphore
    SemaphoreHandle;
    /// Handle to a primary command buffer
    CommandBufferHandle;
    /// Handle to a swapchain
    SwapchainHandle;
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2D {
    /// Create a new extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-sized extent, reported by minimized windows
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Queues a device exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Graphics and transfer work
    Graphics,
    /// Presentation
    Present,
}

bitflags! {
    /// Shader stages a descriptor binding is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 0b01;
        /// Fragment stage
        const FRAGMENT = 0b10;
    }
}

bitflags! {
    /// How a buffer will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Vertex input
        const VERTEX = 0b0_0001;
        /// Index input
        const INDEX = 0b0_0010;
        /// Uniform block
        const UNIFORM = 0b0_0100;
        /// Source of a buffer copy
        const TRANSFER_SRC = 0b0_1000;
        /// Destination of a buffer copy
        const TRANSFER_DST = 0b1_0000;
    }
}

/// Where buffer memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Host-visible, host-coherent and persistently mapped
    HostVisible,
    /// Device-local, filled through `copy_buffer`
    DeviceLocal,
}

/// One uniform-buffer binding inside a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding slot
    pub binding: u32,
    /// Stages the binding is visible to
    pub stages: ShaderStages,
}

/// Vertex attribute formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum VertexFormat {
    R32Uint,
    R32G32Uint,
    R32G32B32Uint,
    R32G32B32A32Uint,
    R32Sint,
    R32G32Sint,
    R32G32B32Sint,
    R32G32B32A32Sint,
    R32Sfloat,
    R32G32Sfloat,
    R32G32B32Sfloat,
    R32G32B32A32Sfloat,
    R64Sfloat,
    R64G64Sfloat,
    R64G64B64Sfloat,
    R64G64B64A64Sfloat,
}

/// One vertex attribute inside the interleaved vertex buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Attribute format
    pub format: VertexFormat,
    /// Byte offset inside one vertex
    pub offset: u32,
}

/// Interleaved vertex input description (single binding)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexInputLayout {
    /// Bytes per vertex
    pub stride: u32,
    /// Attributes sorted by location
    pub attributes: Vec<VertexAttribute>,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    /// Independent triangles
    TriangleList,
    /// Connected line strip
    LineStrip,
    /// Independent line segments
    LineList,
}

/// Rasterizer polygon mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    /// Filled polygons
    Fill,
    /// Polygon edges only
    Line,
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    /// No face culling
    None,
    /// Cull front-facing triangles
    Front,
    /// Cull back-facing triangles
    Back,
}

/// Everything needed to build a graphics pipeline object.
///
/// Viewport, scissor and cull mode are always dynamic state. Front faces are
/// clockwise, depth testing uses `LESS` with writes enabled, and blending when
/// enabled is `SRC_ALPHA / ONE_MINUS_SRC_ALPHA`.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc<'a> {
    /// Vertex shader binary
    pub vertex_shader: &'a [u8],
    /// Fragment shader binary
    pub fragment_shader: &'a [u8],
    /// Vertex input
    pub vertex_input: &'a VertexInputLayout,
    /// Topology
    pub topology: PrimitiveTopology,
    /// Polygon mode
    pub polygon_mode: PolygonMode,
    /// Whether alpha blending is enabled
    pub alpha_blend: bool,
    /// Pipeline layout
    pub layout: PipelineLayoutHandle,
    /// Render pass the pipeline draws in
    pub render_pass: RenderPassHandle,
}

/// Swapchain presentation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentMode {
    /// No vsync
    Immediate,
    /// Triple buffering
    Mailbox,
    /// Vsync
    Fifo,
    /// Vsync, late frames tear
    FifoRelaxed,
}

/// Image formats the engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Swapchain colour format (sRGB non-linear colour space)
    B8G8R8A8Srgb,
    /// Linear swapchain colour format
    B8G8R8A8Unorm,
    /// Depth attachment format
    D32Sfloat,
}

/// Image aspect for view creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAspect {
    /// Colour aspect
    Color,
    /// Depth aspect
    Depth,
}

/// Surface capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSupport {
    /// Minimum swapchain image count
    pub min_image_count: u32,
    /// Maximum swapchain image count, 0 for unbounded
    pub max_image_count: u32,
    /// Present modes the surface supports
    pub present_modes: Vec<PresentMode>,
    /// Colour formats the surface supports
    pub formats: Vec<ImageFormat>,
    /// The surface's current extent
    pub current_extent: Extent2D,
}

/// Swapchain creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Requested image count
    pub image_count: u32,
    /// Colour format
    pub format: ImageFormat,
    /// Present mode
    pub present_mode: PresentMode,
    /// Image extent
    pub extent: Extent2D,
}

/// Result of acquiring the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image index that was acquired
    Acquired(u32),
    /// The swapchain no longer matches the surface and must be rebuilt
    OutOfDate,
}

/// Viewport rectangle with depth range 0..1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

/// Integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Size
    pub extent: Extent2D,
}

/// Attachment clear values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    /// Colour clear (RGBA)
    pub color: [f32; 4],
    /// Depth clear
    pub depth: f32,
}

/// Render pass begin parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassBegin {
    /// Render pass
    pub render_pass: RenderPassHandle,
    /// Target framebuffer
    pub framebuffer: FramebufferHandle,
    /// Render area (offset 0,0)
    pub extent: Extent2D,
    /// Clear values for the colour and depth attachments
    pub clear: ClearValues,
}

/// Pipeline stage a submission waits at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// Colour attachment output
    ColorAttachmentOutput,
    /// Top of pipe
    TopOfPipe,
}

/// Command buffer submission parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Queue to submit to
    pub queue: QueueType,
    /// Command buffer to submit
    pub command_buffer: CommandBufferHandle,
    /// Semaphore to wait on before executing
    pub wait_semaphore: Option<SemaphoreHandle>,
    /// Stage the wait applies to
    pub wait_stage: WaitStage,
    /// Semaphore signalled when execution completes
    pub signal_semaphore: Option<SemaphoreHandle>,
    /// Block until the queue fence signals
    pub block: bool,
}

/// Graphics device capability provider.
///
/// Creation calls are fallible. Destruction and command recording are not:
/// a backend logs what it cannot do and carries on. Destroying a handle
/// twice or destroying a null handle is a no-op.
pub trait RenderDevice {
    // Buffers

    /// Create a buffer. Host-visible buffers are persistently mapped.
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> RenderResult<BufferHandle>;

    /// Mapped bytes of a host-visible buffer, `None` for device-local or
    /// unknown buffers
    fn mapped_memory(&mut self, buffer: BufferHandle) -> Option<&mut [u8]>;

    /// Copy `size` bytes from `src` to `dst` on the graphics queue and wait
    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Descriptors

    /// Create a layout of uniform-buffer bindings
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> RenderResult<SetLayoutHandle>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: SetLayoutHandle);

    /// Create a pool holding `uniform_descriptors` uniform descriptors spread
    /// over at most `max_sets` sets
    fn create_descriptor_pool(
        &mut self,
        uniform_descriptors: u32,
        max_sets: u32,
    ) -> RenderResult<DescriptorPoolHandle>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    /// Allocate one set from `pool`
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: SetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle>;

    /// Point `binding` of `set` at the first `range` bytes of `buffer`
    fn write_uniform_descriptor(
        &mut self,
        set: DescriptorSetHandle,
        binding: u32,
        buffer: BufferHandle,
        range: u64,
    );

    // Pipelines

    /// Create a pipeline layout from set layouts in set-index order
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[SetLayoutHandle],
    ) -> RenderResult<PipelineLayoutHandle>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);

    /// Create a graphics pipeline
    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> RenderResult<PipelineHandle>;

    /// Destroy a graphics pipeline
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    // Presentation

    /// Query the surface's capabilities
    fn surface_support(&mut self) -> RenderResult<SurfaceSupport>;

    /// Create a swapchain and return it with its images
    fn create_swapchain(
        &mut self,
        desc: &SwapchainDesc,
    ) -> RenderResult<(SwapchainHandle, Vec<ImageHandle>)>;

    /// Destroy a swapchain. Its images go with it.
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);

    /// Create a 2D view of an image
    fn create_image_view(
        &mut self,
        image: ImageHandle,
        format: ImageFormat,
        aspect: ImageAspect,
    ) -> RenderResult<ImageViewHandle>;

    /// Destroy an image view
    fn destroy_image_view(&mut self, view: ImageViewHandle);

    /// Create a device-local depth image with bound memory
    fn create_depth_image(&mut self, extent: Extent2D, format: ImageFormat) -> RenderResult<ImageHandle>;

    /// Destroy a device-allocated image and free its memory
    fn destroy_image(&mut self, image: ImageHandle);

    /// Create a render pass with one colour and one depth attachment
    fn create_render_pass(
        &mut self,
        color_format: ImageFormat,
        depth_format: ImageFormat,
    ) -> RenderResult<RenderPassHandle>;

    /// Destroy a render pass
    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle);

    /// Create a framebuffer
    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> RenderResult<FramebufferHandle>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Acquire the next presentable image, signalling `signal` when it is ready
    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> RenderResult<AcquireOutcome>;

    /// Queue `image_index` for presentation after `wait` signals. Returns
    /// `true` when the swapchain reported itself stale.
    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> RenderResult<bool>;

    // Synchronization and queues

    /// Create a binary semaphore
    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    /// Allocate a primary command buffer for `queue`
    fn create_command_buffer(&mut self, queue: QueueType) -> RenderResult<CommandBufferHandle>;

    /// Free a command buffer
    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle);

    /// Block until the last blocking submission to `queue` has completed
    fn wait_for_queue(&mut self, queue: QueueType) -> RenderResult<()>;

    /// Submit a command buffer
    fn submit_command_buffer(&mut self, info: &SubmitInfo) -> RenderResult<()>;

    /// Block until the device is idle
    fn wait_idle(&mut self) -> RenderResult<()>;

    // Command recording

    /// Reset and begin recording a command buffer
    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()>;

    /// Finish recording a command buffer
    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()>;

    /// Begin a render pass
    fn cmd_begin_render_pass(&mut self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin);

    /// End the current render pass
    fn cmd_end_render_pass(&mut self, command_buffer: CommandBufferHandle);

    /// Set the dynamic cull mode
    fn cmd_set_cull_mode(&mut self, command_buffer: CommandBufferHandle, mode: CullMode);

    /// Set the dynamic viewport
    fn cmd_set_viewport(&mut self, command_buffer: CommandBufferHandle, viewport: &Viewport);

    /// Set the dynamic scissor
    fn cmd_set_scissor(&mut self, command_buffer: CommandBufferHandle, scissor: &Rect2D);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&mut self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle);

    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &mut self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    );

    /// Bind a vertex buffer at binding 0, offset 0
    fn cmd_bind_vertex_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle);

    /// Bind a `u32` index buffer at offset 0
    fn cmd_bind_index_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle);

    /// Draw `index_count` indices, one instance
    fn cmd_draw_indexed(&mut self, command_buffer: CommandBufferHandle, index_count: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles() {
        assert!(BufferHandle::NULL.is_null());
        assert!(BufferHandle::default().is_null());
        assert!(!PipelineHandle(7).is_null());
    }

    #[test]
    fn test_extent_is_empty() {
        assert!(Extent2D::new(0, 600).is_empty());
        assert!(!Extent2D::new(800, 600).is_empty());
    }
}
