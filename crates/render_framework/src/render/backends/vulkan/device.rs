//! [`RenderDevice`] on Vulkan
//!
//! Handles handed to the engine are the raw Vulkan handles. Buffers and depth
//! images carry memory the device has to free, so those are also kept in
//! lookup tables keyed by their raw handle.

use std::collections::HashMap;
use std::ffi::CStr;
use std::io::Cursor;

use ash::vk::{self, Handle};

use super::buffer::GpuBuffer;
use super::context::VulkanContext;
use super::sync::create_semaphore;
use super::{VulkanError, VulkanResult};
use crate::render::api::*;
use crate::render::RenderResult;

const SHADER_ENTRY: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

fn image_format(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        ImageFormat::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        ImageFormat::D32Sfloat => vk::Format::D32_SFLOAT,
    }
}

fn surface_format(format: vk::Format) -> Option<ImageFormat> {
    match format {
        vk::Format::B8G8R8A8_SRGB => Some(ImageFormat::B8G8R8A8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(ImageFormat::B8G8R8A8Unorm),
        _ => None,
    }
}

fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::R32Uint => vk::Format::R32_UINT,
        VertexFormat::R32G32Uint => vk::Format::R32G32_UINT,
        VertexFormat::R32G32B32Uint => vk::Format::R32G32B32_UINT,
        VertexFormat::R32G32B32A32Uint => vk::Format::R32G32B32A32_UINT,
        VertexFormat::R32Sint => vk::Format::R32_SINT,
        VertexFormat::R32G32Sint => vk::Format::R32G32_SINT,
        VertexFormat::R32G32B32Sint => vk::Format::R32G32B32_SINT,
        VertexFormat::R32G32B32A32Sint => vk::Format::R32G32B32A32_SINT,
        VertexFormat::R32Sfloat => vk::Format::R32_SFLOAT,
        VertexFormat::R32G32Sfloat => vk::Format::R32G32_SFLOAT,
        VertexFormat::R32G32B32Sfloat => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::R64Sfloat => vk::Format::R64_SFLOAT,
        VertexFormat::R64G64Sfloat => vk::Format::R64G64_SFLOAT,
        VertexFormat::R64G64B64Sfloat => vk::Format::R64G64B64_SFLOAT,
        VertexFormat::R64G64B64A64Sfloat => vk::Format::R64G64B64A64_SFLOAT,
    }
}

fn present_mode_to_vk(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

fn present_mode_from_vk(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    flags
}

fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
    }
}

fn cull_flags(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

fn extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D { width: extent.width, height: extent.height }
}

fn raw<H: Handle>(handle: u64) -> H {
    H::from_raw(handle)
}

/// Vulkan implementation of [`RenderDevice`]
pub struct VulkanDevice {
    buffers: HashMap<u64, GpuBuffer>,
    depth_memory: HashMap<u64, vk::DeviceMemory>,
    context: VulkanContext,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("gpu", &self.context.physical_device().name())
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

impl VulkanDevice {
    /// Wrap an initialized context
    pub fn new(context: VulkanContext) -> Self {
        Self { buffers: HashMap::new(), depth_memory: HashMap::new(), context }
    }

    /// The underlying context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    fn device(&self) -> &ash::Device {
        self.context.device()
    }

    fn buffer(&self, buffer: BufferHandle) -> VulkanResult<&GpuBuffer> {
        self.buffers
            .get(&buffer.0)
            .ok_or(VulkanError::UnknownHandle { kind: "buffer", handle: buffer.0 })
    }

    fn submit(&self, info: &SubmitInfo) -> VulkanResult<()> {
        let device = self.device();
        let fence = self.context.fence(info.queue);

        let wait_semaphores: Vec<vk::Semaphore> = info.wait_semaphore.iter().map(|s| raw(s.0)).collect();
        let wait_stage = match info.wait_stage {
            WaitStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            WaitStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
        };
        let wait_stages = vec![wait_stage; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = info.signal_semaphore.iter().map(|s| raw(s.0)).collect();
        let command_buffers = [raw::<vk::CommandBuffer>(info.command_buffer.0)];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let submit_fence = if info.block {
            if !fence.is_signalled(device)? {
                fence.wait(device)?;
            }
            fence.reset(device)?;
            fence.handle()
        } else {
            vk::Fence::null()
        };

        unsafe { device.queue_submit(self.context.queue(info.queue), &[submit_info], submit_fence)? };
        Ok(())
    }

    fn copy(&self, src: BufferHandle, dst: BufferHandle, size: u64) -> VulkanResult<()> {
        let src = self.buffer(src)?.handle();
        let dst = self.buffer(dst)?.handle();
        let device = self.device();
        let command_buffer = self.context.upload_command_buffer();

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(command_buffer, &begin_info)?;
            device.cmd_copy_buffer(command_buffer, src, dst, &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size }]);
            device.end_command_buffer(command_buffer)?;
        }

        self.submit(&SubmitInfo {
            queue: QueueType::Graphics,
            command_buffer: CommandBufferHandle(command_buffer.as_raw()),
            wait_semaphore: None,
            wait_stage: WaitStage::TopOfPipe,
            signal_semaphore: None,
            block: true,
        })?;
        self.context.fence(QueueType::Graphics).wait(device)
    }

    fn build_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> VulkanResult<vk::Pipeline> {
        let device = self.device();
        let vertex = self.shader_module(desc.vertex_shader)?;
        let fragment = match self.shader_module(desc.fragment_shader) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(SHADER_ENTRY)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(SHADER_ENTRY)
                .build(),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_input.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_input
            .attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: 0,
                format: vertex_format(attribute.format),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(topology(desc.topology))
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(match desc.polygon_mode {
                PolygonMode::Fill => vk::PolygonMode::FILL,
                PolygonMode::Line => vk::PolygonMode::LINE,
            })
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(desc.alpha_blend)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR, vk::DynamicState::CULL_MODE];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(raw(desc.layout.0))
            .render_pass(raw(desc.render_pass.0))
            .subpass(0)
            .build();

        let result = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None) };
        unsafe {
            device.destroy_shader_module(vertex, None);
            device.destroy_shader_module(fragment, None);
        }
        match result {
            Ok(pipelines) => Ok(pipelines[0]),
            Err((_, result)) => Err(result.into()),
        }
    }

    fn shader_module(&self, bytes: &[u8]) -> VulkanResult<vk::ShaderModule> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| VulkanError::InvalidShader(e.to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        Ok(unsafe { self.device().create_shader_module(&create_info, None)? })
    }

    fn build_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let surface = self.context.surface();
        let capabilities = unsafe {
            self.context
                .surface_loader()
                .get_physical_device_surface_capabilities(self.context.physical_device().device, surface)?
        };

        let physical = self.context.physical_device();
        let families = [physical.graphics_family, physical.present_family];
        let (sharing_mode, family_indices): (vk::SharingMode, &[u32]) = if physical.graphics_family != physical.present_family {
            (vk::SharingMode::CONCURRENT, &families)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(desc.image_count)
            .image_format(image_format(desc.format))
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent(desc.extent))
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode_to_vk(desc.present_mode))
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let loader = self.context.swapchain_loader();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => Ok((swapchain, images)),
            Err(result) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                Err(result.into())
            }
        }
    }

    fn build_depth_image(&self, size: Extent2D, format: ImageFormat) -> VulkanResult<(vk::Image, vk::DeviceMemory)> {
        let device = self.device();
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width: size.width, height: size.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(image_format(format))
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { device.create_image(&create_info, None)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocated = super::buffer::find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &self.context.physical_device().memory_properties,
        )
        .and_then(|memory_type| {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            Ok(unsafe { device.allocate_memory(&alloc_info, None)? })
        });
        let memory = match allocated {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(result) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(result.into());
        }
        Ok((image, memory))
    }

    fn build_render_pass(&self, color: ImageFormat, depth: ImageFormat) -> VulkanResult<vk::RenderPass> {
        let attachments = [
            vk::AttachmentDescription::builder()
                .format(image_format(color))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .build(),
            vk::AttachmentDescription::builder()
                .format(image_format(depth))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];

        let color_refs = [vk::AttachmentReference { attachment: 0, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL }];
        let depth_ref = vk::AttachmentReference { attachment: 1, layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        Ok(unsafe { self.device().create_render_pass(&create_info, None)? })
    }
}

impl RenderDevice for VulkanDevice {
    fn create_buffer(&mut self, size: u64, usage: BufferUsage, location: MemoryLocation) -> RenderResult<BufferHandle> {
        let buffer = GpuBuffer::new(
            self.context.device(),
            &self.context.physical_device().memory_properties,
            size,
            usage,
            location,
        )?;
        let handle = buffer.handle().as_raw();
        self.buffers.insert(handle, buffer);
        Ok(BufferHandle(handle))
    }

    fn mapped_memory(&mut self, buffer: BufferHandle) -> Option<&mut [u8]> {
        self.buffers.get_mut(&buffer.0)?.mapped_mut()
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()> {
        Ok(self.copy(src, dst, size)?)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(&buffer.0) {
            buffer.destroy(self.context.device());
        }
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> RenderResult<SetLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(shader_stages(binding.stages))
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { self.device().create_descriptor_set_layout(&create_info, None) }.map_err(VulkanError::from)?;
        Ok(SetLayoutHandle(layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: SetLayoutHandle) {
        if !layout.is_null() {
            unsafe { self.device().destroy_descriptor_set_layout(raw(layout.0), None) };
        }
    }

    fn create_descriptor_pool(&mut self, uniform_descriptors: u32, max_sets: u32) -> RenderResult<DescriptorPoolHandle> {
        // A pool may not be created empty, even for a set layout with no bindings
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: uniform_descriptors.max(1),
        }];
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets.max(1));
        let pool = unsafe { self.device().create_descriptor_pool(&create_info, None) }.map_err(VulkanError::from)?;
        Ok(DescriptorPoolHandle(pool.as_raw()))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        if !pool.is_null() {
            unsafe { self.device().destroy_descriptor_pool(raw(pool.0), None) };
        }
    }

    fn allocate_descriptor_set(&mut self, pool: DescriptorPoolHandle, layout: SetLayoutHandle) -> RenderResult<DescriptorSetHandle> {
        let layouts = [raw::<vk::DescriptorSetLayout>(layout.0)];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(raw(pool.0))
            .set_layouts(&layouts);
        let sets = unsafe { self.device().allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::from)?;
        Ok(DescriptorSetHandle(sets[0].as_raw()))
    }

    fn write_uniform_descriptor(&mut self, set: DescriptorSetHandle, binding: u32, buffer: BufferHandle, range: u64) {
        let buffer_info = [vk::DescriptorBufferInfo { buffer: raw(buffer.0), offset: 0, range }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(raw(set.0))
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe { self.device().update_descriptor_sets(&[write], &[]) };
    }

    fn create_pipeline_layout(&mut self, set_layouts: &[SetLayoutHandle]) -> RenderResult<PipelineLayoutHandle> {
        let layouts: Vec<vk::DescriptorSetLayout> = set_layouts.iter().map(|layout| raw(layout.0)).collect();
        let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&layouts);
        let layout = unsafe { self.device().create_pipeline_layout(&create_info, None) }.map_err(VulkanError::from)?;
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        if !layout.is_null() {
            unsafe { self.device().destroy_pipeline_layout(raw(layout.0), None) };
        }
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc<'_>) -> RenderResult<PipelineHandle> {
        let pipeline = self.build_pipeline(desc)?;
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if !pipeline.is_null() {
            unsafe { self.device().destroy_pipeline(raw(pipeline.0), None) };
        }
    }

    fn surface_support(&mut self) -> RenderResult<SurfaceSupport> {
        let loader = self.context.surface_loader();
        let physical_device = self.context.physical_device().device;
        let surface = self.context.surface();

        let (capabilities, modes, formats) = unsafe {
            (
                loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(VulkanError::from)?,
                loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(VulkanError::from)?,
                loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(VulkanError::from)?,
            )
        };

        Ok(SurfaceSupport {
            min_image_count: capabilities.min_image_count,
            max_image_count: capabilities.max_image_count,
            present_modes: modes.into_iter().filter_map(present_mode_from_vk).collect(),
            formats: formats
                .into_iter()
                .filter(|format| format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                .filter_map(|format| surface_format(format.format))
                .collect(),
            current_extent: Extent2D::new(capabilities.current_extent.width, capabilities.current_extent.height),
        })
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> RenderResult<(SwapchainHandle, Vec<ImageHandle>)> {
        let (swapchain, images) = self.build_swapchain(desc)?;
        Ok((
            SwapchainHandle(swapchain.as_raw()),
            images.into_iter().map(|image| ImageHandle(image.as_raw())).collect(),
        ))
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        if !swapchain.is_null() {
            unsafe { self.context.swapchain_loader().destroy_swapchain(raw(swapchain.0), None) };
        }
    }

    fn create_image_view(&mut self, image: ImageHandle, format: ImageFormat, aspect: ImageAspect) -> RenderResult<ImageViewHandle> {
        let aspect_mask = match aspect {
            ImageAspect::Color => vk::ImageAspectFlags::COLOR,
            ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
        };
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(raw(image.0))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image_format(format))
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device().create_image_view(&create_info, None) }.map_err(VulkanError::from)?;
        Ok(ImageViewHandle(view.as_raw()))
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        if !view.is_null() {
            unsafe { self.device().destroy_image_view(raw(view.0), None) };
        }
    }

    fn create_depth_image(&mut self, size: Extent2D, format: ImageFormat) -> RenderResult<ImageHandle> {
        let (image, memory) = self.build_depth_image(size, format)?;
        let handle = image.as_raw();
        self.depth_memory.insert(handle, memory);
        Ok(ImageHandle(handle))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        // Swapchain images are not in the table and go with their swapchain
        if let Some(memory) = self.depth_memory.remove(&image.0) {
            unsafe {
                self.device().destroy_image(raw(image.0), None);
                self.device().free_memory(memory, None);
            }
        }
    }

    fn create_render_pass(&mut self, color_format: ImageFormat, depth_format: ImageFormat) -> RenderResult<RenderPassHandle> {
        let render_pass = self.build_render_pass(color_format, depth_format)?;
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        if !render_pass.is_null() {
            unsafe { self.device().destroy_render_pass(raw(render_pass.0), None) };
        }
    }

    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        size: Extent2D,
    ) -> RenderResult<FramebufferHandle> {
        let views: Vec<vk::ImageView> = attachments.iter().map(|view| raw(view.0)).collect();
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(raw(render_pass.0))
            .attachments(&views)
            .width(size.width)
            .height(size.height)
            .layers(1);
        let framebuffer = unsafe { self.device().create_framebuffer(&create_info, None) }.map_err(VulkanError::from)?;
        Ok(FramebufferHandle(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if !framebuffer.is_null() {
            unsafe { self.device().destroy_framebuffer(raw(framebuffer.0), None) };
        }
    }

    fn acquire_next_image(&mut self, swapchain: SwapchainHandle, signal: SemaphoreHandle) -> RenderResult<AcquireOutcome> {
        let result = unsafe {
            self.context
                .swapchain_loader()
                .acquire_next_image(raw(swapchain.0), u64::MAX, raw(signal.0), vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Acquired image {index} from a suboptimal swapchain");
                }
                Ok(AcquireOutcome::Acquired(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(VulkanError::from(result).into()),
        }
    }

    fn present(&mut self, swapchain: SwapchainHandle, image_index: u32, wait: SemaphoreHandle) -> RenderResult<bool> {
        let wait_semaphores = [raw::<vk::Semaphore>(wait.0)];
        let swapchains = [raw::<vk::SwapchainKHR>(swapchain.0)];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe {
            self.context
                .swapchain_loader()
                .queue_present(self.context.queue(QueueType::Present), &present_info)
        };
        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(result) => Err(VulkanError::from(result).into()),
        }
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        let semaphore = create_semaphore(self.device())?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if !semaphore.is_null() {
            unsafe { self.device().destroy_semaphore(raw(semaphore.0), None) };
        }
    }

    fn create_command_buffer(&mut self, _queue: QueueType) -> RenderResult<CommandBufferHandle> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.context.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device().allocate_command_buffers(&alloc_info) }.map_err(VulkanError::from)?;
        Ok(CommandBufferHandle(buffers[0].as_raw()))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        if !command_buffer.is_null() {
            unsafe {
                self.device()
                    .free_command_buffers(self.context.command_pool(), &[raw(command_buffer.0)])
            };
        }
    }

    fn wait_for_queue(&mut self, queue: QueueType) -> RenderResult<()> {
        Ok(self.context.fence(queue).wait(self.device())?)
    }

    fn submit_command_buffer(&mut self, info: &SubmitInfo) -> RenderResult<()> {
        Ok(self.submit(info)?)
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        unsafe { self.device().device_wait_idle() }.map_err(VulkanError::from)?;
        Ok(())
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        let command_buffer = raw::<vk::CommandBuffer>(command_buffer.0);
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device()
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .and_then(|_| self.device().begin_command_buffer(command_buffer, &begin_info))
        }
        .map_err(VulkanError::from)?;
        Ok(())
    }

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        unsafe { self.device().end_command_buffer(raw(command_buffer.0)) }.map_err(VulkanError::from)?;
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: begin.clear.color } },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: begin.clear.depth, stencil: 0 },
            },
        ];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(raw(begin.render_pass.0))
            .framebuffer(raw(begin.framebuffer.0))
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: extent(begin.extent) })
            .clear_values(&clear_values);
        unsafe {
            self.device()
                .cmd_begin_render_pass(raw(command_buffer.0), &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&mut self, command_buffer: CommandBufferHandle) {
        unsafe { self.device().cmd_end_render_pass(raw(command_buffer.0)) };
    }

    fn cmd_set_cull_mode(&mut self, command_buffer: CommandBufferHandle, mode: CullMode) {
        unsafe { self.device().cmd_set_cull_mode(raw(command_buffer.0), cull_flags(mode)) };
    }

    fn cmd_set_viewport(&mut self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        let viewports = [vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        unsafe { self.device().cmd_set_viewport(raw(command_buffer.0), 0, &viewports) };
    }

    fn cmd_set_scissor(&mut self, command_buffer: CommandBufferHandle, scissor: &Rect2D) {
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: scissor.x, y: scissor.y },
            extent: extent(scissor.extent),
        }];
        unsafe { self.device().cmd_set_scissor(raw(command_buffer.0), 0, &scissors) };
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(raw(command_buffer.0), vk::PipelineBindPoint::GRAPHICS, raw(pipeline.0))
        };
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        let sets: Vec<vk::DescriptorSet> = sets.iter().map(|set| raw(set.0)).collect();
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                raw(command_buffer.0),
                vk::PipelineBindPoint::GRAPHICS,
                raw(layout.0),
                first_set,
                &sets,
                &[],
            )
        };
    }

    fn cmd_bind_vertex_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(raw(command_buffer.0), 0, &[raw(buffer.0)], &[0])
        };
    }

    fn cmd_bind_index_buffer(&mut self, command_buffer: CommandBufferHandle, buffer: BufferHandle) {
        unsafe {
            self.device()
                .cmd_bind_index_buffer(raw(command_buffer.0), raw(buffer.0), 0, vk::IndexType::UINT32)
        };
    }

    fn cmd_draw_indexed(&mut self, command_buffer: CommandBufferHandle, index_count: u32) {
        unsafe { self.device().cmd_draw_indexed(raw(command_buffer.0), index_count, 1, 0, 0, 0) };
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if self.buffers.is_empty() && self.depth_memory.is_empty() {
            return;
        }
        log::warn!(
            "VulkanDevice dropped with {} buffers and {} depth images still alive",
            self.buffers.len(),
            self.depth_memory.len()
        );
        let device = self.context.device();
        unsafe {
            let _ = device.device_wait_idle();
        }
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy(device);
        }
        for (image, memory) in self.depth_memory.drain() {
            unsafe {
                device.destroy_image(raw(image), None);
                device.free_memory(memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_modes_round_trip_known_modes() {
        for mode in [PresentMode::Immediate, PresentMode::Mailbox, PresentMode::Fifo, PresentMode::FifoRelaxed] {
            assert_eq!(present_mode_from_vk(present_mode_to_vk(mode)), Some(mode));
        }
        assert_eq!(present_mode_from_vk(vk::PresentModeKHR::SHARED_DEMAND_REFRESH), None);
    }

    #[test]
    fn test_only_swapchain_formats_come_back_from_the_surface() {
        assert_eq!(surface_format(vk::Format::B8G8R8A8_SRGB), Some(ImageFormat::B8G8R8A8Srgb));
        assert_eq!(surface_format(vk::Format::R8G8B8A8_SRGB), None);
        assert_eq!(image_format(ImageFormat::D32Sfloat), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_stage_and_cull_flags() {
        assert_eq!(
            shader_stages(ShaderStages::VERTEX | ShaderStages::FRAGMENT),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(cull_flags(CullMode::Back), vk::CullModeFlags::BACK);
        assert_eq!(vertex_format(VertexFormat::R32G32B32Sfloat), vk::Format::R32G32B32_SFLOAT);
    }
}
