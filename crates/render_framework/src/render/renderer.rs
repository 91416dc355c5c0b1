//! Frame engine
//!
//! [`Renderer`] turns a frame's worth of [`Renderer::draw_object`] calls into
//! one command buffer submission and one presentation. It owns the swapchain
//! manager, the pipelines and the mesh table, and runs the per-frame state
//! machine:
//!
//! 1. The first draw after a present waits for the graphics queue, begins the
//!    command buffer, acquires the next image (rebuilding the swapchain once
//!    if it is stale) and begins the render pass.
//! 2. Every draw records only the cull mode, viewport and pipeline changes it
//!    needs, then fills and binds a fresh object uniform set and draws.
//! 3. [`Renderer::present_frame`] ends the pass, submits, presents and hands
//!    every uniform set back to its pool.
//!
//! Exactly one frame is in flight.

use crate::config::RendererConfig;
use crate::foundation::collections::{MeshHandle, ObjectKey};
use crate::foundation::math::{Vec3, Vec4};
use crate::render::api::{
    ClearValues, CommandBufferHandle, Extent2D, QueueType, RenderDevice, SemaphoreHandle, ShaderProvider,
    SubmitInfo, WaitStage,
};
use crate::render::pipeline::{Pipeline, PipelineConfig};
use crate::render::primitives::{Camera, Mesh, MeshTable, WorldObjects};
use crate::render::state::draw_state::{cull_mode_for, viewport_and_scissor};
use crate::render::state::{DrawState, SwapchainManager};
use crate::render::{RenderError, RenderResult};

/// Lit filled triangles
pub const PIPELINE_SHADED: usize = 0;
/// Flat-coloured filled triangles
pub const PIPELINE_UNSHADED: usize = 1;
/// Flat-coloured triangle edges
pub const PIPELINE_WIREFRAME: usize = 2;
/// Flat-coloured line strip
pub const PIPELINE_LINKED_LINES: usize = 3;

/// The frame engine
pub struct Renderer<D: RenderDevice> {
    device: D,
    config: RendererConfig,
    shaders: Box<dyn ShaderProvider>,
    swapchain: SwapchainManager,
    pipelines: Vec<Pipeline>,
    meshes: MeshTable,
    draw_state: DrawState,
    command_buffer: CommandBufferHandle,
    image_available: SemaphoreHandle,
    render_complete: SemaphoreHandle,
    framebuffer_extent: Extent2D,
    needs_rebuild: bool,
    shut_down: bool,
}

impl<D: RenderDevice> std::fmt::Debug for Renderer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("pipelines", &self.pipelines.len())
            .field("meshes", &self.meshes.len())
            .field("draw_state", &self.draw_state)
            .field("framebuffer_extent", &self.framebuffer_extent)
            .finish_non_exhaustive()
    }
}

impl<D: RenderDevice> Renderer<D> {
    /// Create the frame resources, the swapchain and the four default
    /// pipelines ([`PIPELINE_SHADED`], [`PIPELINE_UNSHADED`],
    /// [`PIPELINE_WIREFRAME`], [`PIPELINE_LINKED_LINES`]).
    pub fn new(mut device: D, config: RendererConfig, shaders: impl ShaderProvider + 'static) -> RenderResult<Self> {
        config.validate().map_err(RenderError::InitializationFailed)?;

        let requested = Extent2D::new(config.window.width, config.window.height);
        let clear = ClearValues { color: config.clear_color, depth: config.clear_depth };

        let command_buffer = device.create_command_buffer(QueueType::Graphics)?;
        let semaphores = device.create_semaphore().and_then(|a| match device.create_semaphore() {
            Ok(b) => Ok((a, b)),
            Err(e) => {
                device.destroy_semaphore(a);
                Err(e)
            }
        });
        let (image_available, render_complete) = match semaphores {
            Ok(pair) => pair,
            Err(e) => {
                device.free_command_buffer(command_buffer);
                return Err(e);
            }
        };
        let swapchain = match SwapchainManager::new(&mut device, requested, config.present_mode, clear) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                device.destroy_semaphore(render_complete);
                device.destroy_semaphore(image_available);
                device.free_command_buffer(command_buffer);
                return Err(e);
            }
        };
        let framebuffer_extent = swapchain.extent();

        let mut renderer = Self {
            device,
            config,
            shaders: Box::new(shaders),
            swapchain,
            pipelines: Vec::new(),
            meshes: MeshTable::new(),
            draw_state: DrawState::new(),
            command_buffer,
            image_available,
            render_complete,
            framebuffer_extent,
            needs_rebuild: false,
            shut_down: false,
        };

        // Dropping a half-built renderer releases what exists so far
        for config in [
            PipelineConfig::shaded(),
            PipelineConfig::unshaded(),
            PipelineConfig::wireframe(),
            PipelineConfig::linked_lines(),
        ] {
            renderer.create_pipeline(config)?;
        }
        log::info!(
            "Renderer ready: {}x{}, {} swapchain images",
            framebuffer_extent.width,
            framebuffer_extent.height,
            renderer.swapchain.image_count()
        );
        Ok(renderer)
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The configuration the renderer was created with
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Current swapchain extent
    pub fn extent(&self) -> Extent2D {
        self.swapchain.extent()
    }

    // Pipelines

    /// Build a pipeline and return its id. The first slot left free by
    /// [`Renderer::destroy_pipeline`] is reused.
    pub fn create_pipeline(&mut self, config: PipelineConfig) -> RenderResult<usize> {
        let (id, appended) = match self.pipelines.iter().position(|p| !p.is_ready()) {
            Some(id) => (id, false),
            None => {
                self.pipelines.push(Pipeline::new());
                (self.pipelines.len() - 1, true)
            }
        };

        let render_pass = self.swapchain.render_pass();
        let pool_size = self.config.uniform_pool_size;
        if let Err(e) =
            self.pipelines[id].initialize(&mut self.device, self.shaders.as_ref(), config, render_pass, pool_size)
        {
            if appended {
                self.pipelines.pop();
            }
            return Err(e);
        }

        let lighting = self.config.lighting.clone();
        let pipeline = &self.pipelines[id];
        pipeline.set_light_direction(&mut self.device, Vec3::from(lighting.direction));
        pipeline.set_light_colour(&mut self.device, Vec4::from(lighting.colour));
        pipeline.set_light_intensity(&mut self.device, lighting.intensity);
        pipeline.set_ambient_intensity(&mut self.device, lighting.ambient);
        Ok(id)
    }

    /// Destroy a pipeline, leaving its slot free for reuse
    pub fn destroy_pipeline(&mut self, id: usize) -> RenderResult<()> {
        if !self.draw_state.needs_pass_start() {
            return Err(RenderError::invalid("cannot destroy a pipeline while a frame is being recorded"));
        }
        let pipeline = self.pipelines.get_mut(id).ok_or(RenderError::InvalidPipeline { id })?;
        self.device.wait_idle()?;
        pipeline.cleanup(&mut self.device);
        log::debug!("Destroyed pipeline {id}");
        Ok(())
    }

    /// Borrow a pipeline
    pub fn pipeline(&self, id: usize) -> Option<&Pipeline> {
        self.pipelines.get(id)
    }

    /// Number of pipeline slots, free ones included
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn ready_pipeline(&self, id: usize) -> RenderResult<&Pipeline> {
        let pipeline = self.pipelines.get(id).ok_or(RenderError::InvalidPipeline { id })?;
        if pipeline.is_ready() {
            Ok(pipeline)
        } else {
            Err(RenderError::PipelineNotReady { id })
        }
    }

    // Frame

    /// Record one object drawn with `pipeline_id` as seen by `camera`.
    ///
    /// The first draw after a present starts the frame.
    pub fn draw_object(
        &mut self,
        objects: &WorldObjects,
        key: ObjectKey,
        camera: &mut Camera,
        pipeline_id: usize,
    ) -> RenderResult<()> {
        self.ready_pipeline(pipeline_id)?;
        let object = objects.get(key).ok_or(RenderError::ObjectNotFound)?;
        let mesh_handle = object.mesh().ok_or(RenderError::MeshNotFound)?;
        if !self.meshes.get(mesh_handle)?.is_loaded() {
            return Err(RenderError::MeshNotLoaded);
        }

        if self.draw_state.needs_pass_start() {
            self.start_frame()?;
            self.draw_state.begin_pass();
        }
        let command_buffer = self.command_buffer;

        let cull_mode = cull_mode_for(object.backface_culling());
        if self.draw_state.transition_cull_mode(cull_mode) {
            log::trace!("Cull mode -> {cull_mode:?}");
            self.device.cmd_set_cull_mode(command_buffer, cull_mode);
        }

        let viewport = *camera.viewport();
        if self.draw_state.transition_viewport(viewport) {
            log::trace!("Viewport -> {viewport:?}");
            let (viewport, scissor) = viewport_and_scissor(&viewport);
            self.device.cmd_set_viewport(command_buffer, &viewport);
            self.device.cmd_set_scissor(command_buffer, &scissor);
        }

        let pipeline = &mut self.pipelines[pipeline_id];
        if self.draw_state.transition_pipeline(pipeline_id) {
            log::trace!("Pipeline -> {pipeline_id}");
            if let Some(handle) = pipeline.handle() {
                self.device.cmd_bind_pipeline(command_buffer, handle);
            }
        }

        let world = objects.world_transform(key).ok_or(RenderError::ObjectNotFound)?;
        pipeline.bind_object_uniforms(&mut self.device, command_buffer, object, &world, camera)?;

        self.meshes
            .get(mesh_handle)?
            .record_draw(&mut self.device, command_buffer, object.max_indices())
    }

    fn start_frame(&mut self) -> RenderResult<()> {
        self.device.wait_for_queue(QueueType::Graphics)?;
        if self.needs_rebuild {
            self.rebuild_swapchain()?;
        }
        self.device.begin_command_buffer(self.command_buffer)?;

        if self.swapchain.update_frame_buffer_index(&mut self.device, self.image_available)? {
            log::info!("Swapchain is stale, rebuilding");
            self.rebuild_swapchain()?;
            if self.swapchain.update_frame_buffer_index(&mut self.device, self.image_available)? {
                return Err(RenderError::SwapchainOutOfDate);
            }
        }

        let begin = self.swapchain.render_pass_begin();
        self.device.cmd_begin_render_pass(self.command_buffer, &begin);
        Ok(())
    }

    fn rebuild_swapchain(&mut self) -> RenderResult<()> {
        self.swapchain.update_swapchain(&mut self.device, self.framebuffer_extent)?;
        self.needs_rebuild = false;
        Ok(())
    }

    /// Submit and present the recorded frame. Does nothing when no draw was
    /// recorded since the last present.
    ///
    /// The frame is closed and every uniform set released even when
    /// submission or presentation fails.
    pub fn present_frame(&mut self) -> RenderResult<()> {
        if self.draw_state.needs_pass_start() {
            return Ok(());
        }

        let result = self.submit_and_present();
        for pipeline in &mut self.pipelines {
            pipeline.end_render_pass();
        }
        self.draw_state.end_pass();
        result
    }

    fn submit_and_present(&mut self) -> RenderResult<()> {
        self.device.cmd_end_render_pass(self.command_buffer);
        if let Err(e) = self.submit() {
            self.replace_image_available();
            return Err(e);
        }

        let stale = self
            .device
            .present(self.swapchain.swapchain(), self.swapchain.image_index(), self.render_complete)?;
        if stale {
            log::warn!("Presented to a stale swapchain, rebuilding next frame");
            self.needs_rebuild = true;
        }
        Ok(())
    }

    fn submit(&mut self) -> RenderResult<()> {
        self.device.end_command_buffer(self.command_buffer)?;
        self.device.submit_command_buffer(&SubmitInfo {
            queue: QueueType::Graphics,
            command_buffer: self.command_buffer,
            wait_semaphore: Some(self.image_available),
            wait_stage: WaitStage::ColorAttachmentOutput,
            signal_semaphore: Some(self.render_complete),
            block: true,
        })
    }

    // The acquire signalled image_available and no submission consumed it.
    // A signalled semaphore cannot be handed to the next acquire.
    fn replace_image_available(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle after a failed submission: {e}");
        }
        match self.device.create_semaphore() {
            Ok(semaphore) => {
                self.device.destroy_semaphore(self.image_available);
                self.image_available = semaphore;
            }
            Err(e) => log::error!("Could not replace the image-available semaphore: {e}"),
        }
    }

    /// Record a new framebuffer size. The swapchain is rebuilt at the start of
    /// the next frame.
    pub fn notify_resized(&mut self, extent: Extent2D) {
        log::debug!("Framebuffer resized to {}x{}", extent.width, extent.height);
        self.framebuffer_extent = extent;
        self.needs_rebuild = true;
    }

    // Lighting

    /// Set the light direction of one pipeline
    pub fn set_light_direction_for(&mut self, pipeline_id: usize, direction: Vec3) -> RenderResult<()> {
        self.ready_pipeline(pipeline_id)?;
        self.pipelines[pipeline_id].set_light_direction(&mut self.device, direction);
        Ok(())
    }

    /// Set the light colour of one pipeline
    pub fn set_light_colour_for(&mut self, pipeline_id: usize, colour: Vec4) -> RenderResult<()> {
        self.ready_pipeline(pipeline_id)?;
        self.pipelines[pipeline_id].set_light_colour(&mut self.device, colour);
        Ok(())
    }

    /// Set the light intensity of one pipeline
    pub fn set_light_intensity_for(&mut self, pipeline_id: usize, intensity: f32) -> RenderResult<()> {
        self.ready_pipeline(pipeline_id)?;
        self.pipelines[pipeline_id].set_light_intensity(&mut self.device, intensity);
        Ok(())
    }

    /// Set the ambient intensity of one pipeline
    pub fn set_ambient_intensity_for(&mut self, pipeline_id: usize, intensity: f32) -> RenderResult<()> {
        self.ready_pipeline(pipeline_id)?;
        self.pipelines[pipeline_id].set_ambient_intensity(&mut self.device, intensity);
        Ok(())
    }

    /// Set the light direction of every pipeline
    pub fn set_light_direction(&mut self, direction: Vec3) {
        for pipeline in &self.pipelines {
            pipeline.set_light_direction(&mut self.device, direction);
        }
    }

    /// Set the light colour of every pipeline
    pub fn set_light_colour(&mut self, colour: Vec4) {
        for pipeline in &self.pipelines {
            pipeline.set_light_colour(&mut self.device, colour);
        }
    }

    /// Set the light intensity of every pipeline
    pub fn set_light_intensity(&mut self, intensity: f32) {
        for pipeline in &self.pipelines {
            pipeline.set_light_intensity(&mut self.device, intensity);
        }
    }

    /// Set the ambient intensity of every pipeline
    pub fn set_ambient_intensity(&mut self, intensity: f32) {
        for pipeline in &self.pipelines {
            pipeline.set_ambient_intensity(&mut self.device, intensity);
        }
    }

    /// Write `bytes` at `offset` into a pipeline's custom global block
    pub fn set_custom_global_uniform_data(
        &mut self,
        pipeline_id: usize,
        slot: u32,
        bytes: &[u8],
        offset: usize,
    ) -> RenderResult<()> {
        self.ready_pipeline(pipeline_id)?;
        self.pipelines[pipeline_id].set_custom_global_data(&mut self.device, slot, bytes, offset)
    }

    // Meshes

    /// Move a mesh into the renderer
    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshHandle {
        self.meshes.add(mesh)
    }

    /// Share a mesh. Each retain needs a matching release.
    pub fn retain_mesh(&mut self, handle: MeshHandle) -> RenderResult<MeshHandle> {
        self.meshes.retain(handle)
    }

    /// Add an unloaded deep copy of a mesh
    pub fn duplicate_mesh(&mut self, handle: MeshHandle) -> RenderResult<MeshHandle> {
        self.meshes.duplicate(handle)
    }

    /// Drop one reference to a mesh; the last one frees it. Freeing a loaded
    /// mesh waits for the graphics queue and is rejected mid-frame.
    pub fn release_mesh(&mut self, handle: MeshHandle) -> RenderResult<()> {
        let last = self.meshes.ref_count(handle).ok_or(RenderError::MeshNotFound)? == 1;
        if last && self.meshes.get(handle)?.is_loaded() {
            self.prepare_mesh_teardown("release")?;
        }
        self.meshes.release(&mut self.device, handle)
    }

    /// Borrow a mesh
    pub fn mesh(&self, handle: MeshHandle) -> RenderResult<&Mesh> {
        self.meshes.get(handle)
    }

    /// Mutably borrow a mesh's CPU data
    pub fn mesh_mut(&mut self, handle: MeshHandle) -> RenderResult<&mut Mesh> {
        self.meshes.get_mut(handle)
    }

    /// Upload a mesh
    pub fn load_mesh(&mut self, handle: MeshHandle, dynamic: bool) -> RenderResult<()> {
        self.meshes.get_mut(handle)?.load(&mut self.device, dynamic)
    }

    /// Release a mesh's device buffers
    pub fn unload_mesh(&mut self, handle: MeshHandle) -> RenderResult<()> {
        if self.meshes.get(handle)?.is_loaded() {
            self.prepare_mesh_teardown("unload")?;
        }
        self.meshes.get_mut(handle)?.unload(&mut self.device)
    }

    /// Upload a mesh again, unloading it first if needed
    pub fn reload_mesh(&mut self, handle: MeshHandle, dynamic: bool) -> RenderResult<()> {
        if self.meshes.get(handle)?.is_loaded() {
            self.prepare_mesh_teardown("reload")?;
        }
        self.meshes.get_mut(handle)?.reload(&mut self.device, dynamic)
    }

    // Mesh buffers may be bound in the frame being recorded or read by the
    // frame still on the queue
    fn prepare_mesh_teardown(&mut self, action: &str) -> RenderResult<()> {
        if !self.draw_state.needs_pass_start() {
            return Err(RenderError::invalid(format!("cannot {action} a mesh while a frame is being recorded")));
        }
        self.device.wait_for_queue(QueueType::Graphics)
    }

    /// Replace one vertex position of a dynamic mesh
    pub fn set_mesh_vertex(&mut self, handle: MeshHandle, index: u32, position: Vec4) -> RenderResult<()> {
        self.meshes.get_mut(handle)?.set_vertex_dynamic(&mut self.device, index, position)
    }

    /// Replace one vertex normal of a dynamic mesh
    pub fn set_mesh_vertex_normal(&mut self, handle: MeshHandle, index: u32, normal: Vec3) -> RenderResult<()> {
        self.meshes.get_mut(handle)?.set_vertex_normal_dynamic(&mut self.device, index, normal)
    }

    /// Replace one index of a dynamic mesh
    pub fn set_mesh_index(&mut self, handle: MeshHandle, index: u32, vertex: u32) -> RenderResult<()> {
        self.meshes.get_mut(handle)?.set_index_dynamic(&mut self.device, index, vertex)
    }

    /// Replace one vertex's custom attribute of a dynamic mesh
    pub fn set_mesh_custom_vertex_data(
        &mut self,
        handle: MeshHandle,
        vertex: u32,
        slot: u32,
        bytes: &[u8],
    ) -> RenderResult<()> {
        self.meshes
            .get_mut(handle)?
            .set_custom_vertex_data_dynamic(&mut self.device, vertex, slot, bytes)
    }

    // Teardown

    /// Wait for the device, then destroy pipelines, meshes, the swapchain and
    /// the frame resources. Also run on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before shutdown: {e}");
        }
        for pipeline in &mut self.pipelines {
            pipeline.cleanup(&mut self.device);
        }
        self.meshes.clear(&mut self.device);
        self.swapchain.destroy(&mut self.device);
        self.device.destroy_semaphore(self.render_complete);
        self.device.destroy_semaphore(self.image_available);
        self.device.free_command_buffer(self.command_buffer);
        log::info!("Renderer shut down");
    }
}

impl<D: RenderDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
