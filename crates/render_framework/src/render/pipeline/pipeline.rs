//! Compiled graphics pipeline
//!
//! A [`Pipeline`] turns a [`PipelineConfig`] into device objects: the two
//! descriptor set layouts, the pipeline layout, the pipeline itself and a
//! [`UniformBufferAllocator`] sized for its uniform layout. During a frame it
//! fills one object uniform set per draw and binds it next to the shared
//! global set.
//!
//! # State machine
//! `Uninitialized -> Ready -> Uninitialized`. A failed [`Pipeline::initialize`]
//! releases whatever it had created and leaves the pipeline uninitialized, so
//! the same value can be initialized again.

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::render::api::{
    CommandBufferHandle, GraphicsPipelineDesc, PipelineHandle, PipelineLayoutHandle, RenderDevice,
    RenderPassHandle, SetLayoutHandle, ShaderProvider,
};
use crate::render::primitives::{Camera, WorldObject};
use crate::render::resources::{GlobalBlock, ObjectBlock, UniformBufferAllocator};
use crate::render::{RenderError, RenderResult};

use super::layout::{global_set_bindings, object_set_bindings, rasterization, InterleavedLayout};
use super::pipeline_config::PipelineConfig;
use super::uniform_schema::{dir_light, material, write_f32s, write_mat4, TransformBlockLayout};

/// Turn a short uniform write into an error instead of a silently stale block
fn ensure_written(written: bool, block: &str) -> RenderResult<()> {
    if written {
        Ok(())
    } else {
        Err(RenderError::invalid(format!("{block} uniform block is smaller than its layout")))
    }
}

#[derive(Debug)]
struct PipelineObjects {
    object_set_layout: SetLayoutHandle,
    global_set_layout: SetLayoutHandle,
    layout: PipelineLayoutHandle,
    pipeline: PipelineHandle,
    allocator: UniformBufferAllocator,
}

/// A graphics pipeline with its uniform sets
#[derive(Debug, Default)]
pub struct Pipeline {
    config: PipelineConfig,
    vertex_layout: Option<InterleavedLayout>,
    transform_layout: TransformBlockLayout,
    objects: Option<PipelineObjects>,
}

impl Pipeline {
    /// An uninitialized pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every device object for `config`.
    ///
    /// # Arguments
    /// * `device` - Device the objects are created on
    /// * `shaders` - Provider for the configured shader binaries
    /// * `config` - What the pipeline draws and which uniforms it feeds
    /// * `render_pass` - Render pass the pipeline draws in
    /// * `pool_size` - Uniform sets per allocator pool
    pub fn initialize(
        &mut self,
        device: &mut dyn RenderDevice,
        shaders: &dyn ShaderProvider,
        config: PipelineConfig,
        render_pass: RenderPassHandle,
        pool_size: u32,
    ) -> RenderResult<()> {
        if self.is_ready() {
            return Err(RenderError::invalid("pipeline is already initialized"));
        }
        config.validate()?;

        let vertex_layout = InterleavedLayout::new(&config.effective_vert_layout());
        let uniform_layout = &config.uniform_layout;

        let object_set_layout = device.create_descriptor_set_layout(&object_set_bindings(&uniform_layout.object))?;
        let global_set_layout = match device.create_descriptor_set_layout(&global_set_bindings(&uniform_layout.global)) {
            Ok(layout) => layout,
            Err(e) => {
                device.destroy_descriptor_set_layout(object_set_layout);
                return Err(e);
            }
        };

        let mut layout = PipelineLayoutHandle::NULL;
        let mut pipeline = PipelineHandle::NULL;
        let result = (|| -> RenderResult<UniformBufferAllocator> {
            layout = device.create_pipeline_layout(&[object_set_layout, global_set_layout])?;

            let vertex_shader = shaders.load(config.shaders.vertex())?;
            let fragment_shader = shaders.load(config.shaders.fragment())?;
            let vertex_input = vertex_layout.vertex_input();
            let (topology, polygon_mode) = rasterization(config.primitive_type);
            pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
                vertex_shader: &vertex_shader,
                fragment_shader: &fragment_shader,
                vertex_input: &vertex_input,
                topology,
                polygon_mode,
                alpha_blend: config.alpha_blend,
                layout,
                render_pass,
            })?;

            UniformBufferAllocator::new(device, uniform_layout, object_set_layout, global_set_layout, pool_size)
        })();

        match result {
            Ok(allocator) => {
                log::info!(
                    "Created {:?} pipeline (vertex stride {}, {} custom object blocks, {} custom global blocks)",
                    config.primitive_type,
                    vertex_layout.stride,
                    uniform_layout.object.custom.len(),
                    uniform_layout.global.custom.len()
                );
                self.transform_layout = TransformBlockLayout::new(&uniform_layout.object);
                self.vertex_layout = Some(vertex_layout);
                self.objects = Some(PipelineObjects {
                    object_set_layout,
                    global_set_layout,
                    layout,
                    pipeline,
                    allocator,
                });
                self.config = config;
                Ok(())
            }
            Err(e) => {
                log::warn!("Pipeline initialization failed: {e}");
                device.destroy_pipeline(pipeline);
                device.destroy_pipeline_layout(layout);
                device.destroy_descriptor_set_layout(global_set_layout);
                device.destroy_descriptor_set_layout(object_set_layout);
                Err(e)
            }
        }
    }

    /// Whether the pipeline can record draws
    pub fn is_ready(&self) -> bool {
        self.objects.is_some()
    }

    /// Configuration of the last successful initialization
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Vertex layout meshes must match
    pub fn vertex_layout(&self) -> Option<&InterleavedLayout> {
        self.vertex_layout.as_ref()
    }

    /// Pipeline object
    pub fn handle(&self) -> Option<PipelineHandle> {
        self.objects.as_ref().map(|o| o.pipeline)
    }

    /// Pipeline layout
    pub fn layout(&self) -> Option<PipelineLayoutHandle> {
        self.objects.as_ref().map(|o| o.layout)
    }

    /// Uniform allocator
    pub fn allocator(&self) -> Option<&UniformBufferAllocator> {
        self.objects.as_ref().map(|o| &o.allocator)
    }

    fn write_dir_light(&self, device: &mut dyn RenderDevice, offset: usize, values: &[f32]) {
        if !self.config.uniform_layout.global.use_directional_light {
            return;
        }
        let Some(objects) = &self.objects else {
            return;
        };
        if let Some(block) = objects.allocator.global_buffer(device, GlobalBlock::DirectionalLight) {
            write_f32s(block, offset, values);
        }
    }

    /// Set the light direction. It is stored normalized.
    pub fn set_light_direction(&self, device: &mut dyn RenderDevice, direction: Vec3) {
        let direction = direction.try_normalize(f32::EPSILON).unwrap_or(direction);
        self.write_dir_light(device, dir_light::DIRECTION, direction.as_slice());
    }

    /// Set the light colour
    pub fn set_light_colour(&self, device: &mut dyn RenderDevice, colour: Vec4) {
        self.write_dir_light(device, dir_light::COLOUR, colour.as_slice());
    }

    /// Set the light intensity
    pub fn set_light_intensity(&self, device: &mut dyn RenderDevice, intensity: f32) {
        self.write_dir_light(device, dir_light::INTENSITY, &[intensity]);
    }

    /// Set the ambient light intensity
    pub fn set_ambient_intensity(&self, device: &mut dyn RenderDevice, intensity: f32) {
        self.write_dir_light(device, dir_light::AMBIENT, &[intensity]);
    }

    /// Write `bytes` at `offset` into the custom global block at `slot`
    pub fn set_custom_global_data(
        &self,
        device: &mut dyn RenderDevice,
        slot: u32,
        bytes: &[u8],
        offset: usize,
    ) -> RenderResult<()> {
        let objects = self.objects.as_ref().ok_or_else(|| RenderError::invalid("pipeline is not initialized"))?;
        let block = objects
            .allocator
            .global_buffer(device, GlobalBlock::Custom(slot))
            .ok_or_else(|| RenderError::invalid(format!("no custom global block at slot {slot}")))?;
        let target = block.get_mut(offset..offset + bytes.len()).ok_or_else(|| {
            RenderError::invalid(format!("{} bytes at offset {offset} overflow the block at slot {slot}", bytes.len()))
        })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Allocate an object uniform set, fill it for `object` and bind it.
    ///
    /// `world` is the object's world transform, its parent frames included.
    pub fn bind_object_uniforms(
        &mut self,
        device: &mut dyn RenderDevice,
        command_buffer: CommandBufferHandle,
        object: &WorldObject,
        world: &Mat4,
        camera: &mut Camera,
    ) -> RenderResult<()> {
        let transform = self.transform_layout;
        let inputs = &self.config.uniform_layout.object;
        let objects = self.objects.as_mut().ok_or_else(|| RenderError::invalid("pipeline is not initialized"))?;
        let id = objects.allocator.allocate(device)?;
        let allocator = &objects.allocator;

        if transform.size > 0 {
            let world_to_cam = *camera.world_to_camera();
            let cam_to_screen = *camera.camera_to_screen();
            if let Some(block) = allocator.object_buffer(device, id, ObjectBlock::Transform) {
                if let Some(offset) = transform.obj_to_world {
                    ensure_written(write_mat4(block, offset, world), "transform")?;
                }
                if let Some(offset) = transform.world_to_cam {
                    ensure_written(write_mat4(block, offset, &world_to_cam), "transform")?;
                }
                if let Some(offset) = transform.cam_to_screen {
                    ensure_written(write_mat4(block, offset, &cam_to_screen), "transform")?;
                }
                if let Some(offset) = transform.obj_to_screen {
                    let obj_to_screen = cam_to_screen * world_to_cam * world;
                    ensure_written(write_mat4(block, offset, &obj_to_screen), "transform")?;
                }
                if let Some(offset) = transform.scale {
                    ensure_written(write_f32s(block, offset, object.scale().as_slice()), "transform")?;
                }
            }
        }

        if inputs.use_material {
            if let Some(block) = allocator.object_buffer(device, id, ObjectBlock::Material) {
                let m = object.material();
                ensure_written(write_f32s(block, material::COLOUR, m.colour.as_slice()), "material")?;
                ensure_written(
                    write_f32s(block, material::DIFFUSE, &[m.diffuse, m.specular, m.shininess]),
                    "material",
                )?;
            }
        }

        if inputs.use_cam_transform {
            if let Some(block) = allocator.object_buffer(device, id, ObjectBlock::Camera) {
                ensure_written(write_mat4(block, 0, camera.transform()), "camera")?;
            }
        }

        for custom in &inputs.custom {
            let size = custom.size as usize;
            let Some(data) = object.custom_data(custom.bind_slot).filter(|d| d.len() >= size) else {
                continue;
            };
            if let Some(block) = allocator.object_buffer(device, id, ObjectBlock::Custom(custom.bind_slot)) {
                block.copy_from_slice(&data[..size]);
            }
        }

        allocator.bind(device, command_buffer, objects.layout, id)
    }

    /// Return every object uniform set to the pool. Called once per presented
    /// frame.
    pub fn end_render_pass(&mut self) {
        if let Some(objects) = &mut self.objects {
            objects.allocator.free_all();
        }
    }

    /// Destroy every device object and return to the uninitialized state
    pub fn cleanup(&mut self, device: &mut dyn RenderDevice) {
        if let Some(mut objects) = self.objects.take() {
            objects.allocator.destroy(device);
            device.destroy_pipeline(objects.pipeline);
            device.destroy_pipeline_layout(objects.layout);
            device.destroy_descriptor_set_layout(objects.global_set_layout);
            device.destroy_descriptor_set_layout(objects.object_set_layout);
        }
        self.vertex_layout = None;
        self.transform_layout = TransformBlockLayout::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{PolygonMode, PrimitiveTopology};
    use crate::render::backends::headless::{RecordedCommand, RecordingDevice, StubShaderProvider};
    use crate::render::pipeline::pipeline_config::{CustomUniformInput, PrimitiveType, StageUse};
    use crate::render::pipeline::uniform_schema::read_f32;
    use crate::render::primitives::{ProjectionMode, ViewPort};
    use approx::assert_relative_eq;

    fn ready(device: &mut RecordingDevice, config: PipelineConfig) -> Pipeline {
        let render_pass = device.create_render_pass(
            crate::render::api::ImageFormat::B8G8R8A8Srgb,
            crate::render::api::ImageFormat::D32Sfloat,
        ).unwrap();
        let mut pipeline = Pipeline::new();
        pipeline.initialize(device, &StubShaderProvider, config, render_pass, 4).unwrap();
        pipeline
    }

    fn dir_light_block(device: &mut RecordingDevice, pipeline: &Pipeline) -> Vec<u8> {
        pipeline
            .allocator()
            .unwrap()
            .global_buffer(device, GlobalBlock::DirectionalLight)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_initialize_builds_layouts_and_pipeline() {
        let mut device = RecordingDevice::default();
        let pipeline = ready(&mut device, PipelineConfig::wireframe());
        assert!(pipeline.is_ready());

        let recorded = &device.pipelines()[0];
        assert_eq!(recorded.topology, PrimitiveTopology::TriangleList);
        assert_eq!(recorded.polygon_mode, PolygonMode::Line);
        assert!(recorded.alpha_blend);
        assert_eq!(recorded.vertex_input.stride, 28);
        assert_eq!(Some(recorded.layout), pipeline.layout());
    }

    #[test]
    fn test_failed_initialize_can_retry() {
        let mut device = RecordingDevice::default();
        let render_pass = device.create_render_pass(
            crate::render::api::ImageFormat::B8G8R8A8Srgb,
            crate::render::api::ImageFormat::D32Sfloat,
        ).unwrap();
        let baseline = device.live_object_count();

        let mut pipeline = Pipeline::new();
        device.set_fail_pipeline_creation(true);
        assert!(pipeline
            .initialize(&mut device, &StubShaderProvider, PipelineConfig::shaded(), render_pass, 4)
            .is_err());
        assert!(!pipeline.is_ready());
        assert_eq!(device.live_object_count(), baseline);

        device.set_fail_pipeline_creation(false);
        pipeline
            .initialize(&mut device, &StubShaderProvider, PipelineConfig::shaded(), render_pass, 4)
            .unwrap();
        assert!(pipeline.is_ready());
        assert!(pipeline
            .initialize(&mut device, &StubShaderProvider, PipelineConfig::shaded(), render_pass, 4)
            .is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut device = RecordingDevice::default();
        let mut config = PipelineConfig::shaded();
        config.uniform_layout.object.cam_bind_slot = 0;
        let mut pipeline = Pipeline::new();
        assert!(pipeline
            .initialize(&mut device, &StubShaderProvider, config, RenderPassHandle(1), 4)
            .is_err());
        assert!(!pipeline.is_ready());
    }

    #[test]
    fn test_light_setters_write_fixed_offsets() {
        let mut device = RecordingDevice::default();
        let pipeline = ready(&mut device, PipelineConfig::shaded());

        pipeline.set_light_colour(&mut device, Vec4::new(0.1, 0.2, 0.3, 0.4));
        pipeline.set_light_direction(&mut device, Vec3::new(0.0, 3.0, 4.0));
        pipeline.set_light_intensity(&mut device, 2.5);
        pipeline.set_ambient_intensity(&mut device, 0.25);

        let block = dir_light_block(&mut device, &pipeline);
        assert_eq!(read_f32(&block, 0), Some(0.1));
        assert_eq!(read_f32(&block, 12), Some(0.4));
        assert_relative_eq!(read_f32(&block, 16).unwrap(), 0.0);
        assert_relative_eq!(read_f32(&block, 20).unwrap(), 0.6);
        assert_relative_eq!(read_f32(&block, 24).unwrap(), 0.8);
        assert_eq!(read_f32(&block, 28), Some(2.5));
        assert_eq!(read_f32(&block, 32), Some(0.25));
    }

    #[test]
    fn test_light_setters_without_block_are_noops() {
        let mut device = RecordingDevice::default();
        let mut config = PipelineConfig::shaded();
        config.uniform_layout.global.use_directional_light = false;
        let pipeline = ready(&mut device, config);

        pipeline.set_light_intensity(&mut device, 3.0);
        assert!(pipeline.allocator().unwrap().global_buffer(&mut device, GlobalBlock::DirectionalLight).is_none());
    }

    #[test]
    fn test_object_uniforms_in_fixed_order() {
        let mut device = RecordingDevice::default();
        let mut config = PipelineConfig::shaded();
        config.uniform_layout.object.use_world_to_cam = true;
        let mut pipeline = ready(&mut device, config);

        let mut camera = Camera::new(ViewPort::new(800.0, 600.0), ProjectionMode::Perspective);
        camera.set_position(Vec3::new(0.0, 0.0, -20.0));
        let mut object = WorldObject::new();
        object.set_position(Vec3::new(1.0, 2.0, 3.0));
        object.set_scale(2.0, 2.0, 2.0);
        object.material_mut().colour = Vec4::new(1.0, 0.5, 0.25, 1.0);
        let world = *object.local_transform();

        pipeline.bind_object_uniforms(&mut device, CommandBufferHandle(1), &object, &world, &mut camera).unwrap();

        let allocator = pipeline.allocator().unwrap();
        let transform = allocator.object_buffer(&mut device, 0, ObjectBlock::Transform).unwrap().to_vec();
        // obj->world, world->cam, obj->screen, scale
        assert_eq!(transform.len(), 64 * 3 + 16);
        assert_eq!(read_f32(&transform, 12 * 4), Some(1.0));
        assert_eq!(read_f32(&transform, 64 + 14 * 4), Some(20.0));
        let expected = *camera.camera_to_screen() * *camera.world_to_camera() * world;
        assert_relative_eq!(read_f32(&transform, 128).unwrap(), expected[(0, 0)]);
        assert_eq!(read_f32(&transform, 192), Some(2.0));
        assert_eq!(read_f32(&transform, 204), Some(1.0));

        let material = allocator.object_buffer(&mut device, 0, ObjectBlock::Material).unwrap().to_vec();
        assert_eq!(read_f32(&material, 4), Some(0.5));
        assert_eq!(read_f32(&material, 16), Some(0.8));
        assert_eq!(read_f32(&material, 20), Some(1.8));
        assert_eq!(read_f32(&material, 24), Some(50.0));

        let cam = allocator.object_buffer(&mut device, 0, ObjectBlock::Camera).unwrap().to_vec();
        assert_eq!(read_f32(&cam, 14 * 4), Some(-20.0));

        assert!(matches!(
            device.commands().last(),
            Some(RecordedCommand::BindDescriptorSets { first_set: 0, .. })
        ));
    }

    #[test]
    fn test_custom_object_block_needs_full_blob() {
        let mut device = RecordingDevice::default();
        let mut config = PipelineConfig::unshaded();
        config.uniform_layout.object.custom.push(CustomUniformInput { stages: StageUse::VERTEX, size: 8, bind_slot: 4 });
        let mut pipeline = ready(&mut device, config);
        let mut camera = Camera::default();
        let world = Mat4::identity();

        let mut object = WorldObject::new();
        object.set_custom_uniform_data(4, &[1, 2, 3, 4], 0);
        pipeline.bind_object_uniforms(&mut device, CommandBufferHandle(1), &object, &world, &mut camera).unwrap();
        let block = pipeline.allocator().unwrap().object_buffer(&mut device, 0, ObjectBlock::Custom(4)).unwrap().to_vec();
        assert_eq!(block, vec![0; 8]);

        object.set_custom_uniform_data(4, &[5, 6, 7, 8], 4);
        pipeline.bind_object_uniforms(&mut device, CommandBufferHandle(1), &object, &world, &mut camera).unwrap();
        let block = pipeline.allocator().unwrap().object_buffer(&mut device, 1, ObjectBlock::Custom(4)).unwrap().to_vec();
        assert_eq!(block, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_custom_global_data_bounds() {
        let mut device = RecordingDevice::default();
        let mut config = PipelineConfig::shaded().with_primitive_type(PrimitiveType::UnlinkedLines);
        config.uniform_layout.global.custom.push(CustomUniformInput { stages: StageUse::FRAGMENT, size: 16, bind_slot: 1 });
        let pipeline = ready(&mut device, config);

        pipeline.set_custom_global_data(&mut device, 1, &[9, 9, 9, 9], 12).unwrap();
        assert!(pipeline.set_custom_global_data(&mut device, 1, &[9, 9], 15).is_err());
        assert!(pipeline.set_custom_global_data(&mut device, 2, &[9], 0).is_err());

        let block = pipeline.allocator().unwrap().global_buffer(&mut device, GlobalBlock::Custom(1)).unwrap();
        assert_eq!(&block[12..], &[9, 9, 9, 9]);
        assert_eq!(&block[..12], &[0; 12]);
    }

    #[test]
    fn test_end_render_pass_frees_sets_and_cleanup_resets() {
        let mut device = RecordingDevice::default();
        let mut pipeline = ready(&mut device, PipelineConfig::shaded());
        let mut camera = Camera::default();
        let object = WorldObject::new();
        let world = Mat4::identity();
        for _ in 0..6 {
            pipeline.bind_object_uniforms(&mut device, CommandBufferHandle(1), &object, &world, &mut camera).unwrap();
        }
        assert_eq!(pipeline.allocator().unwrap().pool_count(), 2);

        pipeline.end_render_pass();
        let allocator = pipeline.allocator().unwrap();
        assert_eq!(allocator.available_count(), allocator.capacity());

        pipeline.cleanup(&mut device);
        assert!(!pipeline.is_ready());
        assert_eq!(device.live_buffer_count(), 0);
        assert!(pipeline
            .bind_object_uniforms(&mut device, CommandBufferHandle(1), &object, &world, &mut camera)
            .is_err());
    }

    #[test]
    fn test_short_uniform_block_is_an_error() {
        let mut short = [0u8; 32];
        let err = ensure_written(write_mat4(&mut short, 0, &Mat4::identity()), "transform").unwrap_err();
        assert!(matches!(err, RenderError::InvalidOperation { .. }));

        let mut block = [0u8; 32];
        assert!(ensure_written(write_f32s(&mut block, material::DIFFUSE, &[0.8, 1.8, 50.0]), "material").is_ok());
    }
}
