//! Swapchain and framebuffer management
//!
//! Owns the presentable images, their views, the shared depth attachment,
//! the render pass and one framebuffer per image. On resize everything but
//! the render pass is rebuilt.

use crate::config::PresentModePreference;
use crate::render::api::{
    AcquireOutcome, ClearValues, Extent2D, FramebufferHandle, ImageAspect, ImageFormat, ImageHandle,
    ImageViewHandle, PresentMode, RenderDevice, RenderPassBegin, RenderPassHandle, SemaphoreHandle,
    SurfaceSupport, SwapchainDesc, SwapchainHandle,
};
use crate::render::{RenderError, RenderResult};

/// Colour format of the swapchain images
pub const COLOR_FORMAT: ImageFormat = ImageFormat::B8G8R8A8Srgb;

/// Format of the depth attachment
pub const DEPTH_FORMAT: ImageFormat = ImageFormat::D32Sfloat;

/// Pick the present mode: mailbox when preferred and supported, else FIFO
pub fn choose_present_mode(support: &SurfaceSupport, preference: PresentModePreference) -> PresentMode {
    if preference == PresentModePreference::Mailbox && support.present_modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

/// One more than the surface minimum, capped by the maximum when there is one
pub fn choose_image_count(support: &SurfaceSupport) -> u32 {
    let count = support.min_image_count + 1;
    if support.max_image_count > 0 {
        count.min(support.max_image_count)
    } else {
        count
    }
}

fn choose_extent(support: &SurfaceSupport, requested: Extent2D) -> Extent2D {
    // u32::MAX means the surface size follows the swapchain
    if support.current_extent.width == u32::MAX || support.current_extent.is_empty() {
        requested
    } else {
        support.current_extent
    }
}

#[derive(Debug, Default)]
struct Chain {
    swapchain: SwapchainHandle,
    image_views: Vec<ImageViewHandle>,
    depth_image: ImageHandle,
    depth_view: ImageViewHandle,
    framebuffers: Vec<FramebufferHandle>,
}

impl Chain {
    fn destroy(&mut self, device: &mut dyn RenderDevice) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        device.destroy_image_view(self.depth_view);
        device.destroy_image(self.depth_image);
        for view in self.image_views.drain(..) {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.swapchain);
        *self = Self::default();
    }
}

/// Swapchain, depth buffer, render pass and framebuffers
#[derive(Debug)]
pub struct SwapchainManager {
    chain: Chain,
    render_pass: RenderPassHandle,
    extent: Extent2D,
    present_mode: PresentMode,
    preference: PresentModePreference,
    clear: ClearValues,
    image_index: u32,
}

impl SwapchainManager {
    /// Create the image chain, depth attachment, render pass and framebuffers,
    /// in that order
    pub fn new(
        device: &mut dyn RenderDevice,
        extent: Extent2D,
        preference: PresentModePreference,
        clear: ClearValues,
    ) -> RenderResult<Self> {
        let mut manager = Self {
            chain: Chain::default(),
            render_pass: RenderPassHandle::NULL,
            extent,
            present_mode: PresentMode::Fifo,
            preference,
            clear,
            image_index: 0,
        };

        if let Err(e) = manager.create_chain(device, extent, true) {
            manager.destroy(device);
            return Err(e);
        }
        Ok(manager)
    }

    fn create_chain(&mut self, device: &mut dyn RenderDevice, requested: Extent2D, with_render_pass: bool) -> RenderResult<()> {
        let support = device.surface_support()?;
        if !support.formats.contains(&COLOR_FORMAT) {
            log::warn!("Surface does not list {COLOR_FORMAT:?}, requesting it anyway");
        }
        let extent = choose_extent(&support, requested);
        if extent.is_empty() {
            return Err(RenderError::invalid("cannot build a swapchain with an empty extent"));
        }
        let present_mode = choose_present_mode(&support, self.preference);
        let image_count = choose_image_count(&support);

        let (swapchain, images) = device.create_swapchain(&SwapchainDesc {
            image_count,
            format: COLOR_FORMAT,
            present_mode,
            extent,
        })?;
        self.chain.swapchain = swapchain;
        self.extent = extent;
        self.present_mode = present_mode;
        log::debug!("Swapchain created with {} images ({present_mode:?})", images.len());

        for image in images {
            let view = device.create_image_view(image, COLOR_FORMAT, ImageAspect::Color)?;
            self.chain.image_views.push(view);
        }

        self.chain.depth_image = device.create_depth_image(extent, DEPTH_FORMAT)?;
        self.chain.depth_view = device.create_image_view(self.chain.depth_image, DEPTH_FORMAT, ImageAspect::Depth)?;

        if with_render_pass {
            self.render_pass = device.create_render_pass(COLOR_FORMAT, DEPTH_FORMAT)?;
        }

        for i in 0..self.chain.image_views.len() {
            let attachments = [self.chain.image_views[i], self.chain.depth_view];
            let framebuffer = device.create_framebuffer(self.render_pass, &attachments, extent)?;
            self.chain.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Rebuild the swapchain, depth attachment and framebuffers for a new
    /// extent. The render pass is kept.
    pub fn update_swapchain(&mut self, device: &mut dyn RenderDevice, extent: Extent2D) -> RenderResult<()> {
        device.wait_idle()?;
        self.chain.destroy(device);
        self.create_chain(device, extent, false)?;
        log::info!("Swapchain rebuilt at {}x{}", self.extent.width, self.extent.height);
        Ok(())
    }

    /// Acquire the next image. Returns `true` when the swapchain is stale and
    /// must be rebuilt before it can be used.
    pub fn update_frame_buffer_index(&mut self, device: &mut dyn RenderDevice, signal: SemaphoreHandle) -> RenderResult<bool> {
        match device.acquire_next_image(self.chain.swapchain, signal)? {
            AcquireOutcome::Acquired(index) => {
                self.image_index = index;
                Ok(false)
            }
            AcquireOutcome::OutOfDate => Ok(true),
        }
    }

    /// Begin parameters for rendering into the current image
    pub fn render_pass_begin(&self) -> RenderPassBegin {
        RenderPassBegin {
            render_pass: self.render_pass,
            framebuffer: self.framebuffer(),
            extent: self.extent,
            clear: self.clear,
        }
    }

    /// Framebuffer of the current image
    pub fn framebuffer(&self) -> FramebufferHandle {
        self.chain.framebuffers.get(self.image_index as usize).copied().unwrap_or_default()
    }

    /// Render pass every pipeline is created against
    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Swapchain handle
    pub fn swapchain(&self) -> SwapchainHandle {
        self.chain.swapchain
    }

    /// Index of the last acquired image
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.chain.image_views.len()
    }

    /// Current image extent
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Chosen present mode
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    /// Destroy every owned object, render pass included
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        self.chain.destroy(device);
        device.destroy_render_pass(self.render_pass);
        self.render_pass = RenderPassHandle::NULL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::RecordingDevice;

    const CLEAR: ClearValues = ClearValues { color: [0.0, 0.0, 0.0, 1.0], depth: 1.0 };

    fn support(min: u32, max: u32, modes: Vec<PresentMode>) -> SurfaceSupport {
        SurfaceSupport {
            min_image_count: min,
            max_image_count: max,
            present_modes: modes,
            formats: vec![COLOR_FORMAT],
            current_extent: Extent2D::new(640, 480),
        }
    }

    #[test]
    fn test_image_count_capped() {
        assert_eq!(choose_image_count(&support(2, 8, vec![])), 3);
        assert_eq!(choose_image_count(&support(3, 3, vec![])), 3);
        assert_eq!(choose_image_count(&support(2, 0, vec![])), 3);
    }

    #[test]
    fn test_present_mode_choice() {
        let both = support(2, 8, vec![PresentMode::Fifo, PresentMode::Mailbox]);
        let fifo_only = support(2, 8, vec![PresentMode::Fifo]);
        assert_eq!(choose_present_mode(&both, PresentModePreference::Mailbox), PresentMode::Mailbox);
        assert_eq!(choose_present_mode(&both, PresentModePreference::Fifo), PresentMode::Fifo);
        assert_eq!(choose_present_mode(&fifo_only, PresentModePreference::Mailbox), PresentMode::Fifo);
    }

    #[test]
    fn test_new_builds_one_framebuffer_per_image() {
        let mut device = RecordingDevice::default();
        let manager = SwapchainManager::new(&mut device, Extent2D::new(800, 600), PresentModePreference::Mailbox, CLEAR).unwrap();
        assert_eq!(manager.image_count(), 3);
        assert_eq!(manager.extent(), Extent2D::new(800, 600));
        assert_eq!(manager.present_mode(), PresentMode::Mailbox);
        assert!(!manager.render_pass().is_null());
        assert!(!manager.framebuffer().is_null());
    }

    #[test]
    fn test_update_swapchain_keeps_render_pass() {
        let mut device = RecordingDevice::default();
        let mut manager = SwapchainManager::new(&mut device, Extent2D::new(800, 600), PresentModePreference::Mailbox, CLEAR).unwrap();
        let render_pass = manager.render_pass();
        let live = device.live_object_count();

        device.set_surface_extent(Extent2D::new(1024, 768));
        manager.update_swapchain(&mut device, Extent2D::new(1024, 768)).unwrap();

        assert_eq!(manager.render_pass(), render_pass);
        assert_eq!(manager.extent(), Extent2D::new(1024, 768));
        assert_eq!(device.swapchains_created(), 2);
        assert_eq!(device.live_object_count(), live);
    }

    #[test]
    fn test_stale_acquire_reports_rebuild() {
        let mut device = RecordingDevice::default();
        let mut manager = SwapchainManager::new(&mut device, Extent2D::new(800, 600), PresentModePreference::Fifo, CLEAR).unwrap();

        device.fail_next_acquires(1);
        assert!(manager.update_frame_buffer_index(&mut device, SemaphoreHandle::NULL).unwrap());
        assert!(!manager.update_frame_buffer_index(&mut device, SemaphoreHandle::NULL).unwrap());
        assert_eq!(manager.image_index(), 0);
        assert!(!manager.update_frame_buffer_index(&mut device, SemaphoreHandle::NULL).unwrap());
        assert_eq!(manager.image_index(), 1);
        assert_eq!(manager.render_pass_begin().framebuffer, manager.framebuffer());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut device = RecordingDevice::default();
        let mut manager = SwapchainManager::new(&mut device, Extent2D::new(800, 600), PresentModePreference::Mailbox, CLEAR).unwrap();
        manager.destroy(&mut device);
        assert_eq!(device.live_object_count(), 0);
    }
}
