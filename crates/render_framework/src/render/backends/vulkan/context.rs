//! Vulkan context management
//!
//! Instance, surface, physical device selection, logical device, one fence
//! per queue and the command pool every command buffer comes from.

use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use super::sync::QueueFence;
use super::{VulkanError, VulkanResult};
use crate::render::api::QueueType;
use crate::render::window::Window;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the extensions the window needs, plus the
    /// validation layer and debug messenger when `enable_validation` is set
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("application name contains a nul byte".to_string()))?;
        let engine_name = CString::new("render_framework").unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let required = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}")))?;
        let extension_names: Vec<CString> = required
            .into_iter()
            .filter_map(|name| CString::new(name).ok())
            .collect();
        let mut extensions: Vec<*const c_char> = extension_names.iter().map(|ext| ext.as_ptr()).collect();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names: Vec<CString> = if enable_validation {
            vec![CString::new(VALIDATION_LAYER).unwrap_or_default()]
        } else {
            Vec::new()
        };
        let layers: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self { entry, instance, debug })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        Ok(unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first device with graphics and present queues, the swapchain
    /// extension and Vulkan 1.3
    pub fn select_suitable_device(instance: &Instance, surface: vk::SurfaceKHR, surface_loader: &Surface) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices()? };

        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(e) => log::debug!("Skipping physical device: {e}"),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if vk::api_version_major(properties.api_version) == 1 && vk::api_version_minor(properties.api_version) < 3 {
            return Err(VulkanError::InitializationFailed("Vulkan 1.3 is required".to_string()));
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }
            let present_support = unsafe { surface_loader.get_physical_device_surface_support(device, index, surface)? };
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }
            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }
        let graphics_family = graphics_family
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family = present_family
            .ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed("Swapchain extension not supported".to_string()));
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        Ok(Self { device, properties, memory_properties, graphics_family, present_family })
    }

    /// Device name as reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a logical device with a graphics and a present queue
    pub fn new(instance: &Instance, physical_device: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let unique_families: HashSet<u32> = [physical_device.graphics_family, physical_device.present_family]
            .into_iter()
            .collect();
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder().fill_mode_non_solid(true).build();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device.device, &create_info, None)? };
        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self { device, graphics_queue, present_queue, swapchain_loader })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Everything a [`VulkanDevice`](super::VulkanDevice) needs from the driver
pub struct VulkanContext {
    command_pool: vk::CommandPool,
    upload_command_buffer: vk::CommandBuffer,
    graphics_fence: QueueFence,
    present_fence: QueueFence,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    physical_device: PhysicalDeviceInfo,
    // Dropped after everything above, device before instance
    device: LogicalDevice,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create the instance, a surface for `window`, the devices, the queue
    /// fences and the command pool
    pub fn new(window: &mut Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, enable_validation)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {e}")))?;

        let physical_device = match PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader) {
            Ok(info) => info,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };
        let device = match LogicalDevice::new(&instance.instance, &physical_device) {
            Ok(device) => device,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        // From here on a failure drops `device` before the surface is gone,
        // which the driver tolerates
        let raw = &device.device;
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(physical_device.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { raw.create_command_pool(&pool_info, None)? };
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let upload_command_buffer = unsafe { raw.allocate_command_buffers(&alloc_info)? }[0];

        let graphics_fence = QueueFence::new(raw)?;
        let present_fence = QueueFence::new(raw)?;

        Ok(Self {
            command_pool,
            upload_command_buffer,
            graphics_fence,
            present_fence,
            surface,
            surface_loader,
            physical_device,
            device,
            instance,
        })
    }

    /// The instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// The logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// The window surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Queue handle for `queue`
    pub fn queue(&self, queue: QueueType) -> vk::Queue {
        match queue {
            QueueType::Graphics => self.device.graphics_queue,
            QueueType::Present => self.device.present_queue,
        }
    }

    /// Fence tracking the last submission to `queue`
    pub fn fence(&self, queue: QueueType) -> &QueueFence {
        match queue {
            QueueType::Graphics => &self.graphics_fence,
            QueueType::Present => &self.present_fence,
        }
    }

    /// Pool every command buffer is allocated from
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Command buffer reserved for buffer copies
    pub fn upload_command_buffer(&self) -> vk::CommandBuffer {
        self.upload_command_buffer
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            let _ = device.device_wait_idle();
            self.graphics_fence.destroy(device);
            self.present_fence.destroy(device);
            device.destroy_command_pool(self.command_pool, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
