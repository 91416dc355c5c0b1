//! GPU buffers and memory type selection

use ash::{vk, Device};

use super::{VulkanError, VulkanResult};
use crate::render::api::{BufferUsage, MemoryLocation};

/// Index of the first memory type allowed by `type_filter` that has every
/// flag in `properties`
pub fn find_memory_type(
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Vulkan usage flags for a buffer usage
pub fn usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

/// Memory property flags for a memory location
pub fn memory_flags(location: MemoryLocation) -> vk::MemoryPropertyFlags {
    match location {
        MemoryLocation::HostVisible => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
    }
}

/// Buffer with its own memory allocation. Host-visible buffers stay mapped
/// for their whole life.
#[derive(Debug)]
pub struct GpuBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: u64,
    mapped: Option<*mut u8>,
}

impl GpuBuffer {
    /// Create, allocate, bind and (for host-visible memory) map a buffer
    pub fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> VulkanResult<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage_flags(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type = match find_memory_type(requirements.memory_type_bits, memory_flags(location), memory_properties) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(result) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(match VulkanError::from(result) {
                    VulkanError::OutOfMemory { .. } => VulkanError::OutOfMemory { requested: requirements.size as usize },
                    other => other,
                });
            }
        };

        let bound = unsafe { device.bind_buffer_memory(buffer, memory, 0) }.and_then(|_| match location {
            MemoryLocation::HostVisible => unsafe {
                device
                    .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                    .map(|ptr| Some(ptr.cast::<u8>()))
            },
            MemoryLocation::DeviceLocal => Ok(None),
        });
        match bound {
            Ok(mapped) => Ok(Self { buffer, memory, size, mapped }),
            Err(result) => {
                unsafe {
                    device.free_memory(memory, None);
                    device.destroy_buffer(buffer, None);
                }
                Err(result.into())
            }
        }
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes as requested at creation
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Mapped bytes, `None` for device-local buffers
    pub fn mapped_mut(&mut self) -> Option<&mut [u8]> {
        // The mapping covers `size` bytes and lives until `destroy`
        self.mapped
            .map(|ptr| unsafe { std::slice::from_raw_parts_mut(ptr, self.size as usize) })
    }

    /// Unmap, destroy and free
    pub fn destroy(self, device: &Device) {
        unsafe {
            if self.mapped.is_some() {
                device.unmap_memory(self.memory);
            }
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = *flags;
        }
        properties
    }

    #[test]
    fn test_find_memory_type_respects_filter() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(0b111, host, &properties).unwrap(), 1);
        assert_eq!(find_memory_type(0b100, host, &properties).unwrap(), 2);
        assert_eq!(
            find_memory_type(0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL, &properties).unwrap(),
            0
        );
    }

    #[test]
    fn test_find_memory_type_none_suitable() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(matches!(
            find_memory_type(0b1, vk::MemoryPropertyFlags::HOST_VISIBLE, &properties),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_usage_flags() {
        let flags = usage_flags(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST);
        assert_eq!(flags, vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST);
        assert_eq!(usage_flags(BufferUsage::UNIFORM), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }
}
