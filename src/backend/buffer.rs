// Host-visible vertex buffers
//
// buffer -> memory requirements -> memory type -> allocate -> bind -> map.
// The mapping stays in place until the buffer is destroyed.

use anyhow::{Context, Result};
use ash::vk;
use std::ptr::NonNull;

use super::VulkanDevice;
use crate::gpu::HostBuffer;

pub fn create_host_buffer(device: &VulkanDevice, size: vk::DeviceSize) -> Result<HostBuffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
        .context("Failed to create buffer")?;

    match allocate_and_map(device, buffer) {
        Ok((memory, mapped)) => Ok(HostBuffer {
            buffer,
            memory,
            mapped,
            size,
        }),
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            Err(e)
        }
    }
}

fn allocate_and_map(
    device: &VulkanDevice,
    buffer: vk::Buffer,
) -> Result<(vk::DeviceMemory, NonNull<u8>)> {
    let mem_requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let memory_type_index = find_memory_type(
        &device.memory_properties,
        mem_requirements.memory_type_bits,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
        .context("Failed to allocate buffer memory")?;

    let mapped = unsafe {
        device
            .device
            .bind_buffer_memory(buffer, memory, 0)
            .context("Failed to bind buffer memory")
            .and_then(|()| {
                device
                    .device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .context("Failed to map buffer memory")
            })
            .and_then(|ptr| NonNull::new(ptr.cast::<u8>()).context("Driver mapped a null pointer"))
    };

    match mapped {
        Ok(mapped) => Ok((memory, mapped)),
        Err(e) => {
            unsafe { device.device.free_memory(memory, None) };
            Err(e)
        }
    }
}

pub fn destroy_host_buffer(device: &VulkanDevice, buffer: &HostBuffer) {
    unsafe {
        device.device.unmap_memory(buffer.memory);
        device.device.destroy_buffer(buffer.buffer, None);
        device.device.free_memory(buffer.memory, None);
    }
}

/// First memory type allowed by `type_filter` with all of `properties`
fn find_memory_type(
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..mem_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && mem_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .context("No host-visible, host-coherent memory type")
}
