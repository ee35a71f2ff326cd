// Backend module - Vulkan implementation of the GPU device interface
//
// Thin wrapper around ash. The core never sees these types directly; it talks
// to VulkanDevice through the GpuDevice trait.

pub mod buffer;
mod commands;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;

pub use device::{VulkanBackend, VulkanDevice};
