// Swapchain - Window presentation
//
// Raw swapchain calls. Choosing formats, sizes and when to rebuild is the
// swapchain manager's job; these helpers only talk to the driver.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;
use crate::gpu::{AcquireOutcome, PresentOutcome, SwapchainDesc};

pub fn create_swapchain(device: &VulkanDevice, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
    log::debug!(
        "Creating swapchain: {}x{}, {} images, {:?}",
        desc.extent.width,
        desc.extent.height,
        desc.image_count,
        desc.present_mode
    );

    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(device.surface)
        .min_image_count(desc.image_count)
        .image_format(desc.format.format)
        .image_color_space(desc.format.color_space)
        .image_extent(desc.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(desc.pre_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(desc.present_mode)
        .clipped(true);

    unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
        .context("Failed to create swapchain")
}

pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.device.create_image_view(&create_info, None) }
        .context("Failed to create image view")
}

/// Acquire with an unbounded timeout
pub fn acquire_next_image(
    device: &VulkanDevice,
    swapchain: vk::SwapchainKHR,
    signal: vk::Semaphore,
) -> Result<AcquireOutcome> {
    let result = unsafe {
        device
            .swapchain_loader
            .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
    };

    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(e).context("Failed to acquire swapchain image"),
    }
}

pub fn present(
    device: &VulkanDevice,
    swapchain: vk::SwapchainKHR,
    image_index: u32,
    wait: vk::Semaphore,
) -> Result<PresentOutcome> {
    let swapchains = [swapchain];
    let image_indices = [image_index];
    let wait_semaphores = [wait];

    let present_info = vk::PresentInfoKHR::builder()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);

    let result = unsafe {
        device
            .swapchain_loader
            .queue_present(device.queue, &present_info)
    };

    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(e).context("Failed to present"),
    }
}
