// The GPU device interface the core is written against.
//
// GpuBackend opens a device bound to a window (instance, surface, adapter,
// logical device and queue); the returned GpuDevice creates and destroys
// every other object the renderer needs and records/submits its commands.
// Dropping a `GpuDevice` releases the objects `open` created.
//
// Handles are plain `ash::vk` handles so the Vulkan backend passes them
// through untouched and test backends can mint fake ones.

use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::pipeline::{LineDraw, LinePipelineDesc};

/// The window the presentation surface is created for.
#[derive(Debug, Clone, Copy)]
pub struct WindowTarget {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

/// What a backend needs to open a device.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub app_name: String,
    pub window: WindowTarget,
    pub validation: bool,
}

pub trait GpuBackend {
    type Device: GpuDevice;

    /// Create instance, surface, adapter, logical device and queue. On error
    /// nothing created along the way survives.
    fn open(&self, desc: &DeviceDesc) -> Result<Self::Device>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// An image was acquired but the swapchain no longer matches the surface.
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[derive(Debug, Clone, Copy)]
pub struct PassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// A host-visible, host-coherent buffer that stays mapped for its lifetime.
#[derive(Debug)]
pub struct HostBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub mapped: NonNull<u8>,
    pub size: u64,
}

// SAFETY: the mapping is owned by exactly one HostBuffer and only written
// through `&mut` access to its owner.
unsafe impl Send for HostBuffer {}

pub trait GpuDevice {
    /// `[min, max]` supported line width, `None` without wide-line support.
    fn line_width_range(&self) -> Option<[f32; 2]>;

    fn wait_idle(&self) -> Result<()>;

    // Surface queries
    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>>;

    // Commands
    fn create_command_pool(&mut self) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&mut self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    // Synchronization
    fn create_semaphore(&mut self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    // Render pass and pipeline
    fn create_render_pass(&mut self, format: vk::Format) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    fn create_pipeline_layout(&mut self, push_constant_bytes: u32) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);
    fn create_line_pipeline(&mut self, desc: &LinePipelineDesc) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    // Swapchain and per-image objects
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);
    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    // Memory
    fn create_host_buffer(&mut self, size: u64) -> Result<HostBuffer>;
    fn destroy_host_buffer(&mut self, buffer: &HostBuffer);

    // Per-frame work
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome>;
    /// Begin `cmd`, begin the render pass and set viewport/scissor to the extent.
    fn begin_render_pass(&mut self, cmd: vk::CommandBuffer, begin: &PassBegin) -> Result<()>;
    fn draw_lines(&mut self, cmd: vk::CommandBuffer, draw: &LineDraw);
    /// End the render pass and the command buffer.
    fn end_render_pass(&mut self, cmd: vk::CommandBuffer) -> Result<()>;
    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()>;
    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome>;
}

pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub fn same_extent(a: vk::Extent2D, b: vk::Extent2D) -> bool {
    a.width == b.width && a.height == b.height
}
