// GpuDevice for VulkanDevice
//
// Object creation delegates to the helpers next door; per-frame recording,
// submission and sync live here.

use anyhow::{Context, Result};
use ash::vk;

use super::{buffer, pipeline, swapchain, VulkanDevice};
use crate::gpu::{AcquireOutcome, GpuDevice, HostBuffer, PassBegin, PresentOutcome, SwapchainDesc};
use crate::pipeline::{LineDraw, LinePipelineDesc};

impl GpuDevice for VulkanDevice {
    fn line_width_range(&self) -> Option<[f32; 2]> {
        self.wide_lines
            .then_some(self.properties.limits.line_width_range)
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Surface queries
    // ─────────────────────────────────────────────────────────────────────────

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .context("Failed to query surface capabilities")
    }

    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .context("Failed to query surface formats")
    }

    fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .context("Failed to query present modes")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    fn create_command_pool(&mut self) -> Result<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.queue_family);

        unsafe { self.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &mut self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronization
    // ─────────────────────────────────────────────────────────────────────────

    fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create semaphore")
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);

        unsafe { self.device.create_fence(&fence_info, None) }.context("Failed to create fence")
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed to wait for fence")
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.context("Failed to reset fence")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Render pass and pipeline
    // ─────────────────────────────────────────────────────────────────────────

    fn create_render_pass(&mut self, format: vk::Format) -> Result<vk::RenderPass> {
        pipeline::create_render_pass(self, format)
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_pipeline_layout(&mut self, push_constant_bytes: u32) -> Result<vk::PipelineLayout> {
        pipeline::create_pipeline_layout(self, push_constant_bytes)
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_line_pipeline(&mut self, desc: &LinePipelineDesc) -> Result<vk::Pipeline> {
        pipeline::create_line_pipeline(self, desc)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Swapchain and per-image objects
    // ─────────────────────────────────────────────────────────────────────────

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        swapchain::create_swapchain(self, desc)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        swapchain::create_image_view(self, image, format)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        pipeline::create_framebuffer(self, render_pass, view, extent)
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memory
    // ─────────────────────────────────────────────────────────────────────────

    fn create_host_buffer(&mut self, size: u64) -> Result<HostBuffer> {
        buffer::create_host_buffer(self, size)
    }

    fn destroy_host_buffer(&mut self, buffer: &HostBuffer) {
        buffer::destroy_host_buffer(self, buffer)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Per-frame work
    // ─────────────────────────────────────────────────────────────────────────

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        swapchain::acquire_next_image(self, swapchain, signal)
    }

    fn begin_render_pass(&mut self, cmd: vk::CommandBuffer, begin: &PassBegin) -> Result<()> {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: begin.clear_color,
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: begin.extent,
        };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: begin.extent.width as f32,
            height: begin.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            self.device
                .cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
        Ok(())
    }

    fn draw_lines(&mut self, cmd: vk::CommandBuffer, draw: &LineDraw) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
            self.device.cmd_set_line_width(cmd, draw.line_width);
            self.device.cmd_push_constants(
                cmd,
                draw.layout,
                vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&draw.color),
            );
            self.device
                .cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
            self.device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
        }
    }

    fn end_render_pass(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.device.cmd_end_render_pass(cmd);
            self.device
                .end_command_buffer(cmd)
                .context("Failed to end command buffer")
        }
    }

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], fence)
        }
        .context("Failed to submit command buffer")
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        swapchain::present(self, swapchain, image_index, wait)
    }
}
