// Per-frame state machine.
//
// `Idle -> Recording -> Submitted -> Idle`, one frame in flight. Transient
// outcomes (zero client area, stale swapchain) skip the frame and leave the
// context in `Idle`, so the caller simply tries again next frame.

use anyhow::Context as _;
use ash::vk;

use crate::context::DeviceContext;
use crate::error::{Error, Result};
use crate::gpu::{is_zero_extent, AcquireOutcome, GpuDevice, PassBegin, PresentOutcome};
use crate::pipeline::{ColorPush, LineDraw};
use crate::staging::PendingDraw;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    /// A render pass into `image_index` is open.
    Recording { image_index: u32 },
    /// Commands for `image_index` are queued; `present` comes next.
    Submitted { image_index: u32 },
}

impl<G: GpuDevice> DeviceContext<G> {
    /// Acquire the next image and open a render pass cleared to `clear_color`.
    pub fn begin_frame(&mut self, clear_color: [f32; 4]) -> Result<()> {
        if self.phase != FramePhase::Idle {
            return Err(Error::Sequence("begin_frame while a frame is in progress"));
        }

        let caps = self.gpu.surface_capabilities()?;
        let extent = self.swapchain.client_extent(&caps);
        if is_zero_extent(extent) {
            return Err(Error::NotReady("client area is zero"));
        }

        if self.needs_rebuild(extent) {
            if let Err(e) = self.recreate(&caps, extent) {
                log::warn!("Swapchain recreation failed, skipping frame: {}", e);
                return Err(Error::NotReady("swapchain unavailable"));
            }
        }

        let Some(state) = self.swapchain.state() else {
            return Err(Error::NotReady("no swapchain"));
        };
        let swapchain = state.swapchain;
        let extent = state.extent;

        self.gpu
            .wait_for_fence(self.sync.in_flight_fence)
            .context("Failed to wait for in-flight fence")?;

        if self.stale_acquire || self.stale_render {
            self.gpu.wait_idle().context("Failed to wait for device idle")?;
            self.recycle_stale_semaphores()?;
        }

        let image_index = match self
            .gpu
            .acquire_next_image(swapchain, self.sync.image_available)
            .context("Failed to acquire swapchain image")?
        {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Suboptimal(_) => {
                // The acquire semaphore is now signaled with no submit to wait on it
                self.stale_acquire = true;
                self.swapchain.mark_stale();
                log::debug!("Acquire suboptimal, skipping frame");
                return Err(Error::OutOfDate);
            }
            AcquireOutcome::OutOfDate => {
                self.swapchain.mark_stale();
                log::debug!("Acquire out of date, skipping frame");
                return Err(Error::OutOfDate);
            }
        };

        if let Err(e) = self.open_pass(image_index, extent, clear_color) {
            self.abandon_frame();
            return Err(e);
        }

        self.staging.reset();
        self.phase = FramePhase::Recording { image_index };
        Ok(())
    }

    fn open_pass(
        &mut self,
        image_index: u32,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Result<()> {
        let (framebuffer, cmd) = self
            .swapchain
            .state()
            .and_then(|s| s.targets(image_index))
            .ok_or_else(|| {
                Error::Internal(format!("acquired image {} out of range", image_index))
            })?;

        // Only now is a submit guaranteed to signal the fence again
        self.gpu
            .reset_fence(self.sync.in_flight_fence)
            .context("Failed to reset in-flight fence")?;

        self.gpu.begin_render_pass(
            cmd,
            &PassBegin {
                render_pass: self.render_pass.handle,
                framebuffer,
                extent,
                clear_color,
            },
        )?;
        Ok(())
    }

    /// Undo an acquired frame that will never be submitted.
    ///
    /// The acquire semaphore stays signaled with nothing waiting on it, and
    /// the fence may already be reset; both are restored so the next
    /// `begin_frame` neither trips over the semaphore nor waits forever.
    fn abandon_frame(&mut self) {
        self.phase = FramePhase::Idle;
        self.stale_acquire = true;
        if let Err(e) = self.sync.rearm_fence(&mut self.gpu) {
            log::error!("Failed to re-arm in-flight fence: {:#}", e);
        }
    }

    /// Stage a line strip for this frame, replacing any earlier one.
    ///
    /// `vertices` holds `components` floats per vertex. Widths are clamped to
    /// what the adapter supports.
    pub fn draw_lines(&mut self, vertices: &[f32], color: [f32; 4], line_width: f32) -> Result<()> {
        let components = self.vertex_layout().components() as usize;
        if vertices.is_empty() || vertices.len() % components != 0 {
            return Err(Error::BadArgs("vertex data is empty or not whole vertices"));
        }
        if !line_width.is_finite() || line_width <= 0.0 {
            return Err(Error::BadArgs("line width must be positive"));
        }
        if !matches!(self.phase, FramePhase::Recording { .. }) {
            return Err(Error::NotReady("no frame is recording"));
        }

        let draw = PendingDraw {
            vertex_count: (vertices.len() / components) as u32,
            color,
            line_width: self.clamp_line_width(line_width),
        };
        self.staging.stage(bytemuck::cast_slice(vertices), draw)
    }

    fn clamp_line_width(&self, width: f32) -> f32 {
        match self.gpu.line_width_range() {
            Some([min, max]) => width.clamp(min, max),
            None => 1.0,
        }
    }

    /// Record the pending draw, close the pass and submit.
    pub fn end_frame(&mut self) -> Result<()> {
        let FramePhase::Recording { image_index } = self.phase else {
            return Err(Error::NotReady("no frame is recording"));
        };

        if let Err(e) = self.record_and_submit(image_index) {
            log::warn!("Frame dropped before submission: {}", e);
            self.abandon_frame();
            return Err(e);
        }
        self.phase = FramePhase::Submitted { image_index };
        Ok(())
    }

    fn record_and_submit(&mut self, image_index: u32) -> Result<()> {
        let (_, cmd) = self
            .swapchain
            .state()
            .and_then(|s| s.targets(image_index))
            .ok_or(Error::NotReady("no swapchain"))?;

        if let Some(pending) = self.staging.take_pending() {
            self.gpu.draw_lines(
                cmd,
                &LineDraw {
                    pipeline: self.pipeline.pipeline,
                    layout: self.pipeline.layout,
                    vertex_buffer: self.staging.buffer(),
                    vertex_count: pending.vertex_count,
                    color: ColorPush {
                        rgba: pending.color,
                    },
                    line_width: pending.line_width,
                },
            );
        }

        self.gpu.end_render_pass(cmd)?;
        self.gpu
            .submit(
                cmd,
                self.sync.image_available,
                self.sync.render_finished,
                self.sync.in_flight_fence,
            )
            .context("Failed to submit frame")?;
        Ok(())
    }

    /// Queue the submitted image for presentation.
    pub fn present(&mut self) -> Result<()> {
        let FramePhase::Submitted { image_index } = self.phase else {
            return Err(Error::NotReady("no frame was submitted"));
        };
        self.phase = FramePhase::Idle;

        let swapchain = self
            .swapchain
            .state()
            .map(|s| s.swapchain)
            .ok_or(Error::NotReady("no swapchain"))?;

        match self
            .gpu
            .present(swapchain, image_index, self.sync.render_finished)
            .context("Failed to present")?
        {
            PresentOutcome::Presented => Ok(()),
            PresentOutcome::Suboptimal => {
                self.swapchain.mark_stale();
                Err(Error::OutOfDate)
            }
            PresentOutcome::OutOfDate => {
                self.stale_render = true;
                self.swapchain.mark_stale();
                Err(Error::OutOfDate)
            }
        }
    }
}
