// Synchronization primitives
//
// One acquire semaphore, one render semaphore and one fence: a single frame
// in flight. The fence starts signaled so the first frame does not block.

use anyhow::Result;
use ash::vk;

use crate::gpu::GpuDevice;

#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new<G: GpuDevice>(gpu: &mut G) -> Result<Self> {
        let image_available = gpu.create_semaphore()?;

        let render_finished = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };

        let in_flight_fence = match gpu.create_fence(true) {
            Ok(fence) => fence,
            Err(e) => {
                gpu.destroy_semaphore(render_finished);
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Swap the acquire semaphore for a fresh one. The device must be idle.
    pub fn recycle_image_available<G: GpuDevice>(&mut self, gpu: &mut G) -> Result<()> {
        let fresh = gpu.create_semaphore()?;
        gpu.destroy_semaphore(std::mem::replace(&mut self.image_available, fresh));
        Ok(())
    }

    /// Swap the render semaphore for a fresh one. The device must be idle.
    pub fn recycle_render_finished<G: GpuDevice>(&mut self, gpu: &mut G) -> Result<()> {
        let fresh = gpu.create_semaphore()?;
        gpu.destroy_semaphore(std::mem::replace(&mut self.render_finished, fresh));
        Ok(())
    }

    /// Replace the fence with a fresh signaled one.
    ///
    /// For a frame that reset the fence and then failed before its submit
    /// was queued; nothing else will ever signal the old fence.
    pub fn rearm_fence<G: GpuDevice>(&mut self, gpu: &mut G) -> Result<()> {
        let fresh = gpu.create_fence(true)?;
        gpu.destroy_fence(std::mem::replace(&mut self.in_flight_fence, fresh));
        Ok(())
    }

    pub fn destroy<G: GpuDevice>(&self, gpu: &mut G) {
        gpu.destroy_fence(self.in_flight_fence);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_semaphore(self.image_available);
    }
}
