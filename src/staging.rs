// The per-device staging (vertex) buffer.
//
// One host-visible, host-coherent allocation, mapped once and reused every
// frame. Writes are plain copies into the mapping; the frame controller only
// allows them after the previous frame's fence has been waited on.

use anyhow::Result;
use ash::vk;

use crate::config::MIN_STAGING_BYTES;
use crate::error::Error;
use crate::gpu::{GpuDevice, HostBuffer};

/// The draw recorded by the latest `draw_lines` call of the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingDraw {
    pub vertex_count: u32,
    pub color: [f32; 4],
    pub line_width: f32,
}

pub struct StagingBuffer {
    host: HostBuffer,
    used: u64,
    pending: Option<PendingDraw>,
}

impl StagingBuffer {
    pub fn create<G: GpuDevice>(gpu: &mut G, capacity: u64) -> Result<Self> {
        let host = gpu.create_host_buffer(capacity.max(MIN_STAGING_BYTES))?;
        log::debug!("Staging buffer: {} bytes", host.size);

        Ok(Self {
            host,
            used: 0,
            pending: None,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.host.size
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.host.buffer
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn pending(&self) -> Option<&PendingDraw> {
        self.pending.as_ref()
    }

    /// Replace this frame's vertex data and pending draw. Data that does not
    /// fit is rejected before anything is written.
    pub fn stage(&mut self, bytes: &[u8], draw: PendingDraw) -> crate::Result<()> {
        let needed = bytes.len() as u64;
        if needed > self.capacity() {
            return Err(Error::StagingExhausted {
                needed,
                capacity: self.capacity(),
            });
        }

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.host.mapped.as_ptr(), bytes.len());
        }
        self.used = needed;
        self.pending = Some(draw);
        Ok(())
    }

    /// Take the pending draw and reset the per-frame counters.
    pub fn take_pending(&mut self) -> Option<PendingDraw> {
        self.used = 0;
        self.pending.take()
    }

    pub fn reset(&mut self) {
        self.used = 0;
        self.pending = None;
    }

    /// Bytes written by the current pending draw.
    pub fn contents(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.host.mapped.as_ptr(), self.used as usize) }
    }

    /// Recreate the buffer with room for at least `min_bytes`. Never shrinks;
    /// returns whether a new buffer was made. The GPU must not be using the
    /// current buffer.
    pub fn grow<G: GpuDevice>(&mut self, gpu: &mut G, min_bytes: u64) -> Result<bool> {
        if min_bytes <= self.capacity() {
            return Ok(false);
        }

        let host = gpu.create_host_buffer(min_bytes.max(MIN_STAGING_BYTES))?;
        log::info!("Staging buffer grown: {} -> {} bytes", self.capacity(), host.size);
        let old = std::mem::replace(&mut self.host, host);
        gpu.destroy_host_buffer(&old);
        self.reset();
        Ok(true)
    }

    /// Release the buffer. It must not be used afterwards.
    pub fn destroy<G: GpuDevice>(&self, gpu: &mut G) {
        gpu.destroy_host_buffer(&self.host);
    }
}
