// Swapchain manager
//
// Owns the presentable-image set: the swapchain object plus, per image, an
// image view, a framebuffer and a command buffer. The four sequences are
// built together and replaced together; a failed build leaves nothing behind.
//
// Status: Absent (no chain) -> Ready -> NeedsRecreate (chain is stale) and
// back through the recreation protocol driven by the device context.

use anyhow::{Context, Result};
use ash::vk;

use crate::gpu::{is_zero_extent, GpuDevice, SwapchainDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Absent,
    Ready,
    NeedsRecreate,
}

const ZERO_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 0,
    height: 0,
};

/// 8-bit-per-channel formats we prefer, paired with sRGB-nonlinear
const PREFERRED_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::R8G8B8A8_SRGB,
];

/// Pick the first preferred 8-bit BGRA/RGBA sRGB-nonlinear format the surface
/// reports, else whatever it reports first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // A lone UNDEFINED entry means the surface takes anything
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });
        }
    }

    formats
        .iter()
        .find(|f| {
            PREFERRED_FORMATS.contains(&f.format)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO: vsync, always supported.
/// MAILBOX: no vsync, no tearing.
/// IMMEDIATE: no vsync, may tear.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, clamped to the maximum when there is one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// The client area to build for.
///
/// The surface's current extent is authoritative when defined, so a window
/// restored without a resize call is picked up on the next frame. When it is
/// not (Wayland) the host-reported size is clamped into the supported range;
/// a host zero, or no host size at all, means there is nothing to draw into.
pub fn client_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    host_extent: Option<vk::Extent2D>,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    match host_extent {
        Some(extent) if !is_zero_extent(extent) => vk::Extent2D {
            width: extent.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: extent.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        },
        _ => ZERO_EXTENT,
    }
}

// =============================================================================
// SWAPCHAIN STATE
// =============================================================================

/// One built chain. The per-image sequences always have equal length.
#[derive(Debug)]
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl SwapchainState {
    fn build<G: GpuDevice>(
        gpu: &mut G,
        desc: &SwapchainDesc,
        render_pass: vk::RenderPass,
        pool: vk::CommandPool,
    ) -> Result<Self> {
        let swapchain = gpu.create_swapchain(desc)?;

        let mut state = Self {
            swapchain,
            format: desc.format,
            present_mode: desc.present_mode,
            extent: desc.extent,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
        };

        match state.populate(gpu, render_pass, pool) {
            Ok(()) => Ok(state),
            Err(e) => {
                state.release(gpu, pool);
                Err(e)
            }
        }
    }

    fn populate<G: GpuDevice>(
        &mut self,
        gpu: &mut G,
        render_pass: vk::RenderPass,
        pool: vk::CommandPool,
    ) -> Result<()> {
        let images = gpu.swapchain_images(self.swapchain)?;
        if images.is_empty() {
            anyhow::bail!("Swapchain returned no images");
        }

        for &image in &images {
            let view = gpu.create_image_view(image, self.format.format)?;
            self.image_views.push(view);
            let framebuffer = gpu.create_framebuffer(render_pass, view, self.extent)?;
            self.framebuffers.push(framebuffer);
        }

        self.command_buffers = gpu.allocate_command_buffers(pool, images.len() as u32)?;
        self.images = images;
        Ok(())
    }

    /// Destroy whatever this (possibly partial) chain holds.
    fn release<G: GpuDevice>(self, gpu: &mut G, pool: vk::CommandPool) {
        if !self.command_buffers.is_empty() {
            gpu.free_command_buffers(pool, &self.command_buffers);
        }
        for framebuffer in self.framebuffers {
            gpu.destroy_framebuffer(framebuffer);
        }
        for view in self.image_views {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.swapchain);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    /// Framebuffer and command buffer for an acquired image index.
    pub fn targets(&self, image_index: u32) -> Option<(vk::Framebuffer, vk::CommandBuffer)> {
        let i = image_index as usize;
        Some((*self.framebuffers.get(i)?, *self.command_buffers.get(i)?))
    }
}

// =============================================================================
// SWAPCHAIN MANAGER
// =============================================================================

pub struct SwapchainManager {
    chain: Option<SwapchainState>,
    stale: bool,
    vsync: bool,
    host_extent: Option<vk::Extent2D>,
}

impl SwapchainManager {
    pub fn new(vsync: bool, host_extent: Option<vk::Extent2D>) -> Self {
        Self {
            chain: None,
            stale: false,
            vsync,
            host_extent,
        }
    }

    pub fn status(&self) -> SwapchainStatus {
        match (&self.chain, self.stale) {
            (None, _) => SwapchainStatus::Absent,
            (Some(_), true) => SwapchainStatus::NeedsRecreate,
            (Some(_), false) => SwapchainStatus::Ready,
        }
    }

    pub fn state(&self) -> Option<&SwapchainState> {
        self.chain.as_ref()
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Ready -> NeedsRecreate. No effect without a chain.
    pub fn mark_stale(&mut self) {
        if self.chain.is_some() && !self.stale {
            log::debug!("Swapchain marked for recreation");
            self.stale = true;
        }
    }

    pub fn set_host_extent(&mut self, extent: vk::Extent2D) {
        self.host_extent = Some(extent);
    }

    pub fn client_extent(&self, caps: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
        client_extent(caps, self.host_extent)
    }

    /// Query formats and present modes and settle the next chain's shape.
    pub fn plan<G: GpuDevice>(
        &self,
        gpu: &G,
        caps: &vk::SurfaceCapabilitiesKHR,
        extent: vk::Extent2D,
    ) -> Result<SwapchainDesc> {
        let formats = gpu.surface_formats()?;
        let format = choose_surface_format(&formats).context("Surface reports no formats")?;
        let present_mode = choose_present_mode(&gpu.present_modes()?, self.vsync);

        Ok(SwapchainDesc {
            image_count: choose_image_count(caps),
            format,
            present_mode,
            extent,
            pre_transform: caps.current_transform,
        })
    }

    /// Absent -> Ready. The previous chain must already be destroyed.
    pub fn build<G: GpuDevice>(
        &mut self,
        gpu: &mut G,
        desc: &SwapchainDesc,
        render_pass: vk::RenderPass,
        pool: vk::CommandPool,
    ) -> Result<()> {
        debug_assert!(self.chain.is_none(), "previous chain still alive");

        let state = SwapchainState::build(gpu, desc, render_pass, pool)
            .context("Failed to build swapchain")?;

        log::info!(
            "Swapchain ready: {}x{}, {} images, {:?}, {:?}",
            state.extent.width,
            state.extent.height,
            state.len(),
            state.format.format,
            state.present_mode
        );

        self.chain = Some(state);
        self.stale = false;
        Ok(())
    }

    /// Destroy the current chain (-> Absent). The GPU must be idle.
    pub fn destroy_chain<G: GpuDevice>(&mut self, gpu: &mut G, pool: vk::CommandPool) {
        if let Some(state) = self.chain.take() {
            state.release(gpu, pool);
        }
        self.stale = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_8bit_srgb_nonlinear() {
        let formats = [
            surface_format(
                vk::Format::A2B10G10R10_UNORM_PACK32,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            ),
            surface_format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            surface_format(
                vk::Format::A2B10G10R10_UNORM_PACK32,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            ),
            surface_format(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::A2B10G10R10_UNORM_PACK32);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn undefined_means_anything() {
        let formats = [surface_format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn present_mode_order() {
        use vk::PresentModeKHR as P;

        let all = [P::FIFO, P::IMMEDIATE, P::MAILBOX];
        assert_eq!(choose_present_mode(&all, true), P::FIFO);
        assert_eq!(choose_present_mode(&all, false), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE], false), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO], false), P::FIFO);
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(choose_image_count(&caps((800, 600), 2, 8)), 3);
        assert_eq!(choose_image_count(&caps((800, 600), 3, 3)), 3);
        assert_eq!(choose_image_count(&caps((800, 600), 2, 0)), 3);
    }

    #[test]
    fn client_extent_rules() {
        let defined = caps((800, 600), 2, 3);
        let undefined = caps((u32::MAX, u32::MAX), 2, 3);
        let host = |w, h| Some(vk::Extent2D { width: w, height: h });

        // Surface wins when it knows its size
        assert_eq!(client_extent(&defined, host(1024, 768)).width, 800);
        assert_eq!(client_extent(&defined, None).height, 600);

        // A stale host zero does not hide a live surface
        assert_eq!(client_extent(&defined, host(0, 0)).width, 800);
        assert!(is_zero_extent(client_extent(&undefined, host(0, 600))));

        // Otherwise the host size, clamped
        let e = client_extent(&undefined, host(9000, 300));
        assert_eq!((e.width, e.height), (4096, 300));
        assert!(is_zero_extent(client_extent(&undefined, None)));

        // Minimized window on a surface with defined extent
        assert!(is_zero_extent(client_extent(&caps((0, 0), 2, 3), None)));
    }
}
