// =============================================================================
// DEVICE CONTEXT - everything one device handle owns
// =============================================================================
//
// Creation order: command pool, frame sync, render pass, swapchain chain,
// pipeline, staging buffer. A failure at any step unwinds the earlier steps in
// reverse before the device itself is dropped, so no partial context escapes.
//
// Teardown (Drop) waits for the device to go idle, then releases staging,
// pipeline, chain, render pass, sync and command pool; dropping the device
// object afterwards releases surface, device and instance.

use anyhow::Context as _;
use ash::vk;
use glam::{Affine3A, Mat4, Vec3};

use crate::error::{Error, Result};
use crate::frame::FramePhase;
use crate::gpu::{is_zero_extent, same_extent, GpuDevice};
use crate::pipeline::{LinePipeline, RenderPass, VertexLayout};
use crate::staging::StagingBuffer;
use crate::swapchain::{choose_surface_format, SwapchainManager, SwapchainStatus};
use crate::sync::FrameSync;

/// Per-device choices settled before construction.
#[derive(Debug, Clone, Copy)]
pub struct ContextSettings {
    /// Client area reported by the host, if it reported one.
    pub host_extent: Option<vk::Extent2D>,
    pub vsync: bool,
    pub vertex: VertexLayout,
    pub staging_capacity: u64,
}

/// Camera data accepted through `set_matrices`. Stored for future use; the
/// line pipeline does not read it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SceneTransforms {
    pub view: Affine3A,
    pub projection: Mat4,
    pub origin: Vec3,
}

/// Objects created so far, unwound in reverse on a failed construction.
enum Created {
    CommandPool(vk::CommandPool),
    Sync(FrameSync),
    RenderPass(RenderPass),
    Chain(vk::CommandPool),
    Pipeline(LinePipeline),
}

#[derive(Default)]
struct Rollback(Vec<Created>);

impl Rollback {
    fn push(&mut self, created: Created) {
        self.0.push(created);
    }

    fn unwind<G: GpuDevice>(self, gpu: &mut G, swapchain: &mut SwapchainManager) {
        for created in self.0.into_iter().rev() {
            match created {
                Created::Pipeline(pipeline) => pipeline.destroy(gpu),
                Created::Chain(pool) => swapchain.destroy_chain(gpu, pool),
                Created::RenderPass(render_pass) => render_pass.destroy(gpu),
                Created::Sync(sync) => sync.destroy(gpu),
                Created::CommandPool(pool) => gpu.destroy_command_pool(pool),
            }
        }
    }
}

struct Parts {
    pool: vk::CommandPool,
    sync: FrameSync,
    render_pass: RenderPass,
    pipeline: LinePipeline,
    staging: StagingBuffer,
}

pub struct DeviceContext<G: GpuDevice> {
    pub(crate) gpu: G,
    pub(crate) pool: vk::CommandPool,
    pub(crate) sync: FrameSync,
    pub(crate) render_pass: RenderPass,
    pub(crate) swapchain: SwapchainManager,
    pub(crate) pipeline: LinePipeline,
    pub(crate) staging: StagingBuffer,
    pub(crate) phase: FramePhase,
    /// The acquire semaphore was signaled by a skipped or failed frame.
    pub(crate) stale_acquire: bool,
    /// The render semaphore was left signaled by an out-of-date present.
    pub(crate) stale_render: bool,
    transforms: SceneTransforms,
}

impl<G: GpuDevice> DeviceContext<G> {
    /// Build every per-device object on top of an opened device.
    pub fn create(mut gpu: G, settings: &ContextSettings) -> Result<Self> {
        let mut swapchain = SwapchainManager::new(settings.vsync, settings.host_extent);
        let mut rollback = Rollback::default();

        let parts = match Self::build(&mut gpu, settings, &mut swapchain, &mut rollback) {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("Device context creation failed: {:#}", e);
                rollback.unwind(&mut gpu, &mut swapchain);
                return Err(Error::Device(e));
            }
        };

        log::info!(
            "Device context ready ({:?} vertices, swapchain {:?})",
            settings.vertex,
            swapchain.status()
        );

        Ok(Self {
            gpu,
            pool: parts.pool,
            sync: parts.sync,
            render_pass: parts.render_pass,
            swapchain,
            pipeline: parts.pipeline,
            staging: parts.staging,
            phase: FramePhase::Idle,
            stale_acquire: false,
            stale_render: false,
            transforms: SceneTransforms::default(),
        })
    }

    fn build(
        gpu: &mut G,
        settings: &ContextSettings,
        swapchain: &mut SwapchainManager,
        rollback: &mut Rollback,
    ) -> anyhow::Result<Parts> {
        let pool = gpu
            .create_command_pool()
            .context("Failed to create command pool")?;
        rollback.push(Created::CommandPool(pool));

        let sync = FrameSync::new(gpu).context("Failed to create sync objects")?;
        rollback.push(Created::Sync(sync));

        let formats = gpu.surface_formats()?;
        let format = choose_surface_format(&formats).context("Surface reports no formats")?;
        let render_pass =
            RenderPass::create(gpu, format.format).context("Failed to create render pass")?;
        rollback.push(Created::RenderPass(render_pass));

        let caps = gpu.surface_capabilities()?;
        let extent = swapchain.client_extent(&caps);
        if is_zero_extent(extent) {
            log::info!("Client area is zero, swapchain deferred");
        } else {
            let desc = swapchain.plan(gpu, &caps, extent)?;
            swapchain.build(gpu, &desc, render_pass.handle, pool)?;
            rollback.push(Created::Chain(pool));
        }

        let pipeline = LinePipeline::create(gpu, render_pass.handle, settings.vertex)
            .context("Failed to create line pipeline")?;
        rollback.push(Created::Pipeline(pipeline));

        let staging = StagingBuffer::create(gpu, settings.staging_capacity)
            .context("Failed to create staging buffer")?;

        Ok(Parts {
            pool,
            sync,
            render_pass,
            pipeline,
            staging,
        })
    }

    pub fn status(&self) -> SwapchainStatus {
        self.swapchain.status()
    }

    /// Extent of the current chain, `None` while absent.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.state().map(|s| s.extent)
    }

    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    pub fn vertex_layout(&self) -> VertexLayout {
        self.pipeline.vertex
    }

    pub fn staging_capacity(&self) -> u64 {
        self.staging.capacity()
    }

    pub fn transforms(&self) -> &SceneTransforms {
        &self.transforms
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Whether the chain must be rebuilt before rendering at `extent`.
    pub(crate) fn needs_rebuild(&self, extent: vk::Extent2D) -> bool {
        match (self.swapchain.status(), self.extent()) {
            (SwapchainStatus::Ready, Some(current)) => !same_extent(current, extent),
            _ => true,
        }
    }

    /// Tear down the chain and, unless the area is zero, build a new one.
    ///
    /// Runs only between frames. Stale semaphores are replaced once the
    /// device is idle; a changed surface format also rebuilds the render pass
    /// and pipeline.
    pub(crate) fn recreate(
        &mut self,
        caps: &vk::SurfaceCapabilitiesKHR,
        extent: vk::Extent2D,
    ) -> Result<()> {
        debug_assert!(matches!(self.phase, FramePhase::Idle));

        self.gpu.wait_idle().context("Failed to wait for device idle")?;
        self.swapchain.destroy_chain(&mut self.gpu, self.pool);
        self.recycle_stale_semaphores()?;

        if is_zero_extent(extent) {
            log::debug!("Client area is zero, swapchain recreation deferred");
            return Err(Error::NotReady("client area is zero"));
        }

        let desc = self.swapchain.plan(&self.gpu, caps, extent)?;
        if desc.format.format != self.render_pass.format {
            self.rebuild_render_pass(desc.format.format)?;
        }
        self.swapchain
            .build(&mut self.gpu, &desc, self.render_pass.handle, self.pool)?;
        Ok(())
    }

    pub(crate) fn recycle_stale_semaphores(&mut self) -> anyhow::Result<()> {
        if self.stale_acquire {
            self.sync.recycle_image_available(&mut self.gpu)?;
            self.stale_acquire = false;
        }
        if self.stale_render {
            self.sync.recycle_render_finished(&mut self.gpu)?;
            self.stale_render = false;
        }
        Ok(())
    }

    fn rebuild_render_pass(&mut self, format: vk::Format) -> anyhow::Result<()> {
        log::info!(
            "Surface format changed {:?} -> {:?}, rebuilding render pass",
            self.render_pass.format,
            format
        );

        let render_pass = RenderPass::create(&mut self.gpu, format)?;
        if let Err(e) = self.pipeline.rebuild(&mut self.gpu, render_pass.handle) {
            render_pass.destroy(&mut self.gpu);
            return Err(e);
        }
        std::mem::replace(&mut self.render_pass, render_pass).destroy(&mut self.gpu);
        Ok(())
    }

    /// Record a new client area and rebuild the chain for it.
    ///
    /// A zero area tears the chain down and reports NotReady. While a frame
    /// is in progress the chain is only marked stale; the next `begin_frame`
    /// rebuilds it.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let requested = vk::Extent2D { width, height };
        self.swapchain.set_host_extent(requested);

        if !matches!(self.phase, FramePhase::Idle) {
            self.swapchain.mark_stale();
            if is_zero_extent(requested) {
                return Err(Error::NotReady("client area is zero"));
            }
            return Ok(());
        }

        let caps = self.gpu.surface_capabilities()?;
        let extent = self.swapchain.client_extent(&caps);
        self.recreate(&caps, extent)
    }

    /// Make room for `count` vertices in the staging buffer.
    pub fn reserve_vertices(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(Error::BadArgs("vertex count is zero"));
        }
        if !matches!(self.phase, FramePhase::Idle) {
            return Err(Error::Sequence("reserve_vertices during a frame"));
        }

        let bytes = u64::from(count) * u64::from(self.vertex_layout().stride());
        if bytes <= self.staging.capacity() {
            return Ok(());
        }

        self.gpu.wait_idle().context("Failed to wait for device idle")?;
        self.staging
            .grow(&mut self.gpu, bytes)
            .context("Failed to grow staging buffer")?;
        Ok(())
    }

    pub fn set_matrices(&mut self, view: &[f32; 12], projection: &[f32; 16], origin: &[f32; 3]) {
        self.transforms = SceneTransforms {
            view: Affine3A::from_cols_array(view),
            projection: Mat4::from_cols_array(projection),
            origin: Vec3::from_array(*origin),
        };
    }
}

impl<G: GpuDevice> Drop for DeviceContext<G> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device idle wait failed during teardown: {:#}", e);
        }

        self.staging.destroy(&mut self.gpu);
        self.pipeline.destroy(&mut self.gpu);
        self.swapchain.destroy_chain(&mut self.gpu, self.pool);
        self.render_pass.destroy(&mut self.gpu);
        self.sync.destroy(&mut self.gpu);
        self.gpu.destroy_command_pool(self.pool);

        log::debug!("Device context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultCode;
    use crate::mock::{MockBackend, MockGpu};

    pub(crate) fn settings(vertex: VertexLayout) -> ContextSettings {
        ContextSettings {
            host_extent: Some(vk::Extent2D {
                width: 800,
                height: 600,
            }),
            vsync: true,
            vertex,
            staging_capacity: 1 << 20,
        }
    }

    fn context(backend: &MockBackend) -> DeviceContext<MockGpu> {
        DeviceContext::create(backend.open_device(), &settings(VertexLayout::Xyz)).unwrap()
    }

    #[test]
    fn create_then_destroy_leaves_nothing() {
        let backend = MockBackend::new();
        let ctx = context(&backend);

        assert_eq!(ctx.status(), SwapchainStatus::Ready);
        assert_eq!(backend.live("swapchain"), 1);
        assert_eq!(backend.live("framebuffer"), 3);
        assert!(backend.outstanding() > 0);

        drop(ctx);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn every_failed_step_rolls_back() {
        let kinds = [
            "command_pool",
            "semaphore",
            "fence",
            "render_pass",
            "swapchain",
            "image_view",
            "framebuffer",
            "command_buffer",
            "pipeline_layout",
            "pipeline",
            "buffer",
        ];

        for kind in kinds {
            let backend = MockBackend::new();
            backend.fail_next(kind);

            let result = DeviceContext::create(backend.open_device(), &settings(VertexLayout::Xyz));
            let err = result.err().unwrap_or_else(|| panic!("{} failure ignored", kind));

            let expected = if kind == "buffer" {
                ResultCode::NoMem
            } else {
                ResultCode::Device
            };
            assert_eq!(err.code(), expected, "{}", kind);
            assert_eq!(backend.outstanding(), 0, "{} leaked objects", kind);
        }
    }

    #[test]
    fn zero_area_creates_without_swapchain() {
        let backend = MockBackend::new();
        backend.set_window(0, 0);
        let ctx = context(&backend);

        assert_eq!(ctx.status(), SwapchainStatus::Absent);
        assert_eq!(backend.live("swapchain"), 0);

        drop(ctx);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn resize_sequence_ends_ready_at_latest_size() {
        let backend = MockBackend::new();
        let mut ctx = context(&backend);

        let sizes = [(1024, 768), (0, 0), (0, 300), (640, 480), (0, 0), (1280, 720)];
        for (w, h) in sizes {
            backend.set_window(w, h);
            let result = ctx.resize(w, h);
            if w == 0 || h == 0 {
                assert_eq!(result.unwrap_err().code(), ResultCode::NotReady);
                assert_eq!(ctx.status(), SwapchainStatus::Absent);
            } else {
                result.unwrap();
            }

            if let Some(state) = ctx.swapchain().state() {
                assert_eq!(state.images().len(), state.image_views().len());
                assert_eq!(state.images().len(), state.framebuffers().len());
                assert_eq!(state.images().len(), state.command_buffers().len());
            }
        }

        assert_eq!(ctx.status(), SwapchainStatus::Ready);
        let extent = ctx.extent().unwrap();
        assert_eq!((extent.width, extent.height), (1280, 720));
        assert_eq!(backend.live("swapchain"), 1);
        assert_eq!(backend.live("framebuffer"), 3);
    }

    #[test]
    fn undefined_surface_extent_follows_host() {
        let backend = MockBackend::new();
        backend.set_extent_defined(false);
        let mut ctx = context(&backend);
        assert_eq!(ctx.extent().unwrap().width, 800);

        ctx.resize(5000, 200).unwrap();
        let extent = ctx.extent().unwrap();
        assert_eq!((extent.width, extent.height), (4096, 200));
    }

    #[test]
    fn format_change_rebuilds_render_pass_and_pipeline() {
        let backend = MockBackend::new();
        let mut ctx = context(&backend);
        let layout = ctx.pipeline.layout;
        let old_pipeline = ctx.pipeline.pipeline;

        backend.set_formats(vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }]);
        ctx.resize(800, 600).unwrap();

        assert_eq!(ctx.render_pass.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(ctx.pipeline.layout, layout);
        assert_ne!(ctx.pipeline.pipeline, old_pipeline);
        assert_eq!(backend.live("render_pass"), 1);
        assert_eq!(backend.live("pipeline"), 1);

        drop(ctx);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn reserve_grows_but_never_shrinks() {
        let backend = MockBackend::new();
        let mut ctx = context(&backend);
        let initial = ctx.staging_capacity();

        ctx.reserve_vertices(16).unwrap();
        assert_eq!(ctx.staging_capacity(), initial);

        let idles = backend.wait_idles();
        ctx.reserve_vertices(200_000).unwrap();
        assert_eq!(ctx.staging_capacity(), 200_000 * 12);
        assert_eq!(backend.wait_idles(), idles + 1);
        assert_eq!(backend.live("buffer"), 1);

        assert_eq!(ctx.reserve_vertices(0).unwrap_err().code(), ResultCode::BadArgs);
    }

    #[test]
    fn matrices_are_stored() {
        let backend = MockBackend::new();
        let mut ctx = context(&backend);

        let view = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 5.0, 6.0, 7.0];
        let projection = Mat4::from_scale(Vec3::splat(2.0)).to_cols_array();
        ctx.set_matrices(&view, &projection, &[1.0, 2.0, 3.0]);

        let stored = ctx.transforms();
        assert_eq!(stored.view.translation, glam::Vec3A::new(5.0, 6.0, 7.0));
        assert_eq!(stored.projection, Mat4::from_scale(Vec3::splat(2.0)));
        assert_eq!(stored.origin, Vec3::new(1.0, 2.0, 3.0));
    }
}
