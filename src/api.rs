// The renderer interface and its handle registry.
//
// RendererApi is what the C table forwards to; everything behind it is
// typed. Renderer keeps device contexts in a generational arena so a
// handle is an opaque non-zero integer and a destroyed handle never aliases
// a later device.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use slotmap::{new_key_type, Key, KeyData, SlotMap};

use crate::config::Config;
use crate::context::{ContextSettings, DeviceContext};
use crate::error::{Error, Result};
use crate::gpu::{DeviceDesc, GpuBackend, WindowTarget};
use crate::pipeline::VertexLayout;

/// Opaque device handle. 0 is never a valid device.
pub type DeviceHandle = u64;

new_key_type! {
    struct DeviceKey;
}

/// A decoded device descriptor. `None` fields fall back to the config file.
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub window: WindowTarget,
    /// Client area in pixels; 0 lets the surface decide.
    pub width: u32,
    pub height: u32,
    pub vsync: Option<bool>,
    pub validation: Option<bool>,
    pub vertex_components: Option<u32>,
}

/// Operations reachable through the function table.
pub trait RendererApi {
    fn create_device(&self, request: &DeviceRequest) -> Result<DeviceHandle>;
    /// No-op for 0 and for handles that were already destroyed.
    fn destroy_device(&self, handle: DeviceHandle);
    fn resize_swapchain(&self, handle: DeviceHandle, width: u32, height: u32) -> Result<()>;
    fn begin_frame(&self, handle: DeviceHandle, clear_color: [f32; 4]) -> Result<()>;
    fn end_frame(&self, handle: DeviceHandle) -> Result<()>;
    fn present(&self, handle: DeviceHandle) -> Result<()>;
    fn set_matrices(
        &self,
        handle: DeviceHandle,
        view: &[f32; 12],
        projection: &[f32; 16],
        origin: &[f32; 3],
    ) -> Result<()>;
    fn draw_lines(
        &self,
        handle: DeviceHandle,
        vertices: &[f32],
        color: [f32; 4],
        line_width: f32,
    ) -> Result<()>;
    fn reserve_vertices(&self, handle: DeviceHandle, count: u32) -> Result<()>;
    /// Floats per vertex the device was created with.
    fn vertex_components(&self, handle: DeviceHandle) -> Result<u32>;
    /// Current staging buffer size in bytes.
    fn staging_capacity(&self, handle: DeviceHandle) -> Result<u64>;
}

type SharedContext<D> = Arc<Mutex<DeviceContext<D>>>;

pub struct Renderer<B: GpuBackend> {
    backend: B,
    config: Config,
    devices: Mutex<SlotMap<DeviceKey, SharedContext<B::Device>>>,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(backend: B, config: Config) -> Self {
        Self {
            backend,
            config,
            devices: Mutex::new(SlotMap::with_key()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of live devices.
    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    fn lookup(&self, handle: DeviceHandle) -> Result<SharedContext<B::Device>> {
        if handle == 0 {
            return Err(Error::BadArgs("null device handle"));
        }
        let key = DeviceKey::from(KeyData::from_ffi(handle));
        self.devices
            .lock()
            .get(key)
            .cloned()
            .ok_or(Error::BadArgs("unknown or destroyed device handle"))
    }

    fn with_device<T>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&mut DeviceContext<B::Device>) -> Result<T>,
    ) -> Result<T> {
        let context = self.lookup(handle)?;
        let mut context = context.lock();
        f(&mut context)
    }

    fn settings(&self, request: &DeviceRequest) -> Result<ContextSettings> {
        let vertex = match request.vertex_components {
            Some(components) => VertexLayout::from_components(components)
                .ok_or(Error::BadArgs("vertex_components must be 2 or 3"))?,
            None => VertexLayout::from_components(self.config.vertex_components())
                .unwrap_or(VertexLayout::Xyz),
        };

        let host_extent = (request.width > 0 && request.height > 0).then_some(vk::Extent2D {
            width: request.width,
            height: request.height,
        });

        Ok(ContextSettings {
            host_extent,
            vsync: request.vsync.unwrap_or(self.config.device.vsync),
            vertex,
            staging_capacity: self.config.staging_capacity(),
        })
    }
}

impl<B: GpuBackend> RendererApi for Renderer<B> {
    fn create_device(&self, request: &DeviceRequest) -> Result<DeviceHandle> {
        let settings = self.settings(request)?;
        let desc = DeviceDesc {
            app_name: self.config.device.app_name.clone(),
            window: request.window,
            validation: request
                .validation
                .unwrap_or(self.config.device.validation_layers),
        };

        let gpu = self.backend.open(&desc).map_err(Error::Device)?;
        let context = DeviceContext::create(gpu, &settings)?;

        let key = self.devices.lock().insert(Arc::new(Mutex::new(context)));
        let handle = key.data().as_ffi();
        log::info!("Device {:#x} created", handle);
        Ok(handle)
    }

    fn destroy_device(&self, handle: DeviceHandle) {
        if handle == 0 {
            return;
        }

        let key = DeviceKey::from(KeyData::from_ffi(handle));
        let removed = self.devices.lock().remove(key);
        match removed {
            // Context teardown runs here, outside the registry lock
            Some(context) => {
                drop(context);
                log::info!("Device {:#x} destroyed", handle);
            }
            None => log::debug!("destroy_device: {:#x} is not a live device", handle),
        }
    }

    fn resize_swapchain(&self, handle: DeviceHandle, width: u32, height: u32) -> Result<()> {
        self.with_device(handle, |ctx| ctx.resize(width, height))
    }

    fn begin_frame(&self, handle: DeviceHandle, clear_color: [f32; 4]) -> Result<()> {
        self.with_device(handle, |ctx| ctx.begin_frame(clear_color))
    }

    fn end_frame(&self, handle: DeviceHandle) -> Result<()> {
        self.with_device(handle, |ctx| ctx.end_frame())
    }

    fn present(&self, handle: DeviceHandle) -> Result<()> {
        self.with_device(handle, |ctx| ctx.present())
    }

    fn set_matrices(
        &self,
        handle: DeviceHandle,
        view: &[f32; 12],
        projection: &[f32; 16],
        origin: &[f32; 3],
    ) -> Result<()> {
        self.with_device(handle, |ctx| {
            ctx.set_matrices(view, projection, origin);
            Ok(())
        })
    }

    fn draw_lines(
        &self,
        handle: DeviceHandle,
        vertices: &[f32],
        color: [f32; 4],
        line_width: f32,
    ) -> Result<()> {
        self.with_device(handle, |ctx| ctx.draw_lines(vertices, color, line_width))
    }

    fn reserve_vertices(&self, handle: DeviceHandle, count: u32) -> Result<()> {
        self.with_device(handle, |ctx| ctx.reserve_vertices(count))
    }

    fn vertex_components(&self, handle: DeviceHandle) -> Result<u32> {
        self.with_device(handle, |ctx| Ok(ctx.vertex_layout().components()))
    }

    fn staging_capacity(&self, handle: DeviceHandle) -> Result<u64> {
        self.with_device(handle, |ctx| Ok(ctx.staging_capacity()))
    }
}

#[cfg(test)]
mod tests {
    use raw_window_handle::{
        RawDisplayHandle, RawWindowHandle, XlibDisplayHandle, XlibWindowHandle,
    };

    use super::*;
    use crate::error::ResultCode;
    use crate::mock::MockBackend;

    fn request() -> DeviceRequest {
        DeviceRequest {
            window: WindowTarget {
                window: RawWindowHandle::Xlib(XlibWindowHandle::new(0x4200001)),
                display: RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)),
            },
            width: 800,
            height: 600,
            vsync: None,
            validation: Some(false),
            vertex_components: Some(2),
        }
    }

    fn renderer() -> (MockBackend, Renderer<MockBackend>) {
        let backend = MockBackend::new();
        (backend.clone(), Renderer::new(backend, Config::default()))
    }

    fn code<T>(result: Result<T>) -> ResultCode {
        result.err().map_or(ResultCode::Ok, |e| e.code())
    }

    #[test]
    fn handle_lifecycle() {
        let (backend, renderer) = renderer();

        let mut handle = renderer.create_device(&request()).unwrap();
        assert_ne!(handle, 0);
        assert_eq!(renderer.device_count(), 1);

        renderer.destroy_device(handle);
        assert_eq!(backend.outstanding(), 0);

        // A stale handle is rejected, never reused
        assert_eq!(code(renderer.begin_frame(handle, [0.0; 4])), ResultCode::BadArgs);
        renderer.destroy_device(handle);

        handle = 0;
        renderer.destroy_device(handle);
        assert_eq!(code(renderer.end_frame(handle)), ResultCode::BadArgs);
        assert_eq!(renderer.device_count(), 0);
    }

    #[test]
    fn handles_are_distinct_across_reuse() {
        let (_backend, renderer) = renderer();

        let first = renderer.create_device(&request()).unwrap();
        renderer.destroy_device(first);
        let second = renderer.create_device(&request()).unwrap();

        assert_ne!(first, second);
        assert_eq!(code(renderer.present(first)), ResultCode::BadArgs);
        assert_eq!(code(renderer.present(second)), ResultCode::NotReady);
    }

    #[test]
    fn scenario_through_the_interface() {
        let (backend, renderer) = renderer();
        let h = renderer.create_device(&request()).unwrap();

        assert_eq!(renderer.vertex_components(h).unwrap(), 2);
        assert_eq!(renderer.staging_capacity(h).unwrap(), 1 << 20);
        renderer.begin_frame(h, [0.0, 0.0, 0.0, 1.0]).unwrap();
        renderer
            .draw_lines(h, &[-0.5, -0.5, 0.5, 0.5], [1.0; 4], 1.0)
            .unwrap();
        renderer.end_frame(h).unwrap();
        renderer.present(h).unwrap();

        backend.set_window(0, 0);
        assert_eq!(code(renderer.resize_swapchain(h, 0, 0)), ResultCode::NotReady);
        assert_eq!(code(renderer.begin_frame(h, [0.0; 4])), ResultCode::NotReady);

        backend.set_window(800, 600);
        renderer.resize_swapchain(h, 800, 600).unwrap();
        renderer.begin_frame(h, [0.0, 0.0, 0.0, 1.0]).unwrap();

        renderer.destroy_device(h);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn open_failure_is_a_device_error() {
        let (backend, renderer) = renderer();
        backend.fail_next("surface");

        assert_eq!(code(renderer.create_device(&request())), ResultCode::Device);
        assert_eq!(renderer.device_count(), 0);
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn descriptor_overrides_config() {
        let (backend, renderer) = renderer();

        let mut req = request();
        req.vertex_components = None;
        req.vsync = Some(false);
        let h = renderer.create_device(&req).unwrap();

        assert_eq!(renderer.vertex_components(h).unwrap(), 3);
        let swapchain = backend.last_swapchain().unwrap();
        assert_eq!(swapchain.present_mode, vk::PresentModeKHR::MAILBOX);

        req.vertex_components = Some(4);
        assert_eq!(code(renderer.create_device(&req)), ResultCode::BadArgs);
    }

    #[test]
    fn matrices_accepted_without_swapchain() {
        let (backend, renderer) = renderer();
        backend.set_window(0, 0);
        let h = renderer.create_device(&request()).unwrap();

        let identity = glam::Mat4::IDENTITY.to_cols_array();
        let view = glam::Affine3A::IDENTITY.to_cols_array();
        renderer
            .set_matrices(h, &view, &identity, &[0.0; 3])
            .unwrap();
    }
}
