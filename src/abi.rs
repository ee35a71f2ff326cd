// The C function table.
//
// Hosts resolve `fwGetRendererAPI`, ask for ABI_VERSION and get back a
// pointer to a static RendererApiTable. Every entry point decodes its
// raw arguments, forwards to the RendererApi implementation and turns
// the outcome into a ResultCode. Errors leave their message in the
// calling thread's last-error slot; panics are caught here and never cross
// into the host.
//
// The first successful `fwGetRendererAPI` call creates the process-wide
// registration: configuration, logger and the renderer itself.

use std::any::Any;
use std::ffi::{c_char, c_ulong, c_void};
use std::num::NonZeroIsize;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

use log::Level;
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, WaylandDisplayHandle, WaylandWindowHandle,
    Win32WindowHandle, WindowsDisplayHandle, XlibDisplayHandle, XlibWindowHandle,
};

use crate::api::{DeviceHandle, DeviceRequest, Renderer, RendererApi};
use crate::backend::VulkanBackend;
use crate::config::Config;
use crate::error::{last_error_ptr, set_last_error, Error, Result, ResultCode};
use crate::gpu::WindowTarget;
use crate::logging::{self, HostLogger, LogFn};

/// Version of the table layout below. Only an exact match is served.
pub const ABI_VERSION: u32 = 4;

pub const PLATFORM_WIN32: u32 = 0;
pub const PLATFORM_XLIB: u32 = 1;
pub const PLATFORM_WAYLAND: u32 = 2;

/// Device descriptor as laid out by the host.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RendererDesc {
    /// HWND, Xlib `Window` id, or `wl_surface*`.
    pub window_handle: *mut c_void,
    /// HINSTANCE (may be null), `Display*`, or `wl_display*`.
    pub display_handle: *mut c_void,
    /// One of the `PLATFORM_*` constants.
    pub platform: u32,
    /// Client area in pixels; 0 lets the surface decide.
    pub width: u32,
    pub height: u32,
    /// 0 off, 1 on, negative: use the config file.
    pub vsync: i32,
    /// 0 off, 1 on, negative: use the config file.
    pub validation: i32,
    /// 2 or 3 floats per vertex; 0: use the config file.
    pub vertex_components: u32,
}

#[repr(C)]
pub struct FwHeader {
    pub abi_version: u32,
    pub get_last_error: extern "C" fn() -> *const c_char,
    /// Installed log callback (a `LogFn`) or null.
    pub log_cb: AtomicPtr<c_void>,
    pub log_user: AtomicPtr<c_void>,
}

#[repr(C)]
pub struct RendererApiTable {
    pub header: FwHeader,
    pub set_logger: extern "C" fn(Option<LogFn>, *mut c_void),
    pub create_device: unsafe extern "C" fn(*const RendererDesc, *mut DeviceHandle) -> i32,
    pub destroy_device: extern "C" fn(DeviceHandle),
    pub resize_swapchain: extern "C" fn(DeviceHandle, u32, u32) -> i32,
    pub begin_frame: extern "C" fn(DeviceHandle, f32, f32, f32, f32) -> i32,
    pub end_frame: extern "C" fn(DeviceHandle) -> i32,
    pub present: extern "C" fn(DeviceHandle) -> i32,
    /// view: 12 floats (3x4 column-major), proj: 16, origin: 3.
    pub set_matrices:
        unsafe extern "C" fn(DeviceHandle, *const f32, *const f32, *const f32) -> i32,
    /// vertices, vertex count, r, g, b, a, line width in pixels.
    pub draw_lines:
        unsafe extern "C" fn(DeviceHandle, *const f32, u32, f32, f32, f32, f32, f32) -> i32,
    pub reserve_vertices: extern "C" fn(DeviceHandle, u32) -> i32,
}

static TABLE: RendererApiTable = RendererApiTable {
    header: FwHeader {
        abi_version: ABI_VERSION,
        get_last_error: fw_get_last_error,
        log_cb: AtomicPtr::new(ptr::null_mut()),
        log_user: AtomicPtr::new(ptr::null_mut()),
    },
    set_logger: fw_set_logger,
    create_device: fw_create_device,
    destroy_device: fw_destroy_device,
    resize_swapchain: fw_resize_swapchain,
    begin_frame: fw_begin_frame,
    end_frame: fw_end_frame,
    present: fw_present,
    set_matrices: fw_set_matrices,
    draw_lines: fw_draw_lines,
    reserve_vertices: fw_reserve_vertices,
};

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

struct Registration {
    renderer: Renderer<VulkanBackend>,
    logger: &'static HostLogger,
}

static REGISTRATION: OnceLock<Registration> = OnceLock::new();

fn registration() -> &'static Registration {
    REGISTRATION.get_or_init(|| {
        let (config, warnings) = Config::load();
        let logger = logging::install(config.log_level());
        for warning in warnings {
            log::warn!("{}", warning);
        }
        log::info!(
            "fw-renderer {} loaded (ABI v{})",
            env!("CARGO_PKG_VERSION"),
            ABI_VERSION
        );

        Registration {
            renderer: Renderer::new(VulkanBackend, config),
            logger,
        }
    })
}

fn renderer() -> &'static Renderer<VulkanBackend> {
    &registration().renderer
}

/// Exported accessor. Null unless `version` is exactly [`ABI_VERSION`].
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn fwGetRendererAPI(version: u32) -> *const RendererApiTable {
    let result = panic::catch_unwind(|| {
        if version != ABI_VERSION {
            set_last_error(
                &Error::Unsupported {
                    requested: version,
                    supported: ABI_VERSION,
                }
                .to_string(),
            );
            return ptr::null();
        }

        registration();
        &TABLE as *const RendererApiTable
    });
    result.unwrap_or(ptr::null())
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Run `f`, map its outcome to a code and record failures.
fn guard(name: &'static str, f: impl FnOnce() -> Result<()>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => ResultCode::Ok.as_raw(),
        Ok(Err(e)) => {
            let code = e.code();
            set_last_error(&format!("{}: {}", name, e));
            if code.is_transient() {
                log::debug!("{}: {}", name, e);
            } else {
                log::error!("{}: {}", name, e);
            }
            code.as_raw()
        }
        Err(payload) => {
            let message = format!("{}: panicked: {}", name, panic_message(payload.as_ref()));
            set_last_error(&message);
            log::error!("{}", message);
            ResultCode::Unspecified.as_raw()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

fn tristate(value: i32) -> Option<bool> {
    (value >= 0).then_some(value != 0)
}

/// Type the host's raw handles for the surface code.
fn window_target(desc: &RendererDesc) -> Result<WindowTarget> {
    match desc.platform {
        PLATFORM_WIN32 => {
            let hwnd = NonZeroIsize::new(desc.window_handle as isize)
                .ok_or(Error::BadArgs("null window handle"))?;
            let mut window = Win32WindowHandle::new(hwnd);
            window.hinstance = NonZeroIsize::new(desc.display_handle as isize);

            Ok(WindowTarget {
                window: RawWindowHandle::Win32(window),
                display: RawDisplayHandle::Windows(WindowsDisplayHandle::new()),
            })
        }
        PLATFORM_XLIB => {
            if desc.window_handle.is_null() {
                return Err(Error::BadArgs("null window handle"));
            }
            let display = NonNull::new(desc.display_handle)
                .ok_or(Error::BadArgs("Xlib needs a Display connection"))?;

            Ok(WindowTarget {
                window: RawWindowHandle::Xlib(XlibWindowHandle::new(
                    desc.window_handle as usize as c_ulong,
                )),
                display: RawDisplayHandle::Xlib(XlibDisplayHandle::new(Some(display), 0)),
            })
        }
        PLATFORM_WAYLAND => {
            let surface =
                NonNull::new(desc.window_handle).ok_or(Error::BadArgs("null window handle"))?;
            let display = NonNull::new(desc.display_handle)
                .ok_or(Error::BadArgs("Wayland needs a wl_display"))?;

            Ok(WindowTarget {
                window: RawWindowHandle::Wayland(WaylandWindowHandle::new(surface)),
                display: RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display)),
            })
        }
        _ => Err(Error::BadArgs("unknown platform")),
    }
}

fn device_request(desc: &RendererDesc) -> Result<DeviceRequest> {
    Ok(DeviceRequest {
        window: window_target(desc)?,
        width: desc.width,
        height: desc.height,
        vsync: tristate(desc.vsync),
        validation: tristate(desc.validation),
        vertex_components: (desc.vertex_components != 0).then_some(desc.vertex_components),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

extern "C" fn fw_get_last_error() -> *const c_char {
    last_error_ptr()
}

extern "C" fn fw_set_logger(callback: Option<LogFn>, user: *mut c_void) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        let raw = callback.map_or(ptr::null_mut(), |f| f as *mut c_void);
        TABLE.header.log_cb.store(raw, Ordering::Release);
        TABLE.header.log_user.store(user, Ordering::Release);

        let logger = registration().logger;
        logger.set_sink(callback, user);
        logger.emit_to_host(Level::Info, "Logger installed");
    }));
}

unsafe extern "C" fn fw_create_device(desc: *const RendererDesc, out: *mut DeviceHandle) -> i32 {
    guard("create_device", || {
        let out = unsafe { out.as_mut() }.ok_or(Error::BadArgs("null handle out-pointer"))?;
        *out = 0;
        let desc = unsafe { desc.as_ref() }.ok_or(Error::BadArgs("null descriptor"))?;

        *out = renderer().create_device(&device_request(desc)?)?;
        Ok(())
    })
}

extern "C" fn fw_destroy_device(handle: DeviceHandle) {
    guard("destroy_device", || {
        renderer().destroy_device(handle);
        Ok(())
    });
}

extern "C" fn fw_resize_swapchain(handle: DeviceHandle, width: u32, height: u32) -> i32 {
    guard("resize_swapchain", || renderer().resize_swapchain(handle, width, height))
}

extern "C" fn fw_begin_frame(handle: DeviceHandle, r: f32, g: f32, b: f32, a: f32) -> i32 {
    guard("begin_frame", || renderer().begin_frame(handle, [r, g, b, a]))
}

extern "C" fn fw_end_frame(handle: DeviceHandle) -> i32 {
    guard("end_frame", || renderer().end_frame(handle))
}

extern "C" fn fw_present(handle: DeviceHandle) -> i32 {
    guard("present", || renderer().present(handle))
}

unsafe extern "C" fn fw_set_matrices(
    handle: DeviceHandle,
    view: *const f32,
    projection: *const f32,
    origin: *const f32,
) -> i32 {
    guard("set_matrices", || {
        let view = unsafe { view.cast::<[f32; 12]>().as_ref() }
            .ok_or(Error::BadArgs("null view matrix"))?;
        let projection = unsafe { projection.cast::<[f32; 16]>().as_ref() }
            .ok_or(Error::BadArgs("null projection matrix"))?;
        let origin = unsafe { origin.cast::<[f32; 3]>().as_ref() }
            .ok_or(Error::BadArgs("null origin"))?;

        renderer().set_matrices(handle, view, projection, origin)
    })
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn fw_draw_lines(
    handle: DeviceHandle,
    vertices: *const f32,
    count: u32,
    r: f32,
    g: f32,
    b: f32,
    a: f32,
    line_width: f32,
) -> i32 {
    guard("draw_lines", || {
        let renderer = renderer();
        let components = renderer.vertex_components(handle)?;
        if vertices.is_null() {
            return Err(Error::BadArgs("null vertex buffer"));
        }
        if count == 0 {
            return Err(Error::BadArgs("vertex count is zero"));
        }

        let capacity = renderer.staging_capacity(handle)?;
        let len = vertex_floats(count, components, capacity)?;
        let vertices = unsafe { std::slice::from_raw_parts(vertices, len) };
        renderer.draw_lines(handle, vertices, [r, g, b, a], line_width)
    })
}

/// Floats a draw reads, refused before any slice over host memory exists
/// when the staging buffer could never hold them.
fn vertex_floats(count: u32, components: u32, capacity: u64) -> Result<usize> {
    let floats = u64::from(count) * u64::from(components);
    let needed = floats * std::mem::size_of::<f32>() as u64;
    if needed > capacity {
        return Err(Error::StagingExhausted { needed, capacity });
    }
    Ok(floats as usize)
}

extern "C" fn fw_reserve_vertices(handle: DeviceHandle, count: u32) -> i32 {
    guard("reserve_vertices", || renderer().reserve_vertices(handle, count))
}
