// =============================================================================
// LINES HOST - minimal winit host for the fw-renderer C table
// =============================================================================
//
// Behaves like an external host would: resolve the table, describe the window
// with raw handles, forward resizes and drive one frame per redraw.
//
//   cargo run --features demo-host --bin lines-host
//
// ESC quits. Shrinking the window to nothing pauses drawing.
// =============================================================================

use std::ffi::{c_void, CStr};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

use fw_renderer::abi::{PLATFORM_WAYLAND, PLATFORM_WIN32, PLATFORM_XLIB};
use fw_renderer::{
    fwGetRendererAPI, DeviceHandle, RendererApiTable, RendererDesc, ResultCode, ABI_VERSION,
};

const SEGMENTS: usize = 96;

fn main() -> Result<()> {
    let table = fwGetRendererAPI(ABI_VERSION);
    if table.is_null() {
        bail!("renderer refused ABI v{}", ABI_VERSION);
    }
    // SAFETY: the table is a static inside the library
    let table = unsafe { &*table };

    let event_loop = EventLoop::new()?;
    let mut host = LinesHost::new(table);
    event_loop.run_app(&mut host)?;
    Ok(())
}

fn last_error(table: &RendererApiTable) -> String {
    unsafe { CStr::from_ptr((table.header.get_last_error)()) }
        .to_string_lossy()
        .into_owned()
}

/// Translate winit's raw handles into the descriptor layout.
fn describe(window: &Window) -> Result<RendererDesc> {
    let size = window.inner_size();
    let raw_window = window.window_handle()?.as_raw();
    let raw_display = window.display_handle()?.as_raw();

    let (platform, window_handle, display_handle) = match (raw_window, raw_display) {
        (RawWindowHandle::Win32(w), _) => (
            PLATFORM_WIN32,
            w.hwnd.get() as *mut c_void,
            w.hinstance.map_or(std::ptr::null_mut(), |h| h.get() as *mut c_void),
        ),
        (RawWindowHandle::Xlib(w), RawDisplayHandle::Xlib(d)) => (
            PLATFORM_XLIB,
            w.window as usize as *mut c_void,
            d.display.map_or(std::ptr::null_mut(), |p| p.as_ptr()),
        ),
        (RawWindowHandle::Wayland(w), RawDisplayHandle::Wayland(d)) => {
            (PLATFORM_WAYLAND, w.surface.as_ptr(), d.display.as_ptr())
        }
        (other, _) => bail!("windowing system not supported by the renderer: {:?}", other),
    };

    Ok(RendererDesc {
        window_handle,
        display_handle,
        platform,
        width: size.width,
        height: size.height,
        vsync: -1,
        validation: -1,
        vertex_components: 2,
    })
}

struct LinesHost {
    table: &'static RendererApiTable,
    window: Option<Window>,
    device: DeviceHandle,
    vertices: Vec<f32>,
    started: Instant,
}

impl LinesHost {
    fn new(table: &'static RendererApiTable) -> Self {
        Self {
            table,
            window: None,
            device: 0,
            vertices: Vec::with_capacity((SEGMENTS + 1) * 2),
            started: Instant::now(),
        }
    }

    fn create_device(&mut self, window: &Window) -> Result<()> {
        let desc = describe(window)?;
        let mut handle = 0;
        let code = unsafe { (self.table.create_device)(&desc, &mut handle) };
        if code != ResultCode::Ok.as_raw() {
            bail!("create_device failed ({}): {}", code, last_error(self.table));
        }

        let code = (self.table.reserve_vertices)(handle, (SEGMENTS + 1) as u32);
        if code != ResultCode::Ok.as_raw() {
            log::warn!("reserve_vertices: {}", last_error(self.table));
        }

        self.device = handle;
        Ok(())
    }

    /// A rose curve that slowly turns.
    fn build_curve(&mut self) {
        let t = self.started.elapsed().as_secs_f32();
        self.vertices.clear();
        for i in 0..=SEGMENTS {
            let theta = i as f32 / SEGMENTS as f32 * std::f32::consts::TAU;
            let r = 0.8 * (3.0 * theta + t * 0.5).cos();
            self.vertices.push(r * (theta + t * 0.2).cos());
            self.vertices.push(r * (theta + t * 0.2).sin());
        }
    }

    fn render(&mut self) -> Result<()> {
        let t = self.table;
        let device = self.device;

        match (t.begin_frame)(device, 0.02, 0.02, 0.05, 1.0) {
            0 => {}
            code if is_transient(code) => return Ok(()),
            code => bail!("begin_frame failed ({}): {}", code, last_error(t)),
        }

        self.build_curve();
        let count = (self.vertices.len() / 2) as u32;
        let code = unsafe {
            (t.draw_lines)(device, self.vertices.as_ptr(), count, 0.3, 0.9, 0.6, 1.0, 2.0)
        };
        if code != 0 {
            log::warn!("draw_lines ({}): {}", code, last_error(t));
        }

        let code = (t.end_frame)(device);
        if code != 0 {
            bail!("end_frame failed ({}): {}", code, last_error(t));
        }

        match (t.present)(device) {
            0 => Ok(()),
            code if is_transient(code) => Ok(()),
            code => bail!("present failed ({}): {}", code, last_error(t)),
        }
    }
}

fn is_transient(code: i32) -> bool {
    code == ResultCode::NotReady.as_raw() || code == ResultCode::OutOfDate.as_raw()
}

impl ApplicationHandler for LinesHost {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title("fw-renderer lines")
            .with_inner_size(winit::dpi::PhysicalSize::new(960, 640));

        let created = event_loop
            .create_window(attributes)
            .context("Failed to create window")
            .and_then(|window| self.create_device(&window).map(|()| window));

        match created {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                log::error!("{:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::Resized(size) => {
                let code = (self.table.resize_swapchain)(self.device, size.width, size.height);
                if code != 0 && !is_transient(code) {
                    log::error!("resize_swapchain: {}", last_error(self.table));
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    log::error!("{:#}", e);
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};
                let escape = event.physical_key == PhysicalKey::Code(KeyCode::Escape);
                if event.state.is_pressed() && escape {
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for LinesHost {
    fn drop(&mut self) {
        // the device must go before the window it renders into
        (self.table.destroy_device)(self.device);
    }
}
