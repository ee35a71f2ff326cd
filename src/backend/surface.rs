// Presentation surfaces for host windows
//
// Win32, Xlib and Wayland. The host hands over raw handles; they are already
// typed raw-window-handle values by the time they get here.

use anyhow::{bail, Context, Result};
use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;

use crate::gpu::WindowTarget;

/// Instance extension needed to create a surface for `target`
pub fn required_extension(target: &WindowTarget) -> Result<&'static CStr> {
    Ok(match (target.display, target.window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(_)) => khr::Win32Surface::name(),
        (RawDisplayHandle::Xlib(_), RawWindowHandle::Xlib(_)) => khr::XlibSurface::name(),
        (RawDisplayHandle::Wayland(_), RawWindowHandle::Wayland(_)) => {
            khr::WaylandSurface::name()
        }
        _ => bail!("Unsupported window handle type"),
    })
}

/// # Safety
/// The handles in `target` must refer to a live window/display for as long
/// as the returned surface exists.
pub unsafe fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    target: &WindowTarget,
) -> Result<vk::SurfaceKHR> {
    match (target.display, target.window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as vk::HINSTANCE;
            let hwnd = handle.hwnd.get() as vk::HWND;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance)
                .create_win32_surface(&create_info, None)
                .context("Failed to create Win32 surface")
        }

        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .context("Xlib surface needs a Display connection")?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.as_ptr().cast())
                .window(handle.window);
            khr::XlibSurface::new(entry, instance)
                .create_xlib_surface(&create_info, None)
                .context("Failed to create Xlib surface")
        }

        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr().cast())
                .surface(handle.surface.as_ptr().cast());
            khr::WaylandSurface::new(entry, instance)
                .create_wayland_surface(&create_info, None)
                .context("Failed to create Wayland surface")
        }

        _ => bail!("Unsupported window handle type"),
    }
}
