// fw-renderer - native Vulkan line renderer behind a versioned C ABI
//
// The host loads the library, resolves `fwGetRendererAPI` and drives one or
// more devices through the returned function table:
//
//   create_device -> (resize_swapchain)*
//     -> { begin_frame -> draw_lines* -> end_frame -> present }*
//     -> destroy_device
//
// Layering, top to bottom:
// - abi: C table, argument decoding, panic containment, last-error slot
// - api: typed RendererApi and the device handle registry
// - context, frame: per-device lifecycle and frame state machine
// - swapchain, sync, staging, pipeline: the pieces a device owns
// - gpu: the device interface the core is written against
// - backend: the ash implementation of that interface

pub mod abi;
pub mod api;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod logging;
pub mod pipeline;
pub mod staging;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod mock;

pub use abi::{fwGetRendererAPI, RendererApiTable, RendererDesc, ABI_VERSION};
pub use api::{DeviceHandle, DeviceRequest, Renderer, RendererApi};
pub use backend::VulkanBackend;
pub use config::Config;
pub use error::{Error, Result, ResultCode};
