// Shader modules
//
// SPIR-V is compiled by build.rs and embedded here. An empty blob means glslc
// was missing at build time; pipeline creation then fails cleanly.

use anyhow::{bail, Context, Result};
use ash::vk;
use std::io::Cursor;

use super::VulkanDevice;
use crate::pipeline::VertexLayout;

const LINES_XY_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/lines_xy.vert.spv"));
const LINES_XYZ_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/lines_xyz.vert.spv"));
pub const FRAGMENT_SPIRV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/solid_color.frag.spv"));

/// Passthrough vertex shader matching the vertex layout
pub fn vertex_spirv(layout: VertexLayout) -> &'static [u8] {
    match layout {
        VertexLayout::Xy => LINES_XY_VERT,
        VertexLayout::Xyz => LINES_XYZ_VERT,
    }
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    if code.is_empty() {
        bail!("shader blobs unavailable (glslc was not found when the crate was built)");
    }

    // read_spv copies into properly aligned words
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Invalid SPIR-V")?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}
