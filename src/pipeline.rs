// The fixed line pipeline: vertex passthrough + solid colour fragment,
// line-strip topology, viewport/scissor/line width set per frame.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::gpu::GpuDevice;

/// Per-vertex float components. Fixed for the lifetime of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    Xy,
    Xyz,
}

impl VertexLayout {
    pub fn from_components(components: u32) -> Option<Self> {
        match components {
            2 => Some(VertexLayout::Xy),
            3 => Some(VertexLayout::Xyz),
            _ => None,
        }
    }

    pub const fn components(self) -> u32 {
        match self {
            VertexLayout::Xy => 2,
            VertexLayout::Xyz => 3,
        }
    }

    pub const fn stride(self) -> u32 {
        self.components() * std::mem::size_of::<f32>() as u32
    }

    pub const fn format(self) -> vk::Format {
        match self {
            VertexLayout::Xy => vk::Format::R32G32_SFLOAT,
            VertexLayout::Xyz => vk::Format::R32G32B32_SFLOAT,
        }
    }
}

pub const LINE_TOPOLOGY: vk::PrimitiveTopology = vk::PrimitiveTopology::LINE_STRIP;

pub const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::LINE_WIDTH,
];

/// Push-constant block, fragment stage only.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorPush {
    pub rgba: [f32; 4],
}

pub const COLOR_PUSH_BYTES: u32 = std::mem::size_of::<ColorPush>() as u32;

#[derive(Debug, Clone, Copy)]
pub struct LinePipelineDesc {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub vertex: VertexLayout,
    pub topology: vk::PrimitiveTopology,
    pub dynamic_states: &'static [vk::DynamicState],
}

/// Everything one line-strip draw needs inside an open render pass.
#[derive(Debug, Clone, Copy)]
pub struct LineDraw {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub color: ColorPush,
    pub line_width: f32,
}

/// Colour render pass; its format is the swapchain format it was built for.
#[derive(Debug, Clone, Copy)]
pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub format: vk::Format,
}

impl RenderPass {
    pub fn create<G: GpuDevice>(gpu: &mut G, format: vk::Format) -> Result<Self> {
        let handle = gpu.create_render_pass(format)?;
        Ok(Self { handle, format })
    }

    pub fn destroy<G: GpuDevice>(self, gpu: &mut G) {
        gpu.destroy_render_pass(self.handle);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinePipeline {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub vertex: VertexLayout,
}

impl LinePipeline {
    pub fn create<G: GpuDevice>(
        gpu: &mut G,
        render_pass: vk::RenderPass,
        vertex: VertexLayout,
    ) -> Result<Self> {
        let layout = gpu.create_pipeline_layout(COLOR_PUSH_BYTES)?;
        let pipeline = match gpu.create_line_pipeline(&Self::desc(render_pass, layout, vertex)) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                gpu.destroy_pipeline_layout(layout);
                return Err(e);
            }
        };

        Ok(Self {
            layout,
            pipeline,
            vertex,
        })
    }

    /// Rebuild the pipeline object against another render pass, keeping the
    /// layout. The old pipeline is only released once the new one exists.
    pub fn rebuild<G: GpuDevice>(
        &mut self,
        gpu: &mut G,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        let desc = Self::desc(render_pass, self.layout, self.vertex);
        let pipeline = gpu.create_line_pipeline(&desc)?;
        gpu.destroy_pipeline(std::mem::replace(&mut self.pipeline, pipeline));
        Ok(())
    }

    pub fn destroy<G: GpuDevice>(self, gpu: &mut G) {
        gpu.destroy_pipeline(self.pipeline);
        gpu.destroy_pipeline_layout(self.layout);
    }

    fn desc(
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        vertex: VertexLayout,
    ) -> LinePipelineDesc {
        LinePipelineDesc {
            render_pass,
            layout,
            vertex,
            topology: LINE_TOPOLOGY,
            dynamic_states: &DYNAMIC_STATES,
        }
    }
}
