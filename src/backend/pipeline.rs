// Render pass, framebuffers and the line pipeline
//
// One colour attachment (the swapchain image), cleared on load and handed to
// the presentation engine at the end of the pass. No depth.

use anyhow::{Context, Result};
use ash::vk;

use super::{shader, VulkanDevice};
use crate::pipeline::LinePipelineDesc;

pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .build()];

    // The acquire semaphore is waited on at COLOR_ATTACHMENT_OUTPUT
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&create_info, None) }
        .context("Failed to create colour render pass")
}

pub fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let attachments = &[view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
        .context("Failed to create framebuffer")
}

/// Layout with one fragment-stage push-constant range at offset 0
pub fn create_pipeline_layout(
    device: &VulkanDevice,
    push_constant_bytes: u32,
) -> Result<vk::PipelineLayout> {
    let ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: push_constant_bytes,
    }];
    let create_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(&ranges);

    unsafe { device.device.create_pipeline_layout(&create_info, None) }
        .context("Failed to create pipeline layout")
}

pub fn create_line_pipeline(
    device: &VulkanDevice,
    desc: &LinePipelineDesc,
) -> Result<vk::Pipeline> {
    let vertex = shader::create_shader_module(device, shader::vertex_spirv(desc.vertex))?;
    let fragment = match shader::create_shader_module(device, shader::FRAGMENT_SPIRV) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vertex, None) };
            return Err(e);
        }
    };

    let result = build_pipeline(device, desc, vertex, fragment);

    // Modules are only needed while the pipeline is being created
    unsafe {
        device.device.destroy_shader_module(fragment, None);
        device.device.destroy_shader_module(vertex, None);
    }
    result
}

fn build_pipeline(
    device: &VulkanDevice,
    desc: &LinePipelineDesc,
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let entry_point = c"main";
    let stages = [
        (vk::ShaderStageFlags::VERTEX, vertex),
        (vk::ShaderStageFlags::FRAGMENT, fragment),
    ]
    .map(|(stage, module)| {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(module)
            .name(entry_point)
            .build()
    });

    // Position only, tightly packed
    let bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: desc.vertex.stride(),
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes = [vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: desc.vertex.format(),
        offset: 0,
    }];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        topology: desc.topology,
        ..Default::default()
    };

    // Viewport, scissor and line width come from the command buffer
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo {
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };

    let blend_attachments = [vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        ..Default::default()
    }];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(desc.dynamic_states);

    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| e)
    .context("Failed to create line pipeline")?;

    pipelines
        .into_iter()
        .next()
        .context("Driver returned no pipeline")
}
