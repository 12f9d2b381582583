// Render pass, graphics pipeline and framebuffers
//
// Everything here is built once against the chain's format and extent and
// stays immutable afterwards. The fixed-function state is assembled by small
// free functions so it can be checked without a device.

use ash::vk;
use std::sync::Arc;

use super::shader::{ShaderModule, SHADER_ENTRY_POINT};
use super::LogicalDevice;
use crate::error::InitError;

/// The presentable color attachment: cleared on load, kept on store.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
        .build()
}

pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent)
        .build()
}

/// Filled, back-face culled, clockwise front faces.
pub fn rasterization_state() -> vk::PipelineRasterizationStateCreateInfo {
    vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false)
        .build()
}

/// Opaque writes to all four channels.
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build()
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    device: Arc<LogicalDevice>,
}

impl RenderPass {
    pub fn new(device: &Arc<LogicalDevice>, format: vk::Format) -> Result<Self, InitError> {
        let attachments = [color_attachment(format)];

        let color_attachment_refs = [vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)
            .build()];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);

        let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .map_err(InitError::creation("create render pass"))?;

        Ok(Self { handle, device: device.clone() })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        log::debug!("Destroying render pass");
        unsafe { self.device.device.destroy_render_pass(self.handle, None) };
    }
}

pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<LogicalDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<LogicalDevice>,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        vertex_code: &[u32],
        fragment_code: &[u32],
    ) -> Result<Self, InitError> {
        // Both modules are released when this function returns
        let vert_module = ShaderModule::new(device, vertex_code)?;
        let frag_module = ShaderModule::new(device, fragment_code)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module.handle)
                .name(SHADER_ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module.handle)
                .name(SHADER_ENTRY_POINT)
                .build(),
        ];

        // Geometry comes from gl_VertexIndex, so no bindings or attributes
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [viewport(extent)];
        let scissors = [scissor(extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = rasterization_state();

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .alpha_to_one_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(InitError::creation("create pipeline layout"))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.handle)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        match pipelines {
            Ok(pipelines) => {
                log::info!("Graphics pipeline created");
                Ok(Self {
                    pipeline: pipelines[0],
                    layout,
                    device: device.clone(),
                })
            }
            Err((_, result)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(InitError::Creation { what: "create graphics pipeline", result })
            }
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        log::debug!("Destroying graphics pipeline");
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// One framebuffer per chain image view, indexed like the chain.
pub struct Framebuffers {
    pub handles: Vec<vk::Framebuffer>,
    device: Arc<LogicalDevice>,
}

impl Framebuffers {
    pub fn new(
        device: &Arc<LogicalDevice>,
        render_pass: &RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self, InitError> {
        let mut framebuffers = Self {
            handles: Vec::with_capacity(image_views.len()),
            device: device.clone(),
        };

        for &image_view in image_views {
            let attachments = [image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let handle = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(InitError::creation("create framebuffer"))?;
            framebuffers.handles.push(handle);
        }

        Ok(framebuffers)
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        log::debug!("Destroying {} framebuffers", self.handles.len());
        for &framebuffer in &self.handles {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}
