// Command pool and pre-recorded per-image command buffers

use ash::vk;
use std::sync::Arc;

use super::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use super::LogicalDevice;
use crate::error::InitError;

/// Vertices of the procedural triangle.
const TRIANGLE_VERTEX_COUNT: u32 = 3;

pub fn clear_value(color: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }
}

pub struct CommandPool {
    pub pool: vk::CommandPool,
    /// Indexed by chain image.
    pub buffers: Vec<vk::CommandBuffer>,
    device: Arc<LogicalDevice>,
}

impl CommandPool {
    /// Pool on the graphics family with one primary buffer per chain image.
    pub fn new(device: &Arc<LogicalDevice>, count: usize) -> Result<Self, InitError> {
        let pool_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(device.queues.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(InitError::creation("create command pool"))?;

        let mut commands = Self {
            pool,
            buffers: Vec::new(),
            device: device.clone(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        commands.buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .map_err(InitError::creation("allocate command buffers"))?;

        Ok(commands)
    }

    /// Record the whole frame once per image: clear, bind, draw the triangle.
    pub fn record(
        &self,
        render_pass: &RenderPass,
        framebuffers: &Framebuffers,
        pipeline: &GraphicsPipeline,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Result<(), InitError> {
        let device = &self.device.device;
        let clear_values = [clear_value(clear_color)];

        for (&cmd, &framebuffer) in self.buffers.iter().zip(&framebuffers.handles) {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass.handle)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            unsafe {
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .map_err(InitError::creation("begin recording command buffer"))?;
                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
                device.cmd_draw(cmd, TRIANGLE_VERTEX_COUNT, 1, 0, 0);
                device.cmd_end_render_pass(cmd);
                device
                    .end_command_buffer(cmd)
                    .map_err(InitError::creation("record command buffer"))?;
            }
        }

        log::debug!("Recorded {} command buffers", self.buffers.len());
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        log::debug!("Destroying command pool");
        // Buffers go with the pool
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}
