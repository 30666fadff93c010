// Command pool and pre-recorded command buffers
//
// Content is static, so each swapchain image gets one buffer recorded right
// after the swapchain is (re)built and resubmitted every frame that image is
// acquired.

use ash::vk;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::error::{native, Result};
use super::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<LogicalDevice>,
}

impl CommandPool {
    /// Pool on the graphics family; it outlives every swapchain generation.
    pub fn new(device: Arc<LogicalDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder().queue_family_index(device.queue_families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(native("create Vulkan command pool"))?;

        Ok(Self { pool, device })
    }

    /// Allocate and record one buffer per framebuffer: clear, bind, draw a
    /// triangle, end.
    pub fn record(
        &self,
        framebuffers: &Framebuffers,
        render_pass: &RenderPass,
        pipeline: &GraphicsPipeline,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Result<Vec<vk::CommandBuffer>> {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.framebuffers.len() as u32);

        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(native("allocate Vulkan command buffers"))?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];

        let recorded = command_buffers
            .iter()
            .zip(&framebuffers.framebuffers)
            .try_for_each(|(&cmd, &framebuffer)| unsafe {
                let begin_info =
                    vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .map_err(native("begin command buffer"))?;

                let render_pass_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass.handle)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(&clear_values);

                device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
                device.cmd_draw(cmd, 3, 1, 0, 0);
                device.cmd_end_render_pass(cmd);

                device.end_command_buffer(cmd).map_err(native("end command buffer"))
            });

        if let Err(e) = recorded {
            self.free(&command_buffers);
            return Err(e);
        }

        log::info!("Created {} pre-recorded command buffers", command_buffers.len());
        Ok(command_buffers)
    }

    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.device.free_command_buffers(self.pool, command_buffers);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees every buffer allocated from the pool.
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
