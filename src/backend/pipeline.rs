// Graphics pipeline creation and management
//
// One render pass with a single color attachment (the swapchain image) and
// one fixed pipeline. Viewport and scissor are baked in, so both are rebuilt
// with the swapchain.

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::error::{native, RenderError, Result};
use super::shader::ShaderModule;
use super::swapchain::{Swapchain, SwapchainImageViews};

const SHADER_ENTRY_POINT: &CStr = c"main";

pub struct RenderPass {
    pub handle: vk::RenderPass,
    device: Arc<LogicalDevice>,
}

impl RenderPass {
    /// Clear on load, keep on store, hand the image over ready to present.
    pub fn new(device: Arc<LogicalDevice>, format: vk::Format) -> Result<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .build();

        // The clear must not start before the previous presentation of this
        // image has released it.
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .map_err(native("create Vulkan render pass"))?;

        Ok(Self { handle, device })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.handle, None);
        }
    }
}

/// Viewport covering the whole swapchain image.
pub fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<LogicalDevice>,
}

impl GraphicsPipeline {
    /// Build the pipeline for `render_pass` at the swapchain's extent.
    ///
    /// Vertex input is empty: the vertex shader generates its own positions.
    /// A vertex buffer would extend only the vertex input state.
    pub fn new(
        device: Arc<LogicalDevice>,
        swapchain: &Swapchain,
        render_pass: &RenderPass,
        vertex_bytecode: &[u8],
        fragment_bytecode: &[u8],
    ) -> Result<Self> {
        // Modules are only needed until the pipeline exists.
        let vert_shader = ShaderModule::new(device.clone(), "vertex", vertex_bytecode)?;
        let frag_shader = ShaderModule::new(device.clone(), "fragment", fragment_bytecode)?;

        let shader_stages = &[
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader.handle)
                .name(SHADER_ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader.handle)
                .name(SHADER_ENTRY_POINT)
                .build(),
        ];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = &[viewport_for(swapchain.extent)];
        let scissors = &[scissor_for(swapchain.extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        // Opaque: blending off, every channel written.
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ZERO)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(native("create Vulkan pipeline layout"))?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
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

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, code)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(RenderError::PipelineCreation { code });
            }
        };

        log::info!(
            "Successfully created graphics pipeline ({}x{})",
            swapchain.extent.width,
            swapchain.extent.height
        );

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// One framebuffer per swapchain image view, same order as the images.
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<LogicalDevice>,
}

impl Framebuffers {
    pub fn new(
        device: Arc<LogicalDevice>,
        image_views: &SwapchainImageViews,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut framebuffers = Self {
            framebuffers: Vec::with_capacity(image_views.views.len()),
            device,
        };

        for &image_view in &image_views.views {
            let attachments = &[image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { framebuffers.device.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(native("create Vulkan framebuffer"))?;
            framebuffers.framebuffers.push(framebuffer);
        }

        Ok(framebuffers)
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::swapchain::choose_extent;

    fn assert_same_viewport(a: &vk::Viewport, b: &vk::Viewport) {
        assert_eq!((a.x, a.y, a.width, a.height), (b.x, b.y, b.width, b.height));
        assert_eq!((a.min_depth, a.max_depth), (b.min_depth, b.max_depth));
    }

    #[test]
    fn viewport_and_scissor_cover_the_extent() {
        let extent = vk::Extent2D { width: 1280, height: 720 };
        let viewport = viewport_for(extent);
        assert_eq!((viewport.width, viewport.height), (1280.0, 720.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));

        let scissor = scissor_for(extent);
        assert_eq!(scissor.extent, extent);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
    }

    #[test]
    fn rebuilding_at_an_unchanged_extent_is_stable() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 2560, height: 1440 },
            ..Default::default()
        };

        let first = choose_extent(&capabilities, (640, 480));
        let second = choose_extent(&capabilities, (640, 480));

        assert_same_viewport(&viewport_for(first), &viewport_for(second));
        assert_eq!(scissor_for(first).extent, scissor_for(second).extent);
    }
}
