// Render session
//
// Owns every Vulkan object for one window and feeds the frame scheduler.
// Long-lived pieces (instance, surface, device, command pool, frame slots)
// are built once; everything sized by the swapchain sits in an Option so it
// can be torn down and rebuilt as a unit.

use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::commands::CommandPool;
use crate::backend::device::{select_physical_device, LogicalDevice};
use crate::backend::error::{RenderError, Result};
use crate::backend::instance::{Instance, InstanceConfig};
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use crate::backend::shader;
use crate::backend::surface::{Surface, SurfaceProvider};
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome, Swapchain, SwapchainImageViews};
use crate::backend::sync::{FrameSync, MAX_FRAMES_IN_FLIGHT};
use crate::frame::{self, FrameBackend, FrameScheduler, FrameStatus, SwapchainLifecycle};

/// Everything a session needs besides the window.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub app_name: String,
    pub instance: InstanceConfig,
    /// Present modes in order of preference; FIFO is the fallback.
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

pub struct RenderSession {
    scheduler: FrameScheduler,
    gpu: GpuResources,
}

impl RenderSession {
    /// Bring up the whole chain: instance, surface, device, then the
    /// swapchain-dependent objects if the window has a drawable area.
    pub fn new(window: Arc<dyn SurfaceProvider>, settings: SessionSettings) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // Read once; every pipeline rebuild reuses these bytes.
        let vertex_bytecode = shader::read_bytecode(&settings.vertex_shader)?;
        let fragment_bytecode = shader::read_bytecode(&settings.fragment_shader)?;

        let instance = Instance::new(&settings.app_name, &settings.instance, window.as_ref())?;
        let surface = Surface::new(instance.clone(), window.as_ref())?;
        let physical = select_physical_device(&instance, &surface)?;
        let device = LogicalDevice::new(instance, physical, &surface)?;
        log::info!(
            "Vulkan diagnostics {}",
            if device.instance.diagnostics_enabled() { "enabled" } else { "disabled" }
        );

        let command_pool = CommandPool::new(device.clone())?;
        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;

        let mut session = Self {
            scheduler: FrameScheduler::new(MAX_FRAMES_IN_FLIGHT),
            gpu: GpuResources {
                frames,
                command_buffers: Vec::new(),
                command_pool,
                framebuffers: None,
                pipeline: None,
                render_pass: None,
                image_views: None,
                swapchain: None,
                device,
                surface,
                window,
                vertex_bytecode,
                fragment_bytecode,
                present_modes: settings.present_modes,
                clear_color: settings.clear_color,
                wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            },
        };

        match frame::rebuild_swapchain(&mut session.gpu) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                log::info!("Window has no drawable area yet, deferring swapchain creation");
                session.scheduler.mark_stale();
            }
            Err(e) => return Err(e),
        }

        log::info!("Vulkan initialized successfully");
        Ok(session)
    }

    /// Render one frame.
    ///
    /// `Ok(None)` means nothing was drawn: the window is minimised, or the
    /// swapchain went out of date mid-rebuild and will be retried next frame.
    pub fn draw_frame(&mut self) -> Result<Option<FrameStatus>> {
        if self.gpu.is_minimised() {
            self.scheduler.mark_stale();
            return Ok(None);
        }

        match self.scheduler.draw_frame(&mut self.gpu) {
            Ok(status) => Ok(Some(status)),
            Err(e) if e.is_recoverable() => {
                log::debug!("{}, retrying next frame", e);
                self.scheduler.mark_stale();
                Ok(None)
            }
            Err(e) => {
                log::error!("Fatal render error while {:?}: {}", self.scheduler.phase(), e);
                Err(e)
            }
        }
    }

    /// The window changed size or mode; rebuild before the next acquire.
    pub fn mark_stale(&mut self) {
        self.scheduler.mark_stale();
    }

    pub fn frame_counter(&self) -> u64 {
        self.scheduler.frame_counter()
    }

    pub fn device_name(&self) -> &str {
        &self.gpu.device.physical.name
    }

    /// Mode the current swapchain presents with, if one exists.
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.gpu.swapchain.as_ref().map(|swapchain| swapchain.present_mode)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.gpu.device.wait_idle()
    }
}

/// The Vulkan objects driven by the scheduler.
///
/// Fields drop top to bottom, which is the teardown order: frame slots,
/// command pool, swapchain-dependent objects, device, surface. The instance
/// goes with the last handle to it.
struct GpuResources {
    frames: Vec<FrameSync>,
    // Owned by the pool; freed explicitly on rebuild.
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: CommandPool,

    framebuffers: Option<Framebuffers>,
    pipeline: Option<GraphicsPipeline>,
    render_pass: Option<RenderPass>,
    image_views: Option<SwapchainImageViews>,
    swapchain: Option<Swapchain>,

    device: Arc<LogicalDevice>,
    surface: Surface,
    window: Arc<dyn SurfaceProvider>,

    vertex_bytecode: Vec<u8>,
    fragment_bytecode: Vec<u8>,
    present_modes: Vec<vk::PresentModeKHR>,
    clear_color: [f32; 4],
    wait_stages: [vk::PipelineStageFlags; 1],
}

fn built<'a, T>(slot: &'a Option<T>, what: &'static str) -> Result<&'a T> {
    slot.as_ref().ok_or(RenderError::NotBuilt(what))
}

impl GpuResources {
    fn is_minimised(&self) -> bool {
        let (width, height) = self.window.drawable_size();
        width == 0 || height == 0
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        built(&self.swapchain, "swapchain")
    }

    fn frame(&self, slot: usize) -> &FrameSync {
        &self.frames[slot % self.frames.len()]
    }
}

impl FrameBackend for GpuResources {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.frame(slot).wait()
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.frame(slot).reset()
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frame(slot).image_available;
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let frame = self.frame(slot);
        let command_buffer = *self
            .command_buffers
            .get(image_index as usize)
            .ok_or(RenderError::NotBuilt("command buffer"))?;

        let wait_semaphores = [frame.image_available];
        let signal_semaphores = [frame.render_finished];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], frame.in_flight_fence)
        }
        .map_err(|code| RenderError::from_frame("submit draw command buffer", code))
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.frame(slot).render_finished;
        self.swapchain()?
            .present(self.device.presentation_queue, image_index, &[render_finished])
    }
}

impl SwapchainLifecycle for GpuResources {
    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn release_swapchain(&mut self) -> Result<()> {
        self.command_pool.free(&self.command_buffers);
        self.command_buffers.clear();

        self.framebuffers = None;
        self.pipeline = None;
        self.render_pass = None;
        self.image_views = None;
        self.swapchain = None;
        Ok(())
    }

    fn create_swapchain(&mut self) -> Result<()> {
        // The window can be minimised between the frame's size check and a
        // rebuild triggered by acquire or present.
        if self.is_minimised() {
            return Err(RenderError::SurfaceOutOfDate);
        }
        let drawable = self.window.drawable_size();
        self.swapchain = Some(Swapchain::new(
            self.device.clone(),
            &self.surface,
            drawable,
            &self.present_modes,
            None,
        )?);
        Ok(())
    }

    fn create_image_views(&mut self) -> Result<()> {
        let views = SwapchainImageViews::new(self.device.clone(), self.swapchain()?)?;
        self.image_views = Some(views);
        Ok(())
    }

    fn create_render_pass(&mut self) -> Result<()> {
        let format = self.swapchain()?.format;
        self.render_pass = Some(RenderPass::new(self.device.clone(), format)?);
        Ok(())
    }

    fn create_pipeline(&mut self) -> Result<()> {
        let pipeline = GraphicsPipeline::new(
            self.device.clone(),
            self.swapchain()?,
            built(&self.render_pass, "render pass")?,
            &self.vertex_bytecode,
            &self.fragment_bytecode,
        )?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn create_framebuffers(&mut self) -> Result<()> {
        let framebuffers = Framebuffers::new(
            self.device.clone(),
            built(&self.image_views, "image views")?,
            built(&self.render_pass, "render pass")?,
            self.swapchain()?.extent,
        )?;
        self.framebuffers = Some(framebuffers);
        Ok(())
    }

    fn record_command_buffers(&mut self) -> Result<()> {
        self.command_buffers = self.command_pool.record(
            built(&self.framebuffers, "framebuffers")?,
            built(&self.render_pass, "render pass")?,
            built(&self.pipeline, "graphics pipeline")?,
            self.swapchain()?.extent,
            self.clear_color,
        )?;
        Ok(())
    }
}

impl Drop for GpuResources {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Nothing may be destroyed while the GPU still uses it.
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before teardown: {}", e);
        }
    }
}
