// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync, one set per frame in
// flight. They survive swapchain rebuilds.

use ash::vk;
use std::sync::Arc;

use super::device::LogicalDevice;
use super::error::{native, RenderError, Result};

/// Frames the CPU may run ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// One frame slot.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Starts signaled so the first wait on each slot returns immediately.
    pub in_flight_fence: vk::Fence,
    device: Arc<LogicalDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<LogicalDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let raw = &device.device;
        unsafe {
            let image_available = raw
                .create_semaphore(&semaphore_info, None)
                .map_err(native("create image-available semaphore"))?;
            let render_finished = match raw.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(code) => {
                    raw.destroy_semaphore(image_available, None);
                    return Err(RenderError::from_native("create render-finished semaphore", code));
                }
            };
            let in_flight_fence = match raw.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(code) => {
                    raw.destroy_semaphore(image_available, None);
                    raw.destroy_semaphore(render_finished, None);
                    return Err(RenderError::from_native("create in-flight fence", code));
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
                device: device.clone(),
            })
        }
    }

    /// Block until the GPU has finished the work last submitted on this slot.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                .map_err(|code| RenderError::from_frame("wait for in-flight fence", code))
        }
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_fences(&[self.in_flight_fence])
                .map_err(|code| RenderError::from_frame("reset in-flight fence", code))
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
