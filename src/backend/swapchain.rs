// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The swapchain and everything sized from it are rebuilt wholesale when the
// surface goes stale; nothing here is mutated in place.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::device::{LogicalDevice, QueueFamilyIndices};
use super::error::{native, RenderError, Result};
use super::surface::Surface;

/// 8 bits per channel in the sRGB non-linear color space.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// A single reported format is used as-is; a single UNDEFINED entry means the
/// surface accepts anything. Otherwise take the preferred format if listed,
/// else the first one.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(PREFERRED_SURFACE_FORMAT),
        [only] => Some(*only),
        _ => formats
            .iter()
            .find(|f| f.format == PREFERRED_SURFACE_FORMAT.format && f.color_space == PREFERRED_SURFACE_FORMAT.color_space)
            .or_else(|| formats.first())
            .copied(),
    }
}

/// First preferred low-latency mode the surface supports, otherwise FIFO,
/// which every implementation must support.
pub fn choose_present_mode(supported: &[vk::PresentModeKHR], preferred: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    preferred
        .iter()
        .copied()
        .find(|mode| supported.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, clamped to the maximum when there is one
/// (a maximum of 0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// Drawable size clamped component-wise into the surface's extent bounds.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, drawable: (u32, u32)) -> vk::Extent2D {
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: drawable.0.clamp(min.width, max.width.max(min.width)),
        height: drawable.1.clamp(min.height, max.height.max(min.height)),
    }
}

/// A zero-area extent cannot back a swapchain. Reported as out of date so the
/// caller rebuilds again once the window has a size.
pub fn require_drawable(extent: vk::Extent2D) -> Result<vk::Extent2D> {
    if extent.width == 0 || extent.height == 0 {
        log::debug!("Surface has no drawable area, postponing swapchain creation");
        return Err(RenderError::SurfaceOutOfDate);
    }
    Ok(extent)
}

/// Exclusive when one family does both jobs, otherwise concurrent across
/// both families so no ownership transfers are needed.
pub fn sharing_mode(indices: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if indices.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![indices.graphics, indices.presentation])
    }
}

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image index; a suboptimal swapchain still counts as acquired.
    Acquired(u32),
    OutOfDate,
}

/// Result of a present request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    OutOfDate,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    // Keeps the device alive until the swapchain is gone.
    _device: Arc<LogicalDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<LogicalDevice>,
        surface: &Surface,
        drawable: (u32, u32),
        preferred_modes: &[vk::PresentModeKHR],
        previous: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let physical = &device.physical;

        // Formats and modes are re-queried: they can change with the surface.
        let capabilities = surface.capabilities(physical.handle)?;
        let formats = surface.formats(physical.handle)?;
        let present_modes = surface.present_modes(physical.handle)?;

        let surface_format = choose_surface_format(&formats).ok_or(RenderError::Initialization {
            what: "choose a surface format",
            code: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        for mode in &present_modes {
            log::debug!("Found available presentation mode: {:?}", mode);
        }
        let present_mode = choose_present_mode(&present_modes, preferred_modes);
        let image_count = choose_image_count(&capabilities);
        let extent = require_drawable(choose_extent(&capabilities, drawable))?;
        let (sharing, family_indices) = sharing_mode(&device.queue_families);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}/{:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            surface_format.format,
            surface_format.color_space,
            present_mode
        );

        let swapchain_loader = khr::Swapchain::new(&device.instance.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(previous.unwrap_or_else(vk::SwapchainKHR::null));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(native("create Vulkan swapchain"))?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(code) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RenderError::from_native("retrieve swapchain images", code));
            }
        };

        log::info!("Successfully created Vulkan swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            format: surface_format.format,
            present_mode,
            extent,
            _device: device,
        })
    }

    /// Acquire next image for rendering; `semaphore` is signaled once the
    /// image can be written.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, _suboptimal)) => Ok(AcquireOutcome::Acquired(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(code) => Err(RenderError::from_frame("acquire next Vulkan image", code)),
        }
    }

    /// Present rendered image to screen
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            // Suboptimal is cosmetic.
            Ok(_suboptimal) => Ok(PresentOutcome::Presented),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(code) => Err(RenderError::from_frame("present Vulkan queue", code)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// One color view per swapchain image.
pub struct SwapchainImageViews {
    pub views: Vec<vk::ImageView>,
    device: Arc<LogicalDevice>,
}

impl SwapchainImageViews {
    pub fn new(device: Arc<LogicalDevice>, swapchain: &Swapchain) -> Result<Self> {
        // Built incrementally so a failure part way still releases the views
        // already created.
        let mut image_views = Self {
            views: Vec::with_capacity(swapchain.images.len()),
            device,
        };

        for &image in &swapchain.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(swapchain.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { image_views.device.device.create_image_view(&create_info, None) }
                .map_err(native("create image view"))?;
            image_views.views.push(view);
        }

        log::info!("Successfully created Vulkan swapchain image views");
        Ok(image_views)
    }
}

impl Drop for SwapchainImageViews {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.device.destroy_image_view(view, None);
            }
        }
    }
}
