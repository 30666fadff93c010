// Vulkan device - physical adapter selection and the logical device
//
// Responsibilities:
// - Enumerate physical devices and gather what selection needs
// - Filter by suitability, then prefer discrete over integrated
// - Resolve graphics + presentation queue families
// - Logical device + queue creation

use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::fmt;
use std::sync::Arc;

use super::error::{native, RenderError, Result};
use super::instance::{as_ptrs, Instance};
use super::surface::Surface;

/// A physical adapter together with its capabilities against one surface.
///
/// Immutable once selected.
#[derive(Debug, Clone)]
pub struct GraphicsDevice {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub extensions: Vec<String>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

/// Why a candidate adapter was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsuitable {
    MissingExtension(String),
    NoSurfaceFormats,
    NoPresentModes,
}

impl fmt::Display for Unsuitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsuitable::MissingExtension(name) => write!(f, "device extension {} not supported", name),
            Unsuitable::NoSurfaceFormats => f.write_str("no image formats supported"),
            Unsuitable::NoPresentModes => f.write_str("no presentation modes supported"),
        }
    }
}

impl GraphicsDevice {
    /// Gather everything selection needs. Runs after the surface exists so
    /// formats and modes reflect this device + surface pairing.
    pub fn query(instance: &Instance, surface: &Surface, handle: vk::PhysicalDevice) -> Result<Self> {
        let properties = unsafe { instance.instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let extensions = unsafe { instance.instance.enumerate_device_extension_properties(handle) }
            .map_err(native("enumerate device extensions"))?
            .iter()
            .map(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) }.to_string_lossy().into_owned())
            .collect();

        let queue_families = unsafe { instance.instance.get_physical_device_queue_family_properties(handle) };

        Ok(Self {
            handle,
            name,
            device_type: properties.device_type,
            extensions,
            surface_formats: surface.formats(handle)?,
            present_modes: surface.present_modes(handle)?,
            queue_families,
        })
    }

    pub fn is_discrete(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    /// Binary preference: discrete adapters outrank everything else.
    pub fn score(&self) -> u32 {
        u32::from(self.is_discrete())
    }

    /// Every reason this adapter cannot be used; empty when suitable.
    pub fn unsuitability(&self, required_extensions: &[String]) -> Vec<Unsuitable> {
        let mut reasons: Vec<Unsuitable> = required_extensions
            .iter()
            .filter(|required| !self.extensions.iter().any(|available| available == *required))
            .map(|missing| Unsuitable::MissingExtension(missing.clone()))
            .collect();
        if self.surface_formats.is_empty() {
            reasons.push(Unsuitable::NoSurfaceFormats);
        }
        if self.present_modes.is_empty() {
            reasons.push(Unsuitable::NoPresentModes);
        }
        reasons
    }
}

/// Enumerate adapters visible to `instance` and pick one for `surface`.
pub fn select_physical_device(instance: &Instance, surface: &Surface) -> Result<GraphicsDevice> {
    let handles = unsafe { instance.instance.enumerate_physical_devices() }
        .map_err(native("enumerate physical devices"))?;

    let candidates = handles
        .into_iter()
        .map(|handle| GraphicsDevice::query(instance, surface, handle))
        .collect::<Result<Vec<_>>>()?;

    let required: Vec<String> = instance
        .required_device_extensions
        .iter()
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    select_device(candidates, &required)
}

/// Filter by suitability, then keep the highest score.
///
/// Ties keep the earlier candidate, so the result only depends on
/// enumeration order. Rejection reasons are logged for every candidate.
pub fn select_device(candidates: Vec<GraphicsDevice>, required_extensions: &[String]) -> Result<GraphicsDevice> {
    if candidates.is_empty() {
        log::warn!("No graphics card detected capable of running Vulkan");
        return Err(RenderError::NoSuitableDevice);
    }

    let mut best: Option<GraphicsDevice> = None;
    for candidate in candidates {
        log::info!(
            "Detected {} rendering device: {}",
            if candidate.is_discrete() { "discrete" } else { "integrated" },
            candidate.name
        );

        let reasons = candidate.unsuitability(required_extensions);
        for reason in &reasons {
            log::warn!("Rendering device {} rejected: {}", candidate.name, reason);
        }
        if !reasons.is_empty() {
            continue;
        }

        let better = match &best {
            None => true,
            Some(current) => candidate.score() > current.score(),
        };
        if better {
            best = Some(candidate);
        }
    }

    let device = best.ok_or(RenderError::NoSuitableDevice)?;
    log::info!("Using rendering device: {}", device.name);
    Ok(device)
}

/// Queue family pair used for rendering and presenting. May alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub presentation: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.presentation
    }

    /// Distinct family indices, one queue is created per entry.
    pub fn unique(&self) -> BTreeSet<u32> {
        [self.graphics, self.presentation].into_iter().collect()
    }
}

/// Walk the family table once, stopping as soon as both requirements have
/// been met by the families seen so far.
///
/// `supports_present` is the native surface query; it is only called for
/// families that actually expose queues. A family meeting a requirement
/// replaces an earlier one, so a family that does both wins when the walk
/// stops on it.
pub fn resolve_queue_families<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut graphics = None;
    let mut presentation = None;

    for (index, family) in (0u32..).zip(families) {
        if family.queue_count > 0 {
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if supports_present(index)? {
                presentation = Some(index);
            }
        }
        if let (Some(graphics), Some(presentation)) = (graphics, presentation) {
            log::debug!("Queue families resolved: graphics {}, presentation {}", graphics, presentation);
            return Ok(QueueFamilyIndices { graphics, presentation });
        }
    }

    Err(RenderError::NoSuitableQueueFamily)
}

/// Logical device with its queues; every other device object holds an Arc
/// to this so it outlives them.
pub struct LogicalDevice {
    pub device: ash::Device,
    pub physical: GraphicsDevice,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub presentation_queue: vk::Queue,
    pub instance: Arc<Instance>,
}

impl LogicalDevice {
    pub fn new(instance: Arc<Instance>, physical: GraphicsDevice, surface: &Surface) -> Result<Arc<Self>> {
        let queue_families =
            resolve_queue_families(&physical.queue_families, |index| surface.supports_present(physical.handle, index))?;

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_ptrs = as_ptrs(&instance.required_device_extensions);
        // Device layers are deprecated, mirrored for older loaders.
        let layer_ptrs = as_ptrs(&instance.enabled_layers);
        let features = vk::PhysicalDeviceFeatures::default();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs)
            .enabled_features(&features);

        let device = unsafe { instance.instance.create_device(physical.handle, &create_info, None) }
            .map_err(native("create logical Vulkan device"))?;
        log::info!("Successfully created logical Vulkan device");

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let presentation_queue = unsafe { device.get_device_queue(queue_families.presentation, 0) };

        Ok(Arc::new(Self {
            device,
            physical,
            queue_families,
            graphics_queue,
            presentation_queue,
            instance,
        }))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|code| RenderError::from_frame("wait for device idle", code))
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");
        let _ = self.wait_idle();
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
