// Vulkan instance - the first object created and the last destroyed
//
// Responsibilities:
// - Load the Vulkan library
// - Declare required instance extensions (surface + platform surface)
// - Check for and, when available, enable diagnostics (validation layers +
//   debug messenger routed into the log)

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::error::{native, Result};
use super::surface::{self, SurfaceProvider};

const ENGINE_NAME: &CStr = c"surface-renderer";

/// Explicit instance/device requirements, passed in rather than kept in
/// global lists.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Attach validation layers and the debug messenger.
    pub enable_diagnostics: bool,
    pub validation_layers: Vec<String>,
    pub required_instance_extensions: Vec<String>,
    pub required_device_extensions: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            enable_diagnostics: cfg!(debug_assertions),
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            required_instance_extensions: vec![khr::Surface::name().to_string_lossy().into_owned()],
            required_device_extensions: vec![khr::Swapchain::name().to_string_lossy().into_owned()],
        }
    }
}

pub struct Instance {
    pub entry: Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    /// Layers actually enabled; mirrored onto the logical device.
    pub enabled_layers: Vec<CString>,
    pub required_device_extensions: Vec<CString>,
}

impl Instance {
    /// Create the instance for `app_name`.
    ///
    /// Diagnostics that were requested but are not installed degrade to a
    /// warning; the instance is still created without them.
    pub fn new(app_name: &str, config: &InstanceConfig, window: &dyn SurfaceProvider) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let diagnostics = config.enable_diagnostics && Self::diagnostics_available(&entry, config)?;

        let mut extensions = to_cstrings(&config.required_instance_extensions)?;
        let platform = surface::platform_surface_extension(window.display_handle()?)?;
        push_unique(&mut extensions, platform);
        if diagnostics {
            push_unique(&mut extensions, ext::DebugUtils::name());
        }

        let enabled_layers = if diagnostics {
            to_cstrings(&config.validation_layers)?
        } else {
            Vec::new()
        };

        let app_name_cstr = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let extension_ptrs = as_ptrs(&extensions);
        let layer_ptrs = as_ptrs(&enabled_layers);
        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(native("create Vulkan instance"))?;
        log::info!("Successfully created Vulkan instance");

        let debug_utils = if diagnostics {
            let messenger = Self::setup_debug_messenger(&entry, &instance);
            match messenger {
                Ok(pair) => {
                    log::info!("Successfully setup Vulkan validation layer debug messenger");
                    Some(pair)
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_utils,
            enabled_layers,
            required_device_extensions: to_cstrings(&config.required_device_extensions)?,
        }))
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.debug_utils.is_some()
    }

    fn diagnostics_available(entry: &Entry, config: &InstanceConfig) -> Result<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .map_err(native("enumerate instance layers"))?;
        let layer_names: Vec<&CStr> = layers
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();

        for wanted in &config.validation_layers {
            if layer_names.iter().any(|name| name.to_bytes() == wanted.as_bytes()) {
                log::info!("Vulkan validation layer {} supported", wanted);
            } else {
                log::warn!("Not all Vulkan validation layers supported ({} missing), continuing without diagnostics", wanted);
                return Ok(false);
            }
        }

        let extensions = entry
            .enumerate_instance_extension_properties(None)
            .map_err(native("enumerate instance extensions"))?;
        let has_debug_utils = extensions
            .iter()
            .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == ext::DebugUtils::name());
        if !has_debug_utils {
            log::warn!("{:?} not available, continuing without diagnostics", ext::DebugUtils::name());
        }
        Ok(has_debug_utils)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(native("create Vulkan validation layer debug messenger"))?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Log level a diagnostic message is reported at.
pub(crate) fn diagnostic_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else {
        log::Level::Info
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);
    log::log!(
        diagnostic_level(message_severity),
        "[Vulkan][Severity {:?}] {}",
        message_severity,
        message.to_string_lossy()
    );
    vk::FALSE
}

pub(crate) fn to_cstrings(names: &[String]) -> Result<Vec<CString>> {
    Ok(names
        .iter()
        .map(|name| CString::new(name.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

pub(crate) fn as_ptrs(names: &[CString]) -> Vec<*const c_char> {
    names.iter().map(|name| name.as_ptr()).collect()
}

fn push_unique(names: &mut Vec<CString>, name: &CStr) {
    if !names.iter().any(|existing| existing.as_c_str() == name) {
        names.push(name.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_logged_as_errors_everything_else_as_info() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        assert_eq!(diagnostic_level(Severity::ERROR), log::Level::Error);
        assert_eq!(diagnostic_level(Severity::WARNING), log::Level::Info);
        assert_eq!(diagnostic_level(Severity::VERBOSE), log::Level::Info);
        assert_eq!(diagnostic_level(Severity::INFO), log::Level::Info);
    }

    #[test]
    fn default_config_requires_surface_and_swapchain() {
        let config = InstanceConfig::default();
        assert_eq!(config.required_instance_extensions, vec!["VK_KHR_surface".to_string()]);
        assert_eq!(config.required_device_extensions, vec!["VK_KHR_swapchain".to_string()]);
    }

    #[test]
    fn extension_list_is_deduplicated() {
        let mut names = to_cstrings(&["VK_KHR_surface".to_string()]).unwrap();
        push_unique(&mut names, khr::Surface::name());
        push_unique(&mut names, khr::XlibSurface::name());
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn interior_nul_is_rejected() {
        let err = to_cstrings(&["VK_bad\0name".to_string()]).unwrap_err();
        assert!(matches!(err, super::super::error::RenderError::InvalidName(_)));
    }
}
