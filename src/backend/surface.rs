// Surface - connection between the window and Vulkan
//
// The window itself lives outside the backend. The renderer only sees it
// through SurfaceProvider: native handles plus the current drawable size.

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

use super::error::{native, RenderError, Result};
use super::instance::Instance;

/// What the renderer needs from a window.
pub trait SurfaceProvider {
    /// Current client-area size in pixels. Zero in either dimension means
    /// the window is minimised and nothing can be presented.
    fn drawable_size(&self) -> (u32, u32);

    fn display_handle(&self) -> Result<RawDisplayHandle>;

    fn window_handle(&self) -> Result<RawWindowHandle>;
}

impl SurfaceProvider for winit::window::Window {
    fn drawable_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn display_handle(&self) -> Result<RawDisplayHandle> {
        use raw_window_handle::HasDisplayHandle;
        Ok(HasDisplayHandle::display_handle(self)?.as_raw())
    }

    fn window_handle(&self) -> Result<RawWindowHandle> {
        use raw_window_handle::HasWindowHandle;
        Ok(HasWindowHandle::window_handle(self)?.as_raw())
    }
}

/// Instance extension needed to create a surface on this display.
pub fn platform_surface_extension(display: RawDisplayHandle) -> Result<&'static CStr> {
    match display {
        RawDisplayHandle::Windows(_) => Ok(khr::Win32Surface::name()),
        RawDisplayHandle::Xlib(_) => Ok(khr::XlibSurface::name()),
        RawDisplayHandle::Xcb(_) => Ok(khr::XcbSurface::name()),
        RawDisplayHandle::Wayland(_) => Ok(khr::WaylandSurface::name()),
        _ => Err(RenderError::UnsupportedPlatform),
    }
}

/// Owned VkSurfaceKHR, destroyed before the instance it came from.
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: khr::Surface,
    // Keeps the instance alive until the surface is gone.
    _instance: Arc<Instance>,
}

impl Surface {
    pub fn new(instance: Arc<Instance>, window: &dyn SurfaceProvider) -> Result<Self> {
        let display = window.display_handle()?;
        let window_handle = window.window_handle()?;

        let handle = unsafe { create_platform_surface(&instance, display, window_handle)? };
        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        log::info!("Successfully created rendering surface");
        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)
                .map_err(native("query surface presentation support"))
        }
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
                .map_err(native("retrieve device surface capabilities"))
        }
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
                .map_err(native("enumerate surface formats"))
        }
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
                .map_err(native("enumerate presentation modes"))
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

unsafe fn create_platform_surface(
    instance: &Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let entry = &instance.entry;
    let raw_instance = &instance.instance;

    match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, raw_instance)
                .create_win32_surface(&create_info, None)
                .map_err(native("create windows rendering surface"))
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display.display.ok_or(RenderError::UnsupportedPlatform)?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.as_ptr().cast())
                .window(handle.window);
            khr::XlibSurface::new(entry, raw_instance)
                .create_xlib_surface(&create_info, None)
                .map_err(native("create xlib rendering surface"))
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display.connection.ok_or(RenderError::UnsupportedPlatform)?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.as_ptr().cast())
                .window(handle.window.get());
            khr::XcbSurface::new(entry, raw_instance)
                .create_xcb_surface(&create_info, None)
                .map_err(native("create xcb rendering surface"))
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr().cast())
                .surface(handle.surface.as_ptr().cast());
            khr::WaylandSurface::new(entry, raw_instance)
                .create_wayland_surface(&create_info, None)
                .map_err(native("create wayland rendering surface"))
        }
        _ => Err(RenderError::UnsupportedPlatform),
    }
}
