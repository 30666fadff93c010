// Render errors
//
// Every construction step and every frame operation reports through
// RenderError. Only SurfaceOutOfDate is handled locally (by rebuilding the
// swapchain); everything else propagates to the caller.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("Error code {code:?}, could not {what}")]
    Initialization { what: &'static str, code: vk::Result },

    #[error("No graphics card detected with suitable Vulkan function requirements")]
    NoSuitableDevice,

    #[error("No collection of queue families found where all requirements are met")]
    NoSuitableQueueFamily,

    #[error("The presentation surface was lost and must be recreated by the window")]
    SurfaceLost,

    #[error("The swapchain no longer matches the surface")]
    SurfaceOutOfDate,

    #[error("Error code {code:?}, could not create {stage} shader module")]
    ShaderCompile { stage: &'static str, code: vk::Result },

    #[error("The {stage} shader is not valid SPIR-V: {source}")]
    InvalidSpirv {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Error code {code:?}, could not create graphics pipeline")]
    PipelineCreation { code: vk::Result },

    #[error("Shader file not found: {path:?}")]
    ShaderNotFound { path: PathBuf },

    #[error("Could not read shader file {path:?}: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid Vulkan extension or layer name (contains interior NUL): {0}")]
    InvalidName(#[from] std::ffi::NulError),

    #[error("Unsupported window system for surface creation")]
    UnsupportedPlatform,

    #[error("Failed to obtain native window handle: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("Error code {code:?}, could not {what}")]
    Render { what: &'static str, code: vk::Result },

    #[error("The {0} has not been built for the current swapchain")]
    NotBuilt(&'static str),
}

impl RenderError {
    /// Classify a native status code returned while creating something.
    ///
    /// Surface loss and out-of-date are singled out because callers treat
    /// them differently from a plain creation failure.
    pub fn from_native(what: &'static str, code: vk::Result) -> Self {
        match code {
            vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SurfaceOutOfDate,
            code => RenderError::Initialization { what, code },
        }
    }

    /// Same classification for per-frame operations, where any other failure
    /// is a fatal render error rather than an initialization error.
    pub fn from_frame(what: &'static str, code: vk::Result) -> Self {
        match code {
            vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SurfaceOutOfDate,
            code => RenderError::Render { what, code },
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::SurfaceOutOfDate)
    }
}

/// Shorthand for `map_err` on native calls made during construction.
pub(crate) fn native(what: &'static str) -> impl FnOnce(vk::Result) -> RenderError {
    move |code| RenderError::from_native(what, code)
}
