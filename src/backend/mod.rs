// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Each wrapper holds an Arc to whatever must
// outlive it, so teardown order follows ownership.

pub mod commands;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use instance::InstanceConfig;
