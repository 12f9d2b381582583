// Backend module - Vulkan abstraction layer
//
// Each wrapper owns its handles and an `Arc` of whatever it was created from,
// so parents always outlive children.

pub mod commands;
pub mod context;
pub mod device;
pub mod pipeline;
pub mod probe;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use context::Context;
pub use device::LogicalDevice;
