// Vulkan Device - logical device and queues
//
// Responsibilities:
// - One queue request per distinct family (graphics, present)
// - Logical device creation with the swapchain extension
// - Queue handle lookup

use ash::extensions::khr;
use ash::vk;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use super::probe::QueueFamilies;
use super::Context;
use crate::error::InitError;

/// Device extensions every adapter must support.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

static QUEUE_PRIORITIES: [f32; 1] = [1.0];

/// Logical device wrapper with automatic cleanup
pub struct LogicalDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queues: QueueFamilies,

    // Same handle twice when both roles share a family
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    context: Arc<Context>,
}

impl LogicalDevice {
    pub fn new(
        context: &Arc<Context>,
        physical_device: vk::PhysicalDevice,
        queues: QueueFamilies,
    ) -> Result<Arc<Self>, InitError> {
        let instance = &context.instance;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Using device: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let queue_create_infos = queue_create_infos(queues);

        let extensions: Vec<*const c_char> = required_device_extensions()
            .iter()
            .map(|e| e.as_ptr())
            .collect();

        let layers = device_layer_names(context.layers());

        let features = vk::PhysicalDeviceFeatures::default();

        // Device layers are deprecated but older loaders still read them
        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(InitError::creation("create logical device"))?;

        let graphics_queue = unsafe { device.get_device_queue(queues.graphics, 0) };
        log::debug!("Obtained graphics queue (family {})", queues.graphics);
        let present_queue = unsafe { device.get_device_queue(queues.present, 0) };
        log::debug!("Obtained present queue (family {})", queues.present);

        Ok(Arc::new(Self {
            device,
            physical_device,
            queues,
            graphics_queue,
            present_queue,
            context: context.clone(),
        }))
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::debug!("Destroying logical device");
        unsafe { self.device.destroy_device(None) };
    }
}

/// Device-level layer names, mirroring the instance layers.
pub fn device_layer_names(instance_layers: &[&'static CStr]) -> Vec<*const c_char> {
    instance_layers.iter().map(|l| l.as_ptr()).collect()
}

/// One single-queue request per distinct family, all at priority 1.0.
pub fn queue_create_infos(queues: QueueFamilies) -> Vec<vk::DeviceQueueCreateInfo> {
    queues
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&QUEUE_PRIORITIES)
                .build()
        })
        .collect()
}
