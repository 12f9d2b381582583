// Synchronization primitives
//
// One semaphore pair shared by every frame. There is no fence: the CPU never
// waits on the GPU between frames, so at most one frame's ordering is
// expressed at a time.

use ash::vk;
use std::sync::Arc;

use super::LogicalDevice;
use crate::error::InitError;

pub struct SyncPrimitives {
    /// Signaled by acquire, waited on by submit.
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present.
    pub render_finished: vk::Semaphore,
    device: Arc<LogicalDevice>,
}

impl SyncPrimitives {
    pub fn new(device: &Arc<LogicalDevice>) -> Result<Self, InitError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        let image_available = unsafe { device.device.create_semaphore(&semaphore_info, None) }
            .map_err(InitError::creation("create image-available semaphore"))?;

        let render_finished = match unsafe { device.device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(result) => {
                unsafe { device.device.destroy_semaphore(image_available, None) };
                return Err(InitError::Creation {
                    what: "create render-finished semaphore",
                    result,
                });
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            device: device.clone(),
        })
    }
}

impl Drop for SyncPrimitives {
    fn drop(&mut self) {
        log::debug!("Destroying semaphores");
        unsafe {
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_semaphore(self.image_available, None);
        }
    }
}
