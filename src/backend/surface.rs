// Surface - binding between the instance and the native window

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::Context;
use crate::error::InitError;

/// What a surface supports on one physical device.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    _context: Arc<Context>,
}

impl Surface {
    /// # Safety
    ///
    /// The window behind `window_handle` must outlive the returned surface.
    pub unsafe fn new(
        context: &Arc<Context>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>, InitError> {
        let surface = ash_window::create_surface(
            &context.entry,
            &context.instance,
            display_handle,
            window_handle,
            None,
        )
        .map_err(InitError::creation("create window surface"))?;

        Ok(Arc::new(Self {
            surface,
            loader: khr::Surface::new(&context.entry, &context.instance),
            _context: context.clone(),
        }))
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool, InitError> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
        }
        .map_err(InitError::query("surface present support"))
    }

    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport, InitError> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .map_err(InitError::query("surface capabilities"))?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .map_err(InitError::query("surface formats"))?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .map_err(InitError::query("surface present modes"))?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}
