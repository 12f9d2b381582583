// Swapchain - Window presentation
//
// Negotiates format, present mode, extent and image count with the surface,
// then owns the swapchain and one view per image. The chain is fixed once
// built: a new surface extent means a new chain, never a mutation.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::probe::QueueFamilies;
use super::surface::Surface;
use super::LogicalDevice;
use crate::error::InitError;

/// 32-bit BGRA in the nonlinear sRGB color space.
pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surfaces report this width when the swapchain decides the extent.
pub const EXTENT_SENTINEL: u32 = u32::MAX;

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, InitError> {
    match formats {
        [] => Err(InitError::NoSurfaceFormats),
        // No preference from the surface: take ours
        [only] if only.format == vk::Format::UNDEFINED => Ok(PREFERRED_FORMAT),
        _ => Ok(formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
            })
            .unwrap_or_else(|| {
                log::warn!(
                    "Device does not directly support preferred surface format, using {:?}",
                    formats[0]
                );
                formats[0]
            })),
    }
}

/// MAILBOX wins as soon as it is seen. FIFO only replaces the IMMEDIATE
/// default and the scan keeps going, so a later MAILBOX still wins.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    let mut chosen = vk::PresentModeKHR::IMMEDIATE;

    for &mode in modes {
        match mode {
            vk::PresentModeKHR::MAILBOX => return mode,
            vk::PresentModeKHR::FIFO => chosen = mode,
            _ => {}
        }
    }

    chosen
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != EXTENT_SENTINEL {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: width.max(min.width).min(max.width),
        height: height.max(min.height).min(max.height),
    }
}

/// One more than the minimum; a zero maximum means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count != 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// How chain images are shared between the graphics and present families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingPlan {
    pub mode: vk::SharingMode,
    pub families: Vec<u32>,
}

impl SharingPlan {
    pub fn for_queues(queues: QueueFamilies) -> Self {
        if queues.is_shared() {
            Self {
                mode: vk::SharingMode::EXCLUSIVE,
                families: Vec::new(),
            }
        } else {
            Self {
                mode: vk::SharingMode::CONCURRENT,
                families: vec![queues.graphics, queues.present],
            }
        }
    }
}

pub struct PresentationChain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    device: Arc<LogicalDevice>,
    _surface: Arc<Surface>,
}

impl PresentationChain {
    pub fn new(
        device: &Arc<LogicalDevice>,
        surface: &Arc<Surface>,
        width: u32,
        height: u32,
    ) -> Result<Self, InitError> {
        let support = surface.support(device.physical_device)?;
        let caps = &support.capabilities;

        let format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(caps, width, height);
        let image_count = choose_image_count(caps);
        let sharing = SharingPlan::for_queues(device.queues);

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images, {:?}",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            image_count,
            sharing.mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing.mode)
            .queue_family_indices(&sharing.families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain_loader = khr::Swapchain::new(&device.context().instance, &device.device);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(InitError::creation("create swapchain"))?;

        // Owned from here: any failure below drops the chain and releases
        // whatever was created so far
        let mut chain = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            extent,
            device: device.clone(),
            _surface: surface.clone(),
        };

        let images = unsafe { chain.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(InitError::query("swapchain images"))?;

        log::info!("Swapchain created with {} images", images.len());

        for &image in &images {
            let view = chain.create_view(image)?;
            chain.image_views.push(view);
        }
        chain.images = images;

        log::info!("Created {} image views", chain.image_views.len());

        Ok(chain)
    }

    fn create_view(&self, image: vk::Image) -> Result<vk::ImageView, InitError> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format.format)
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

        unsafe { self.device.device.create_image_view(&create_info, None) }
            .map_err(InitError::creation("create image view"))
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering. Returns `(index, suboptimal)`.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Present rendered image to screen. Returns `suboptimal`.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        log::debug!("Destroying {} image views and swapchain", self.image_views.len());
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
