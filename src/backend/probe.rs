// Capability probing - which adapter can drive our surface
//
// Pass/fail only, no scoring: the first suitable adapter in enumeration
// order wins. Queries go through `AdapterQuery` so the selection rules can be
// exercised without a driver.

use ash::vk;
use std::ffi::{CStr, CString};
use std::fmt;

use super::surface::{Surface, SurfaceSupport};
use crate::error::InitError;

/// Queue family indices found for one adapter. Valid once both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueAssignment {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn families(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// A complete queue assignment. The two indices may be equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoGraphicsQueue,
    NoPresentQueue,
    MissingExtension(String),
    NoSurfaceFormats,
    NoPresentModes,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoGraphicsQueue => write!(f, "no graphics-capable queue family"),
            Rejection::NoPresentQueue => write!(f, "no queue family can present to the surface"),
            Rejection::MissingExtension(name) => write!(f, "missing device extension {}", name),
            Rejection::NoSurfaceFormats => write!(f, "surface reports no formats"),
            Rejection::NoPresentModes => write!(f, "surface reports no present modes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suitability {
    Suitable(QueueFamilies),
    Unsuitable(Rejection),
}

/// Read-only view of an adapter's capabilities against one surface.
pub trait AdapterQuery {
    fn name(&self) -> String;
    fn queue_families(&self) -> Vec<vk::QueueFamilyProperties>;
    fn supports_present(&self, family: u32) -> Result<bool, InitError>;
    fn extensions(&self) -> Result<Vec<CString>, InitError>;
    fn surface_support(&self) -> Result<SurfaceSupport, InitError>;
}

/// First graphics family and first presenting family, scanning in index
/// order and stopping once both are known.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueAssignment, InitError>
where
    F: FnMut(u32) -> Result<bool, InitError>,
{
    let mut assignment = QueueAssignment::default();

    for (index, family) in (0u32..).zip(families) {
        if assignment.graphics.is_none()
            && family.queue_count > 0
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            assignment.graphics = Some(index);
        }

        if assignment.present.is_none() && supports_present(index)? {
            assignment.present = Some(index);
        }

        if assignment.is_complete() {
            break;
        }
    }

    Ok(assignment)
}

pub fn evaluate<A: AdapterQuery>(
    adapter: &A,
    required_extensions: &[&CStr],
) -> Result<Suitability, InitError> {
    let families = adapter.queue_families();
    log::debug!(
        "Testing suitability of device: {} ({} queue families)",
        adapter.name(),
        families.len()
    );

    let assignment = find_queue_families(&families, |index| adapter.supports_present(index))?;
    if assignment.graphics.is_none() {
        return Ok(Suitability::Unsuitable(Rejection::NoGraphicsQueue));
    }
    let Some(queues) = assignment.families() else {
        return Ok(Suitability::Unsuitable(Rejection::NoPresentQueue));
    };

    let available = adapter.extensions()?;
    if let Some(missing) = required_extensions
        .iter()
        .find(|wanted| !available.iter().any(|have| have.as_c_str() == **wanted))
    {
        return Ok(Suitability::Unsuitable(Rejection::MissingExtension(
            missing.to_string_lossy().into_owned(),
        )));
    }

    let support = adapter.surface_support()?;
    if support.formats.is_empty() {
        return Ok(Suitability::Unsuitable(Rejection::NoSurfaceFormats));
    }
    if support.present_modes.is_empty() {
        return Ok(Suitability::Unsuitable(Rejection::NoPresentModes));
    }

    Ok(Suitability::Suitable(queues))
}

/// Index of the first suitable adapter and its queue families.
pub fn select_adapter<A: AdapterQuery>(
    adapters: &[A],
    required_extensions: &[&CStr],
) -> Result<(usize, QueueFamilies), InitError> {
    if adapters.is_empty() {
        return Err(InitError::NoAdapters);
    }

    for (index, adapter) in adapters.iter().enumerate() {
        match evaluate(adapter, required_extensions)? {
            Suitability::Suitable(queues) => return Ok((index, queues)),
            Suitability::Unsuitable(reason) => {
                log::info!("Skipping device {}: {}", adapter.name(), reason);
            }
        }
    }

    Err(InitError::NoSuitableAdapter {
        count: adapters.len(),
    })
}

/// A physical device paired with the surface it would present to.
pub struct VkAdapter<'a> {
    pub physical_device: vk::PhysicalDevice,
    instance: &'a ash::Instance,
    surface: &'a Surface,
}

impl<'a> VkAdapter<'a> {
    pub fn new(instance: &'a ash::Instance, surface: &'a Surface, physical_device: vk::PhysicalDevice) -> Self {
        Self {
            physical_device,
            instance,
            surface,
        }
    }
}

impl AdapterQuery for VkAdapter<'_> {
    fn name(&self) -> String {
        let props = unsafe { self.instance.get_physical_device_properties(self.physical_device) };
        unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn queue_families(&self) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(self.physical_device)
        }
    }

    fn supports_present(&self, family: u32) -> Result<bool, InitError> {
        self.surface.supports_present(self.physical_device, family)
    }

    fn extensions(&self) -> Result<Vec<CString>, InitError> {
        let props = unsafe {
            self.instance
                .enumerate_device_extension_properties(self.physical_device)
        }
        .map_err(InitError::query("device extensions"))?;

        Ok(props
            .iter()
            .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }.to_owned())
            .collect())
    }

    fn surface_support(&self) -> Result<SurfaceSupport, InitError> {
        self.surface.support(self.physical_device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWAPCHAIN: &CStr = c"VK_KHR_swapchain";

    /// Scriptable adapter: flags per family, which families present, and
    /// what the surface reports.
    struct MockAdapter {
        families: Vec<vk::QueueFlags>,
        present: Vec<u32>,
        extensions: Vec<&'static CStr>,
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
    }

    impl MockAdapter {
        fn capable() -> Self {
            Self {
                families: vec![vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE],
                present: vec![0],
                extensions: vec![SWAPCHAIN],
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            }
        }
    }

    impl AdapterQuery for MockAdapter {
        fn name(&self) -> String {
            "mock".into()
        }

        fn queue_families(&self) -> Vec<vk::QueueFamilyProperties> {
            self.families
                .iter()
                .map(|&flags| vk::QueueFamilyProperties {
                    queue_flags: flags,
                    queue_count: 1,
                    ..Default::default()
                })
                .collect()
        }

        fn supports_present(&self, family: u32) -> Result<bool, InitError> {
            Ok(self.present.contains(&family))
        }

        fn extensions(&self) -> Result<Vec<CString>, InitError> {
            Ok(self.extensions.iter().map(|e| (*e).to_owned()).collect())
        }

        fn surface_support(&self) -> Result<SurfaceSupport, InitError> {
            Ok(SurfaceSupport {
                capabilities: vk::SurfaceCapabilitiesKHR::default(),
                formats: self.formats.clone(),
                present_modes: self.present_modes.clone(),
            })
        }
    }

    #[test]
    fn no_graphics_family_is_unsuitable() {
        let adapter = MockAdapter {
            families: vec![vk::QueueFlags::COMPUTE, vk::QueueFlags::TRANSFER],
            present: vec![0, 1],
            ..MockAdapter::capable()
        };
        assert_eq!(
            evaluate(&adapter, &[SWAPCHAIN]).unwrap(),
            Suitability::Unsuitable(Rejection::NoGraphicsQueue)
        );
    }

    #[test]
    fn graphics_family_without_queues_is_ignored() {
        let families = [vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 0,
            ..Default::default()
        }];
        let assignment = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(assignment.graphics, None);
        assert_eq!(assignment.present, Some(0));
    }

    #[test]
    fn no_presenting_family_is_unsuitable() {
        let adapter = MockAdapter {
            present: vec![],
            ..MockAdapter::capable()
        };
        assert_eq!(
            evaluate(&adapter, &[SWAPCHAIN]).unwrap(),
            Suitability::Unsuitable(Rejection::NoPresentQueue)
        );
    }

    #[test]
    fn split_families_give_distinct_indices() {
        let adapter = MockAdapter {
            families: vec![vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER],
            present: vec![1],
            ..MockAdapter::capable()
        };
        let Suitability::Suitable(queues) = evaluate(&adapter, &[SWAPCHAIN]).unwrap() else {
            panic!("adapter should be suitable");
        };
        assert_eq!(queues, QueueFamilies { graphics: 0, present: 1 });
        assert!(!queues.is_shared());
        assert_eq!(queues.unique(), vec![0, 1]);
    }

    #[test]
    fn lowest_index_wins_each_role() {
        let adapter = MockAdapter {
            families: vec![
                vk::QueueFlags::TRANSFER,
                vk::QueueFlags::GRAPHICS,
                vk::QueueFlags::GRAPHICS,
            ],
            present: vec![1, 2],
            ..MockAdapter::capable()
        };
        let Suitability::Suitable(queues) = evaluate(&adapter, &[SWAPCHAIN]).unwrap() else {
            panic!("adapter should be suitable");
        };
        assert_eq!(queues, QueueFamilies { graphics: 1, present: 1 });
        assert_eq!(queues.unique(), vec![1]);
    }

    #[test]
    fn search_stops_once_both_roles_are_found() {
        let families = vec![
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS,
                queue_count: 1,
                ..Default::default()
            };
            4
        ];
        let mut probed = Vec::new();
        let assignment = find_queue_families(&families, |index| {
            probed.push(index);
            Ok(index == 1)
        })
        .unwrap();

        assert_eq!(assignment.families(), Some(QueueFamilies { graphics: 0, present: 1 }));
        assert_eq!(probed, vec![0, 1]);
    }

    #[test]
    fn missing_extension_is_named() {
        let adapter = MockAdapter {
            extensions: vec![],
            ..MockAdapter::capable()
        };
        assert_eq!(
            evaluate(&adapter, &[SWAPCHAIN]).unwrap(),
            Suitability::Unsuitable(Rejection::MissingExtension("VK_KHR_swapchain".into()))
        );
    }

    #[test]
    fn surface_must_report_formats_and_modes() {
        let no_formats = MockAdapter {
            formats: vec![],
            ..MockAdapter::capable()
        };
        assert_eq!(
            evaluate(&no_formats, &[SWAPCHAIN]).unwrap(),
            Suitability::Unsuitable(Rejection::NoSurfaceFormats)
        );

        let no_modes = MockAdapter {
            present_modes: vec![],
            ..MockAdapter::capable()
        };
        assert_eq!(
            evaluate(&no_modes, &[SWAPCHAIN]).unwrap(),
            Suitability::Unsuitable(Rejection::NoPresentModes)
        );
    }

    #[test]
    fn first_suitable_adapter_wins() {
        let adapters = [
            MockAdapter {
                extensions: vec![],
                ..MockAdapter::capable()
            },
            MockAdapter::capable(),
            MockAdapter::capable(),
        ];
        let (index, queues) = select_adapter(&adapters, &[SWAPCHAIN]).unwrap();
        assert_eq!(index, 1);
        assert_eq!(queues, QueueFamilies { graphics: 0, present: 0 });
    }

    #[test]
    fn empty_enumeration_is_fatal() {
        let adapters: [MockAdapter; 0] = [];
        assert!(matches!(
            select_adapter(&adapters, &[SWAPCHAIN]),
            Err(InitError::NoAdapters)
        ));
    }

    #[test]
    fn nothing_suitable_is_fatal() {
        let adapters = [MockAdapter {
            present: vec![],
            ..MockAdapter::capable()
        }];
        assert!(matches!(
            select_adapter(&adapters, &[SWAPCHAIN]),
            Err(InitError::NoSuitableAdapter { count: 1 })
        ));
    }
}
