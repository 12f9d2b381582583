// Vulkan Context - instance and diagnostics
//
// Responsibilities:
// - Validation layer availability check (exact name match)
// - Instance creation with the window system's extensions
// - Debug messenger that only logs

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::error::InitError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Process-wide handle to the Vulkan environment.
///
/// Everything created from the instance keeps an `Arc<Context>`, so the
/// instance is always the last handle to go.
pub struct Context {
    pub instance: ash::Instance,
    pub entry: Entry,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    layers: Vec<&'static CStr>,
}

impl Context {
    /// Create the instance.
    ///
    /// # Arguments
    /// * `window_extensions` - extensions the presentation surface needs
    /// * `want_diagnostics` - enable the validation layer and debug messenger
    pub fn new(
        entry: Entry,
        app_name: &str,
        window_extensions: &[*const c_char],
        want_diagnostics: bool,
    ) -> Result<Arc<Self>, InitError> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let layers = if want_diagnostics {
            vec![VALIDATION_LAYER]
        } else {
            vec![]
        };

        // Fail before touching the driver if a layer is missing
        let available = entry
            .enumerate_instance_layer_properties()
            .map_err(InitError::query("instance layers"))?;
        if let Some(missing) = missing_layers(&layers, &available).first() {
            return Err(InitError::MissingLayer(missing.to_string_lossy().into_owned()));
        }

        log_instance_extensions(&entry);

        let app_name_cstr = CString::new(app_name).unwrap_or_else(|_| c"vk-renderer".into());
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let extensions = instance_extensions(window_extensions, want_diagnostics);
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(InitError::creation("create Vulkan instance"))?;

        // From here on the instance is owned, so early returns release it
        let mut context = Self {
            instance,
            entry,
            debug_utils: None,
            layers,
        };

        if want_diagnostics {
            context.debug_utils = Some(context.setup_debug_messenger()?);
        }

        Ok(Arc::new(context))
    }

    /// Layers the instance was created with; devices reuse them.
    pub fn layers(&self) -> &[&'static CStr] {
        &self.layers
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.debug_utils.is_some()
    }

    /// Physical devices in driver enumeration order.
    pub fn enumerate_adapters(&self) -> Result<Vec<vk::PhysicalDevice>, InitError> {
        unsafe { self.instance.enumerate_physical_devices() }
            .map_err(InitError::query("physical devices"))
    }

    fn setup_debug_messenger(
        &self,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT), InitError> {
        let debug_utils = DebugUtils::new(&self.entry, &self.instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(InitError::creation("set up debug messenger"))?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::debug!("Destroying Vulkan instance");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Window system extensions, plus debug utils when diagnostics are on.
pub fn instance_extensions(
    window_extensions: &[*const c_char],
    want_diagnostics: bool,
) -> Vec<*const c_char> {
    let mut extensions = window_extensions.to_vec();
    if want_diagnostics {
        extensions.push(DebugUtils::name().as_ptr());
    }
    extensions
}

/// Requested layers with no exact name match in `available`.
pub fn missing_layers<'a>(
    requested: &[&'a CStr],
    available: &[vk::LayerProperties],
) -> Vec<&'a CStr> {
    requested
        .iter()
        .copied()
        .filter(|wanted| {
            !available
                .iter()
                .any(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) } == *wanted)
        })
        .collect()
}

fn log_instance_extensions(entry: &Entry) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    match entry.enumerate_instance_extension_properties(None) {
        Ok(extensions) => {
            log::debug!("Available instance extensions:");
            for ext in &extensions {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                log::debug!("\t{} v{}", name.to_string_lossy(), ext.spec_version);
            }
        }
        Err(e) => log::debug!("Could not list instance extensions: {}", e),
    }
}

// Debug callback for validation layers. Observes only: always returns FALSE
// so the triggering call is never aborted.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let data = &*p_callback_data;
    let message = if data.p_message.is_null() {
        "<no message>".into()
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };
    let id_name = if data.p_message_id_name.is_null() {
        "".into()
    } else {
        CStr::from_ptr(data.p_message_id_name).to_string_lossy()
    };

    log::log!(
        severity_level(message_severity),
        "[Vulkan {:?}] {} {}",
        message_type,
        id_name,
        message
    );

    vk::FALSE
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}
