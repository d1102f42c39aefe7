//! Vulkan instance creation and configuration.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// Required Vulkan API version.
/// On macOS with MoltenVK, only Vulkan 1.2 is supported.
/// On other platforms, we can use 1.3 for native dynamic rendering support.
#[cfg(target_os = "macos")]
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

#[cfg(not(target_os = "macos"))]
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// A created instance with its optional debug utilities.
pub struct InstanceSetup {
    pub instance: ash::Instance,
    /// Loaded when validation or debug labels are enabled.
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Routes validation messages to the `log` crate.
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a Vulkan instance.
///
/// Validation layers are enabled when requested and installed. The debug
/// utils extension is enabled for validation or `debug` (object names and
/// command labels).
pub fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
    debug_enabled: bool,
) -> Result<InstanceSetup, GraphicsError> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let debug_utils_available = (validation_available || debug_enabled)
        && check_instance_extension_support(entry, ash::ext::debug_utils::NAME);

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"RedLilium")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"RedLilium HAL")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    // Headless: presentation surfaces are created by the caller's swapchain code.
    #[allow(unused_mut)]
    let mut extensions: Vec<*const std::ffi::c_char> = Vec::new();

    if debug_utils_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug_utils =
        debug_utils_available.then(|| ash::ext::debug_utils::Instance::new(entry, &instance));

    let debug_messenger = match (&debug_utils, validation_available) {
        (Some(debug_utils), true) => match debug::create_debug_messenger(debug_utils) {
            Ok(messenger) => Some(messenger),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        },
        _ => None,
    };

    log::info!(
        "Vulkan instance created (validation: {}, debug utils: {})",
        validation_available,
        debug_utils_available
    );

    Ok(InstanceSetup {
        instance,
        debug_utils,
        debug_messenger,
    })
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
}

fn check_instance_extension_support(entry: &ash::Entry, name: &CStr) -> bool {
    match unsafe { entry.enumerate_instance_extension_properties(None) } {
        Ok(extensions) => extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(name)),
        Err(_) => false,
    }
}
