//! Vulkan validation messages and debug labels.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::GraphicsError;
use crate::types::Color;

/// Create a debug messenger for validation layer output.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to create debug messenger: {:?}",
                e
            ))
        })?;

    Ok(messenger)
}

/// Debug callback function for validation layer messages.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: callback_data is guaranteed to be valid by the Vulkan driver
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            // SAFETY: p_message is a valid null-terminated string from the Vulkan driver
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::debug!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            log::trace!("[Vulkan {}] {}", type_str, message);
        }
    }

    vk::FALSE
}

/// Convert a label to a C string, dropping interior NULs.
pub fn label_cstring(label: &str) -> CString {
    let bytes: Vec<u8> = label.bytes().filter(|&b| b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

/// Command-buffer labels and object names, active only when the debug utils
/// extension is loaded.
#[derive(Clone)]
pub struct DebugLabels {
    device: Option<ash::ext::debug_utils::Device>,
}

impl DebugLabels {
    pub fn new(instance: &ash::Instance, device: &ash::Device, enabled: bool) -> Self {
        Self {
            device: enabled.then(|| ash::ext::debug_utils::Device::new(instance, device)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.device.is_some()
    }

    pub fn begin(&self, cmd: vk::CommandBuffer, label: &str, color: Color) {
        if let Some(device) = &self.device {
            let name = label_cstring(label);
            let info = vk::DebugUtilsLabelEXT::default()
                .label_name(&name)
                .color(color.to_array());
            unsafe { device.cmd_begin_debug_utils_label(cmd, &info) };
        }
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_end_debug_utils_label(cmd) };
        }
    }

    pub fn insert(&self, cmd: vk::CommandBuffer, label: &str, color: Color) {
        if let Some(device) = &self.device {
            let name = label_cstring(label);
            let info = vk::DebugUtilsLabelEXT::default()
                .label_name(&name)
                .color(color.to_array());
            unsafe { device.cmd_insert_debug_utils_label(cmd, &info) };
        }
    }

    /// Attach a name to a Vulkan object for validation messages and
    /// capture tools.
    pub fn set_name<H: vk::Handle>(&self, handle: H, name: &str) {
        if let Some(device) = &self.device {
            let name = label_cstring(name);
            let info = vk::DebugUtilsObjectNameInfoEXT::default()
                .object_handle(handle)
                .object_name(&name);
            if let Err(e) = unsafe { device.set_debug_utils_object_name(&info) } {
                log::debug!("Failed to name Vulkan object: {:?}", e);
            }
        }
    }
}

impl std::fmt::Debug for DebugLabels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugLabels")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_cstring_strips_nul() {
        assert_eq!(label_cstring("a\0b").as_bytes(), b"ab");
        assert_eq!(label_cstring("").as_bytes(), b"");
    }
}
