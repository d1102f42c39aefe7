//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

use super::instance::REQUIRED_API_VERSION;

/// Optional features detected on the selected physical device.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceFeatures {
    /// Dynamic rendering is core (Vulkan 1.3); otherwise it comes from
    /// `VK_KHR_dynamic_rendering`.
    pub core_dynamic_rendering: bool,
    pub multiview: bool,
}

/// Query dynamic rendering and multiview support.
///
/// Returns `None` if the device cannot do dynamic rendering at all.
fn query_features(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<DeviceFeatures> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let core_dynamic_rendering = properties.api_version >= vk::make_api_version(0, 1, 3, 0)
        && REQUIRED_API_VERSION >= vk::make_api_version(0, 1, 3, 0);
    if !core_dynamic_rendering
        && !has_device_extension(instance, physical_device, ash::khr::dynamic_rendering::NAME)
    {
        return None;
    }

    let mut multiview = vk::PhysicalDeviceMultiviewFeatures::default();
    let mut dynamic_rendering = vk::PhysicalDeviceDynamicRenderingFeatures::default();
    {
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut multiview)
            .push_next(&mut dynamic_rendering);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
    }

    (dynamic_rendering.dynamic_rendering == vk::TRUE).then_some(DeviceFeatures {
        core_dynamic_rendering,
        multiview: multiview.multiview == vk::TRUE,
    })
}

fn has_device_extension(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: &CStr,
) -> bool {
    match unsafe { instance.enumerate_device_extension_properties(physical_device) } {
        Ok(extensions) => extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(name)),
        Err(_) => false,
    }
}

/// Select the best physical device for rendering.
///
/// Prefers discrete GPUs over integrated GPUs. Devices without dynamic
/// rendering or a graphics queue are skipped.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, DeviceFeatures), GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = properties
            .device_name_as_c_str()
            .unwrap_or(c"unknown")
            .to_string_lossy();

        let Some(features) = query_features(instance, device) else {
            log::info!("Skipping GPU {device_name}: no dynamic rendering support");
            continue;
        };
        if find_graphics_queue_family(instance, device).is_err() {
            log::info!("Skipping GPU {device_name}: no graphics queue");
            continue;
        }

        let mut score = 1;

        // Prefer discrete GPUs
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }

        // Add score based on max texture size
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some((device, features));
        }
    }

    best_device
        .ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Find a queue family that supports graphics operations.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, GraphicsError> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
        .ok_or_else(|| {
            GraphicsError::InitializationFailed("No graphics queue family found".to_string())
        })
}

/// Create a logical device with dynamic rendering and, where supported,
/// multiview enabled.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
    features: DeviceFeatures,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities);

    let queue_create_infos = [queue_create_info];

    let mut device_extensions = Vec::new();
    if !features.core_dynamic_rendering {
        device_extensions.push(ash::khr::dynamic_rendering::NAME.as_ptr());
    }
    if has_device_extension(instance, physical_device, ash::khr::portability_subset::NAME) {
        device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());
    }

    let mut dynamic_rendering =
        vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);
    let mut multiview =
        vk::PhysicalDeviceMultiviewFeatures::default().multiview(features.multiview);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .push_next(&mut dynamic_rendering)
        .push_next(&mut multiview);

    let device =
        unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    Ok(device)
}

/// `vkCmdBeginRendering` from the core API or the KHR extension.
#[derive(Clone)]
pub enum DynamicRendering {
    Core(ash::Device),
    Khr(ash::khr::dynamic_rendering::Device),
}

impl DynamicRendering {
    pub fn new(instance: &ash::Instance, device: &ash::Device, features: DeviceFeatures) -> Self {
        if features.core_dynamic_rendering {
            Self::Core(device.clone())
        } else {
            Self::Khr(ash::khr::dynamic_rendering::Device::new(instance, device))
        }
    }

    pub fn begin(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
        match self {
            Self::Core(device) => unsafe { device.cmd_begin_rendering(cmd, info) },
            Self::Khr(ext) => unsafe { ext.cmd_begin_rendering(cmd, info) },
        }
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        match self {
            Self::Core(device) => unsafe { device.cmd_end_rendering(cmd) },
            Self::Khr(ext) => unsafe { ext.cmd_end_rendering(cmd) },
        }
    }
}
