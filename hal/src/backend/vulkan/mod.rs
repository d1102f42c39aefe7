//! Native Vulkan backend using ash.
//!
//! One graphics queue executes every submission. Each submission records a
//! fresh primary command buffer and signals its own fence; finished
//! submissions are retired (command buffer freed, textures released) on the
//! next submit or wait. Memory comes from gpu-allocator. Render passes use
//! dynamic rendering (core in Vulkan 1.3, `VK_KHR_dynamic_rendering`
//! before that); stereo passes use multiview where the device supports it.

mod allocator;
mod barriers;
mod command;
mod conversion;
mod debug;
mod device;
mod encoding;
mod instance;
mod layout;
mod texture;

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::command::recording::Submission;
use crate::command::{SubmissionId, SubmissionState, SubmissionStatus};
use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::framebuffer::MAX_COLOR_ATTACHMENTS;
use crate::instance::{AdapterInfo, AdapterType, InstanceParameters};
use crate::resources::TextureStorage;
use crate::types::{
    FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType, TextureUsage,
};

use super::{GpuTexture, GpuTextureView};

use allocator::SharedAllocator;
use command::Fence;
use conversion::{
    convert_image_type, convert_sample_count, convert_texture_format, convert_texture_usage,
};
use debug::DebugLabels;
use device::{DeviceFeatures, DynamicRendering};
use encoding::vulkan_image;
pub(crate) use texture::VulkanImage;
use texture::TransferContext;

/// A submission whose fence has not been observed signaled yet.
struct InFlight {
    id: SubmissionId,
    fence: Arc<Fence>,
    cmd: vk::CommandBuffer,
    /// Keeps every texture the work touches alive.
    submission: Submission,
}

/// State guarded by the queue lock: the command pool and the queue itself
/// are externally synchronized objects.
struct QueueState {
    command_pool: vk::CommandPool,
    in_flight: Vec<InFlight>,
}

/// Native objects created together when opening a device.
struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    features: DeviceFeatures,
    graphics_queue_family: u32,
    device: ash::Device,
    graphics_queue: vk::Queue,
    allocator: gpu_allocator::vulkan::Allocator,
    command_pool: vk::CommandPool,
}

/// Vulkan backend state.
pub struct VulkanBackend {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    allocator: ManuallyDrop<SharedAllocator>,
    features: DeviceFeatures,
    rendering: DynamicRendering,
    labels: DebugLabels,
    queue: Mutex<QueueState>,
}

impl VulkanBackend {
    /// Create the backend from instance parameters.
    pub(crate) fn with_params(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        log::info!("Initializing Vulkan backend");

        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan library: {}", e))
        })?;

        let instance::InstanceSetup {
            instance,
            debug_utils,
            debug_messenger,
        } = instance::create_instance(&entry, params.validation, params.debug)?;

        let parts = match Self::open_device(&instance) {
            Ok(parts) => parts,
            Err(e) => {
                unsafe {
                    if let (Some(debug_utils), Some(messenger)) = (&debug_utils, debug_messenger) {
                        debug_utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let properties =
            unsafe { instance.get_physical_device_properties(parts.physical_device) };
        let rendering = DynamicRendering::new(&instance, &parts.device, parts.features);
        let labels = DebugLabels::new(&instance, &parts.device, debug_utils.is_some());

        log::info!(
            "Vulkan backend initialized: {} (API {}.{}.{}, multiview: {})",
            properties
                .device_name_as_c_str()
                .unwrap_or(c"unknown")
                .to_string_lossy(),
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version),
            parts.features.multiview
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
            physical_device: parts.physical_device,
            properties,
            device: parts.device,
            graphics_queue: parts.graphics_queue,
            graphics_queue_family: parts.graphics_queue_family,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(parts.allocator))),
            features: parts.features,
            rendering,
            labels,
            queue: Mutex::new(QueueState {
                command_pool: parts.command_pool,
                in_flight: Vec::new(),
            }),
        })
    }

    fn open_device(instance: &ash::Instance) -> Result<DeviceParts, GraphicsError> {
        let (physical_device, features) = device::select_physical_device(instance)?;
        let graphics_queue_family = device::find_graphics_queue_family(instance, physical_device)?;
        let device = device::create_logical_device(
            instance,
            physical_device,
            graphics_queue_family,
            features,
        )?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator =
            match allocator::create_allocator(instance, physical_device, device.clone()) {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    return Err(e);
                }
            };

        let command_pool = match command::create_command_pool(&device, graphics_queue_family) {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        Ok(DeviceParts {
            physical_device,
            features,
            graphics_queue_family,
            device,
            graphics_queue,
            allocator,
            command_pool,
        })
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the graphics queue.
    ///
    /// Submitting to it directly bypasses the backend's queue lock; callers
    /// must not do so concurrently with HAL submissions.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Whether stereo passes render both views in one pass.
    pub fn supports_multiview(&self) -> bool {
        self.features.multiview
    }

    pub(crate) fn adapter_info(&self) -> AdapterInfo {
        let name = self
            .properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "Unknown Vulkan device".to_string());
        let vendor = match self.properties.vendor_id {
            0x1002 => "AMD".to_string(),
            0x10DE => "NVIDIA".to_string(),
            0x8086 => "Intel".to_string(),
            0x13B5 => "ARM".to_string(),
            0x5143 => "Qualcomm".to_string(),
            0x106B => "Apple".to_string(),
            0x10005 => "Mesa".to_string(),
            other => format!("0x{:04X}", other),
        };
        let device_type = match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
            vk::PhysicalDeviceType::CPU => AdapterType::Software,
            _ => AdapterType::Unknown,
        };
        AdapterInfo {
            name,
            vendor,
            device_type,
        }
    }

    pub(crate) fn capabilities(&self) -> DeviceCapabilities {
        let limits = &self.properties.limits;
        DeviceCapabilities {
            max_texture_dimension_2d: limits.max_image_dimension2_d,
            max_texture_dimension_3d: limits.max_image_dimension3_d,
            max_texture_array_layers: limits.max_image_array_layers,
            max_color_attachments: limits
                .max_color_attachments
                .min(MAX_COLOR_ATTACHMENTS as u32),
            compute_shaders: true,
            multiview: self.features.multiview,
        }
    }

    pub(crate) fn supports_format(
        &self,
        format: TextureFormat,
        usage: TextureUsage,
        sample_count: u32,
        texture_type: TextureType,
    ) -> bool {
        let (image_type, flags) = convert_image_type(texture_type, usage);
        let mut vk_usage = convert_texture_usage(usage, format);
        if vk_usage.is_empty() {
            vk_usage = vk::ImageUsageFlags::TRANSFER_DST;
        }
        let properties = unsafe {
            self.instance.get_physical_device_image_format_properties(
                self.physical_device,
                convert_texture_format(format),
                image_type,
                vk::ImageTiling::OPTIMAL,
                vk_usage,
                flags,
            )
        };
        match properties {
            Ok(properties) => properties
                .sample_counts
                .contains(convert_sample_count(sample_count)),
            Err(_) => false,
        }
    }

    fn format_features(&self, format: TextureFormat) -> vk::FormatFeatureFlags {
        unsafe {
            self.instance.get_physical_device_format_properties(
                self.physical_device,
                convert_texture_format(format),
            )
        }
        .optimal_tiling_features
    }

    fn supports_linear_blit(&self, format: TextureFormat) -> bool {
        !format.is_depth_stencil()
            && self
                .format_features(format)
                .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    pub(crate) fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
    ) -> Result<GpuTexture, GraphicsError> {
        let image =
            VulkanImage::create(&self.device, &self.allocator, &self.labels, descriptor, format)?;
        Ok(GpuTexture::Vulkan(image))
    }

    pub(crate) fn import_swapchain_texture(
        &self,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
        image: vk::Image,
    ) -> Result<GpuTexture, GraphicsError> {
        let image = VulkanImage::import(&self.device, &self.allocator, descriptor, format, image)?;
        Ok(GpuTexture::Vulkan(image))
    }

    pub(crate) fn create_framebuffer_view(
        &self,
        texture: &TextureStorage,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> Result<GpuTextureView, GraphicsError> {
        let image = expect_vulkan_image(texture)?;
        let view = image.create_framebuffer_view(mip_level, layer, mode)?;
        Ok(GpuTextureView::Vulkan {
            device: self.device.clone(),
            view,
        })
    }

    pub(crate) fn upload_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        let image = expect_vulkan_image(texture)?;
        {
            let queue = self.queue.lock();
            image.upload(&self.transfer_context(&queue), range, data, bytes_per_row)?;
        }
        self.retire_completed()
    }

    pub(crate) fn read_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        let image = expect_vulkan_image(texture)?;
        {
            let queue = self.queue.lock();
            image.read(&self.transfer_context(&queue), range, out, bytes_per_row)?;
        }
        self.retire_completed()
    }

    fn transfer_context<'a>(&'a self, queue: &QueueState) -> TransferContext<'a> {
        TransferContext {
            device: &self.device,
            allocator: &self.allocator,
            pool: queue.command_pool,
            queue: self.graphics_queue,
        }
    }

    /// Mips are generated with image blits.
    pub(crate) fn check_mipmap_support(
        &self,
        texture: &Arc<TextureStorage>,
    ) -> Result<(), GraphicsError> {
        let usage = texture.descriptor().usage;
        if !usage.contains(TextureUsage::COPY_SRC | TextureUsage::COPY_DST) {
            return Err(GraphicsError::validation(format!(
                "mip generation on Vulkan requires COPY_SRC | COPY_DST usage, texture {:?} has {:?}",
                texture.label(),
                usage
            )));
        }
        let required = vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST;
        if !self.format_features(texture.format()).contains(required) {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "format {:?} cannot be blitted",
                texture.format()
            )));
        }
        Ok(())
    }

    pub(crate) fn submit(&self, submission: Submission) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_submit");

        let fence = Arc::new(Fence::new(&self.device)?);
        {
            let mut queue = self.queue.lock();
            let pool = queue.command_pool;
            let cmd = command::begin_command_buffer(&self.device, pool)?;

            self.record_submission(cmd, &submission);

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            let submitted = unsafe { self.device.end_command_buffer(cmd) }.and_then(|_| unsafe {
                self.device
                    .queue_submit(self.graphics_queue, &[submit_info], fence.handle())
            });
            if let Err(e) = submitted {
                unsafe { self.device.free_command_buffers(pool, &command_buffers) };
                log::error!("Vulkan: {} failed to submit: {:?}", submission.id, e);
                return Err(e.into());
            }

            submission.state.advance(SubmissionStatus::Scheduled);
            log::debug!(
                "Vulkan: {} submitted ({:?}, {} commands)",
                submission.id,
                submission.label,
                submission.commands.len()
            );
            queue.in_flight.push(InFlight {
                id: submission.id,
                fence,
                cmd,
                submission,
            });
        }
        self.retire_completed()
    }

    /// Release every submission whose fence has signaled.
    fn retire_completed(&self) -> Result<(), GraphicsError> {
        let mut error = None;
        let finished = {
            let mut queue = self.queue.lock();
            let mut finished = Vec::new();
            let mut pending = Vec::with_capacity(queue.in_flight.len());
            for entry in queue.in_flight.drain(..) {
                match entry.fence.is_signaled() {
                    Ok(true) => finished.push(entry),
                    Ok(false) => pending.push(entry),
                    Err(e) => {
                        error.get_or_insert(e);
                        pending.push(entry);
                    }
                }
            }
            queue.in_flight = pending;
            for entry in &finished {
                unsafe {
                    self.device
                        .free_command_buffers(queue.command_pool, &[entry.cmd])
                };
            }
            finished
        };

        // Textures are released outside the lock.
        for entry in finished {
            entry.submission.state.advance(SubmissionStatus::Completed);
            log::trace!("Vulkan: {} completed", entry.id);
        }

        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn wait_for_submission(&self, state: &SubmissionState) -> Result<(), GraphicsError> {
        if state.status() >= SubmissionStatus::Completed {
            return Ok(());
        }
        let fence = {
            let queue = self.queue.lock();
            queue
                .in_flight
                .iter()
                .find(|entry| std::ptr::eq(Arc::as_ptr(&entry.submission.state), state))
                .map(|entry| Arc::clone(&entry.fence))
        };
        if let Some(fence) = fence {
            fence.wait()?;
        }
        self.retire_completed()
    }

    pub(crate) fn wait_idle(&self) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_wait_idle");
        {
            let _queue = self.queue.lock();
            unsafe { self.device.queue_wait_idle(self.graphics_queue) }?;
        }
        self.retire_completed()
    }
}

fn expect_vulkan_image(texture: &TextureStorage) -> Result<&VulkanImage, GraphicsError> {
    vulkan_image(texture).ok_or_else(|| {
        GraphicsError::Internal(format!("texture {} is not a Vulkan texture", texture.id()))
    })
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("Vulkan: device_wait_idle failed during shutdown: {:?}", e);
            }
        }

        let queue = self.queue.get_mut();
        let in_flight = std::mem::take(&mut queue.in_flight);
        for entry in &in_flight {
            unsafe {
                self.device
                    .free_command_buffers(queue.command_pool, &[entry.cmd])
            };
            entry.submission.state.advance(SubmissionStatus::Completed);
        }
        drop(in_flight);

        unsafe {
            self.device
                .destroy_command_pool(queue.command_pool, None);
            // Images hold their own handle to the allocator; none can outlive
            // the backend, so this releases the last one.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
        log::info!("Vulkan backend destroyed");
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("physical_device", &self.physical_device)
            .field("graphics_queue_family", &self.graphics_queue_family)
            .field("features", &self.features)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}
