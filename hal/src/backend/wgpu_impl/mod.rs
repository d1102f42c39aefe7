//! wgpu GPU backend implementation.
//!
//! This backend uses wgpu for cross-platform GPU access, supporting
//! Vulkan, Metal, DX12, and WebGPU.
//!
//! Every submission is encoded into one wgpu command buffer. Completion is
//! reported through `on_submitted_work_done`, whose callbacks run while the
//! device is polled; the backend polls on every submit and wait.

mod conversion;
mod encoding;
mod mipmap;
mod resources;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command::recording::Submission;
use crate::command::{SubmissionId, SubmissionState, SubmissionStatus};
use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::framebuffer::MAX_COLOR_ATTACHMENTS;
use crate::instance::{AdapterInfo, AdapterType, InstanceParameters};
use crate::resources::TextureStorage;
use crate::types::{TextureFormat, TextureType, TextureUsage};

use conversion::{convert_texture_format, convert_texture_usage};
use mipmap::MipmapGenerator;

/// Optional features enabled whenever the adapter has them.
fn optional_features() -> wgpu::Features {
    wgpu::Features::MULTIVIEW
        | wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
        | wgpu::Features::DEPTH32FLOAT_STENCIL8
        | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES
}

/// A submission wgpu has not reported as done yet.
struct InFlight {
    id: SubmissionId,
    index: wgpu::SubmissionIndex,
    /// Keeps every texture the work touches alive.
    submission: Submission,
}

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    mipmaps: MipmapGenerator,
    in_flight: Mutex<Vec<InFlight>>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .field("features", &self.device.features())
            .finish_non_exhaustive()
    }
}

impl WgpuBackend {
    /// Create a new wgpu backend with custom parameters.
    pub(crate) fn with_params(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        log::info!("Initializing wgpu backend");

        // Determine which wgpu backends to enable
        let backends = params.wgpu_backend.to_wgpu_backends();

        // Configure instance flags based on validation/debug settings
        let mut flags = wgpu::InstanceFlags::default();
        if params.validation {
            flags |= wgpu::InstanceFlags::VALIDATION;
            flags |= wgpu::InstanceFlags::GPU_BASED_VALIDATION;
        }
        if params.debug {
            flags |= wgpu::InstanceFlags::DEBUG;
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            flags,
            backend_options: wgpu::BackendOptions::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("No compatible GPU adapter: {e}"))
        })?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let required_features = adapter.features() & optional_features();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("RedLilium Device"),
            required_features,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Device creation failed: {e}"))
        })?;

        let mipmaps = MipmapGenerator::new(&device);

        log::info!(
            "wgpu backend initialized (features: {:?})",
            device.features()
        );

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            mipmaps,
            in_flight: Mutex::new(Vec::new()),
        })
    }

    /// Get the wgpu instance.
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Get the wgpu adapter.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Get the wgpu queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Whether stereo passes render both views in one pass.
    pub fn supports_multiview(&self) -> bool {
        self.device.features().contains(wgpu::Features::MULTIVIEW)
    }

    pub(crate) fn adapter_info(&self) -> AdapterInfo {
        let info = self.adapter.get_info();
        let vendor = match info.vendor {
            0x1002 => "AMD".to_string(),
            0x10DE => "NVIDIA".to_string(),
            0x8086 => "Intel".to_string(),
            0x13B5 => "ARM".to_string(),
            0x5143 => "Qualcomm".to_string(),
            0x106B => "Apple".to_string(),
            0x10005 => "Mesa".to_string(),
            _ if !info.driver.is_empty() => info.driver.clone(),
            other => format!("0x{:04X}", other),
        };
        let device_type = match info.device_type {
            wgpu::DeviceType::DiscreteGpu => AdapterType::Discrete,
            wgpu::DeviceType::IntegratedGpu => AdapterType::Integrated,
            wgpu::DeviceType::Cpu => AdapterType::Software,
            wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => AdapterType::Unknown,
        };
        AdapterInfo {
            name: info.name,
            vendor,
            device_type,
        }
    }

    pub(crate) fn capabilities(&self) -> DeviceCapabilities {
        let limits = self.device.limits();
        DeviceCapabilities {
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_texture_dimension_3d: limits.max_texture_dimension_3d,
            max_texture_array_layers: limits.max_texture_array_layers,
            max_color_attachments: limits
                .max_color_attachments
                .min(MAX_COLOR_ATTACHMENTS as u32),
            compute_shaders: self
                .adapter
                .get_downlevel_capabilities()
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
            multiview: self.supports_multiview(),
        }
    }

    pub(crate) fn supports_format(
        &self,
        format: TextureFormat,
        usage: TextureUsage,
        sample_count: u32,
        texture_type: TextureType,
    ) -> bool {
        let wgpu_format = convert_texture_format(format);
        if !self
            .device
            .features()
            .contains(wgpu_format.required_features())
        {
            return false;
        }
        if texture_type == TextureType::D3 && format.is_depth_stencil() {
            return false;
        }
        let features = self.adapter.get_texture_format_features(wgpu_format);
        if !features
            .allowed_usages
            .contains(convert_texture_usage(usage))
        {
            return false;
        }
        sample_count == 1
            || (matches!(texture_type, TextureType::D2)
                && features.flags.sample_count_supported(sample_count))
    }

    /// Mips are rendered level by level.
    pub(crate) fn check_mipmap_support(
        &self,
        texture: &Arc<TextureStorage>,
    ) -> Result<(), GraphicsError> {
        let descriptor = texture.descriptor();
        let required = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
        if !descriptor.usage.contains(required) {
            return Err(GraphicsError::validation(format!(
                "mip generation on wgpu requires RENDER_ATTACHMENT | TEXTURE_BINDING usage, texture {:?} has {:?}",
                texture.label(),
                descriptor.usage
            )));
        }
        if descriptor.texture_type == TextureType::D3 {
            return Err(GraphicsError::FeatureNotSupported(
                "mip generation for volumes on wgpu".to_string(),
            ));
        }
        if !MipmapGenerator::supports_format(convert_texture_format(texture.format())) {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "format {:?} cannot be downsampled",
                texture.format()
            )));
        }
        Ok(())
    }

    pub(crate) fn submit(&self, submission: Submission) -> Result<(), GraphicsError> {
        crate::profile_scope!("wgpu_submit");

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: submission.label.as_deref(),
            });
        self.encode_submission(&mut encoder, &submission);

        let index = {
            let mut in_flight = self.lock_in_flight();
            let index = self.queue.submit(std::iter::once(encoder.finish()));
            let state = Arc::clone(&submission.state);
            self.queue.on_submitted_work_done(move || {
                state.advance(SubmissionStatus::Completed);
            });
            submission.state.advance(SubmissionStatus::Scheduled);
            log::debug!(
                "wgpu: {} submitted ({:?}, {} commands)",
                submission.id,
                submission.label,
                submission.commands.len()
            );
            in_flight.push(InFlight {
                id: submission.id,
                index: index.clone(),
                submission,
            });
            index
        };
        log::trace!("wgpu: submission index {:?}", index);

        self.poll()?;
        self.retire_completed();
        Ok(())
    }

    pub(crate) fn wait_for_submission(&self, state: &SubmissionState) -> Result<(), GraphicsError> {
        if state.status() >= SubmissionStatus::Completed {
            return Ok(());
        }
        let index = self
            .lock_in_flight()
            .iter()
            .find(|entry| std::ptr::eq(Arc::as_ptr(&entry.submission.state), state))
            .map(|entry| entry.index.clone());
        self.poll_wait(index)?;
        self.retire_completed();
        Ok(())
    }

    pub(crate) fn wait_idle(&self) -> Result<(), GraphicsError> {
        crate::profile_scope!("wgpu_wait_idle");
        self.poll_wait(None)?;
        self.retire_completed();
        Ok(())
    }

    /// Run callbacks for work that has already finished.
    fn poll(&self) -> Result<(), GraphicsError> {
        self.device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(map_poll_error)
    }

    /// Block until `index` (or all submitted work) has finished.
    fn poll_wait(&self, index: Option<wgpu::SubmissionIndex>) -> Result<(), GraphicsError> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: index,
                timeout: None,
            })
            .map(|_| ())
            .map_err(map_poll_error)
    }

    /// Release every submission whose completion callback has run.
    fn retire_completed(&self) {
        let finished: Vec<InFlight> = {
            let mut in_flight = self.lock_in_flight();
            let (finished, pending) = std::mem::take(&mut *in_flight)
                .into_iter()
                .partition(|entry| {
                    entry.submission.state.status() >= SubmissionStatus::Completed
                });
            *in_flight = pending;
            finished
        };
        // Textures are released outside the lock.
        for entry in finished {
            log::trace!("wgpu: {} completed", entry.id);
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Vec<InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn map_poll_error(error: wgpu::PollError) -> GraphicsError {
    log::error!("wgpu: device poll failed: {error}");
    match error {
        wgpu::PollError::Timeout => GraphicsError::Internal("wgpu poll timed out".to_string()),
        other => GraphicsError::Internal(format!("wgpu poll failed: {other}")),
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        if let Err(e) = self.poll_wait(None) {
            log::error!("wgpu: waiting for idle failed during shutdown: {e}");
        }
        let in_flight = std::mem::take(
            self.in_flight
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for entry in &in_flight {
            entry.submission.state.advance(SubmissionStatus::Completed);
        }
        log::info!("wgpu backend destroyed");
    }
}
