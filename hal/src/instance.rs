//! Graphics instance.
//!
//! The [`GraphicsInstance`] is the top-level entry point. It owns the GPU
//! backend selected by [`InstanceParameters`] and creates
//! [`GraphicsDevice`]s on top of it.

use std::sync::{Arc, RwLock, Weak};

use crate::backend::{self, GpuBackend};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::TextureFormat;

/// Environment variable selecting the backend (`dummy`, `wgpu`, `vulkan`, `auto`).
pub const BACKEND_ENV_VAR: &str = "REDLILIUM_HAL_BACKEND";

/// Environment variable toggling validation layers (`0` or `1`).
pub const VALIDATION_ENV_VAR: &str = "REDLILIUM_HAL_VALIDATION";

/// Which GPU backend an instance uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// CPU simulation, always available.
    Dummy,
    /// wgpu (Vulkan, Metal, DX12 or GL underneath).
    Wgpu,
    /// Native Vulkan through ash.
    Vulkan,
    /// Try Vulkan, then wgpu, then fall back to Dummy.
    #[default]
    Auto,
}

impl BackendType {
    /// Parse a backend name as accepted by [`BACKEND_ENV_VAR`].
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dummy" => Some(Self::Dummy),
            "wgpu" | "webgpu" => Some(Self::Wgpu),
            "vulkan" => Some(Self::Vulkan),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Which native API wgpu should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WgpuBackendType {
    /// Let wgpu pick the primary backend for the platform.
    #[default]
    Auto,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl WgpuBackendType {
    #[cfg(feature = "wgpu-backend")]
    pub(crate) fn to_wgpu_backends(self) -> wgpu::Backends {
        match self {
            Self::Auto => wgpu::Backends::PRIMARY,
            Self::Vulkan => wgpu::Backends::VULKAN,
            Self::Metal => wgpu::Backends::METAL,
            Self::Dx12 => wgpu::Backends::DX12,
            Self::Gl => wgpu::Backends::GL,
        }
    }
}

/// Configuration for creating a [`GraphicsInstance`].
#[derive(Debug, Clone)]
pub struct InstanceParameters {
    pub backend: BackendType,
    pub wgpu_backend: WgpuBackendType,
    /// Enable API validation (Vulkan validation layers, wgpu validation).
    pub validation: bool,
    /// Enable extra debug information (object labels, wgpu debug flags).
    pub debug: bool,
    /// Formats the dummy backend reports as unsupported.
    ///
    /// Lets tests exercise closest-format resolution without a GPU.
    pub dummy_unsupported_formats: Vec<TextureFormat>,
}

impl Default for InstanceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            wgpu_backend: WgpuBackendType::Auto,
            validation: cfg!(debug_assertions),
            debug: cfg!(debug_assertions),
            dummy_unsupported_formats: Vec::new(),
        }
    }
}

impl InstanceParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by [`BACKEND_ENV_VAR`] and [`VALIDATION_ENV_VAR`].
    pub fn from_env() -> Self {
        let mut params = Self::default();

        if let Ok(value) = std::env::var(BACKEND_ENV_VAR) {
            match BackendType::parse(&value) {
                Some(backend) => params.backend = backend,
                None => log::warn!("{BACKEND_ENV_VAR}={value:?} not recognized, using Auto"),
            }
        }
        if let Ok(value) = std::env::var(VALIDATION_ENV_VAR) {
            match value.trim() {
                "1" | "true" => params.validation = true,
                "0" | "false" => params.validation = false,
                other => log::warn!("{VALIDATION_ENV_VAR}={other:?} not recognized, ignored"),
            }
        }
        params
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_wgpu_backend(mut self, wgpu_backend: WgpuBackendType) -> Self {
        self.wgpu_backend = wgpu_backend;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Make the dummy backend reject `format`.
    pub fn with_dummy_unsupported_format(mut self, format: TextureFormat) -> Self {
        self.dummy_unsupported_formats.push(format);
        self
    }
}

/// Information about a graphics adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: String,
    pub device_type: AdapterType,
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    Discrete,
    Integrated,
    Software,
    Unknown,
}

/// The graphics instance owns the backend and creates devices.
///
/// # Example
///
/// ```ignore
/// let instance = GraphicsInstance::new()?;
/// let device = instance.create_device()?;
/// ```
pub struct GraphicsInstance {
    self_ref: RwLock<Weak<GraphicsInstance>>,
    // Devices hold the instance strongly, so the instance only tracks them weakly.
    devices: RwLock<Vec<Weak<GraphicsDevice>>>,
    parameters: InstanceParameters,
    backend: GpuBackend,
}

impl GraphicsInstance {
    /// Create an instance configured from the environment.
    ///
    /// See [`InstanceParameters::from_env`].
    pub fn new() -> Result<Arc<Self>, GraphicsError> {
        Self::with_parameters(InstanceParameters::from_env())
    }

    /// Create an instance with explicit parameters.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InitializationFailed`] if the requested backend
    /// cannot be initialized. `BackendType::Auto` only fails if every
    /// compiled backend fails.
    pub fn with_parameters(parameters: InstanceParameters) -> Result<Arc<Self>, GraphicsError> {
        log::info!(
            "Creating GraphicsInstance (backend: {:?}, validation: {})",
            parameters.backend,
            parameters.validation
        );

        let backend = backend::create_backend(&parameters)?;
        log::info!("Using GPU backend: {}", backend.name());

        let instance = Arc::new(Self {
            self_ref: RwLock::new(Weak::new()),
            devices: RwLock::new(Vec::new()),
            parameters,
            backend,
        });

        if let Ok(mut self_ref) = instance.self_ref.write() {
            *self_ref = Arc::downgrade(&instance);
        }

        Ok(instance)
    }

    pub(crate) fn backend(&self) -> &GpuBackend {
        &self.backend
    }

    fn arc_self(&self) -> Option<Arc<GraphicsInstance>> {
        self.self_ref.read().ok().and_then(|r| r.upgrade())
    }

    pub fn parameters(&self) -> &InstanceParameters {
        &self.parameters
    }

    /// The backend that was actually selected.
    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Native Vulkan objects, if this instance runs on the Vulkan backend.
    #[cfg(feature = "vulkan-backend")]
    pub fn vulkan_backend(&self) -> Option<&backend::VulkanBackend> {
        match &self.backend {
            GpuBackend::Vulkan(vulkan) => Some(vulkan),
            _ => None,
        }
    }

    /// Native wgpu objects, if this instance runs on the wgpu backend.
    #[cfg(feature = "wgpu-backend")]
    pub fn wgpu_backend(&self) -> Option<&backend::WgpuBackend> {
        match &self.backend {
            GpuBackend::Wgpu(wgpu) => Some(wgpu),
            _ => None,
        }
    }

    /// Enumerate available graphics adapters.
    ///
    /// The backend opens one adapter at instance creation, so this returns
    /// exactly one entry.
    pub fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        vec![self.backend.adapter_info()]
    }

    /// Create a device on the default adapter.
    pub fn create_device(&self) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        self.create_device_with_adapter(0)
    }

    /// Create a device on a specific adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter index is out of range.
    pub fn create_device_with_adapter(
        &self,
        adapter_index: usize,
    ) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        let adapters = self.enumerate_adapters();
        let Some(adapter) = adapters.get(adapter_index) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "adapter index {adapter_index} out of range ({})",
                adapters.len()
            )));
        };

        log::info!("Creating device on adapter: {}", adapter.name);

        let instance = self.arc_self().ok_or_else(|| {
            GraphicsError::ResourceCreationFailed("instance has been dropped".to_string())
        })?;
        let capabilities = self.backend.capabilities();
        let device = Arc::new(GraphicsDevice::new(
            instance,
            adapter.name.clone(),
            capabilities,
        ));

        if let Ok(mut devices) = self.devices.write() {
            devices.push(Arc::downgrade(&device));
        }

        Ok(device)
    }

    /// Live devices created by this instance.
    pub fn devices(&self) -> Vec<Arc<GraphicsDevice>> {
        self.devices
            .read()
            .map(|d| d.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Number of live devices created by this instance.
    pub fn device_count(&self) -> usize {
        self.devices
            .read()
            .map(|d| d.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl Drop for GraphicsInstance {
    fn drop(&mut self) {
        log::info!("GraphicsInstance ({}) destroyed", self.backend.name());
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("device_count", &self.device_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsInstance: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_instance() -> Arc<GraphicsInstance> {
        GraphicsInstance::with_parameters(InstanceParameters::new().with_backend(BackendType::Dummy))
            .unwrap()
    }

    #[test]
    fn test_instance_creation() {
        let instance = dummy_instance();
        assert_eq!(instance.device_count(), 0);
        assert_eq!(instance.backend_type(), BackendType::Dummy);
    }

    #[test]
    fn test_enumerate_adapters() {
        let instance = dummy_instance();
        let adapters = instance.enumerate_adapters();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].device_type, AdapterType::Software);
    }

    #[test]
    fn test_create_device() {
        let instance = dummy_instance();
        let device = instance.create_device().unwrap();
        assert_eq!(device.name(), "Dummy Adapter");
        assert_eq!(instance.device_count(), 1);
        assert!(Arc::ptr_eq(device.instance(), &instance));
    }

    #[test]
    fn test_devices_are_tracked_weakly() {
        let instance = dummy_instance();
        let device = instance.create_device().unwrap();
        let _second = instance.create_device().unwrap();
        assert_eq!(instance.device_count(), 2);

        drop(device);
        assert_eq!(instance.device_count(), 1);
        assert_eq!(instance.devices().len(), 1);
    }

    #[test]
    fn test_invalid_adapter_index() {
        let instance = dummy_instance();
        assert!(instance.create_device_with_adapter(999).is_err());
    }

    #[test]
    fn test_backend_type_parse() {
        assert_eq!(BackendType::parse("Vulkan"), Some(BackendType::Vulkan));
        assert_eq!(BackendType::parse(" dummy "), Some(BackendType::Dummy));
        assert_eq!(BackendType::parse("webgpu"), Some(BackendType::Wgpu));
        assert_eq!(BackendType::parse("metal"), None);
    }

    #[test]
    fn test_parameters_builder() {
        let params = InstanceParameters::new()
            .with_backend(BackendType::Dummy)
            .with_validation(false)
            .with_debug(true)
            .with_dummy_unsupported_format(TextureFormat::Depth32Float);
        assert_eq!(params.backend, BackendType::Dummy);
        assert!(!params.validation);
        assert!(params.debug);
        assert_eq!(
            params.dummy_unsupported_formats,
            vec![TextureFormat::Depth32Float]
        );
    }
}
