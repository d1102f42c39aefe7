//! Graphics device.
//!
//! The [`GraphicsDevice`] is the factory for textures, framebuffers and
//! command queues. It is created by [`GraphicsInstance::create_device`].

use std::sync::{Arc, RwLock, Weak};

use crate::backend::{GpuBackend, SwapchainImage};
use crate::command::CommandQueue;
use crate::error::GraphicsError;
use crate::framebuffer::{Framebuffer, FramebufferDescriptor};
use crate::instance::GraphicsInstance;
use crate::resources::{Texture, TextureStorage, Volume};
use crate::types::{CommandQueueDescriptor, TextureDescriptor, TextureFormat, TextureType};

/// Capabilities of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum width/height of 1D, 2D and cube textures.
    pub max_texture_dimension_2d: u32,
    /// Maximum extent of a volume along any axis.
    pub max_texture_dimension_3d: u32,
    pub max_texture_array_layers: u32,
    pub max_color_attachments: u32,
    pub compute_shaders: bool,
    /// Whether stereo framebuffers can be rendered in one pass.
    pub multiview: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension_2d: 16384,
            max_texture_dimension_3d: 2048,
            max_texture_array_layers: 2048,
            max_color_attachments: 8,
            compute_shaders: true,
            multiview: true,
        }
    }
}

/// A graphics device for creating GPU resources.
///
/// All creation methods take `self: &Arc<Self>`; every resource keeps its
/// device alive.
///
/// # Example
///
/// ```ignore
/// let device = instance.create_device()?;
/// let texture = device.create_texture(&TextureDescriptor::new_2d(
///     1920, 1080,
///     TextureFormat::Rgba8Unorm,
///     TextureUsage::RENDER_ATTACHMENT,
/// ))?;
/// let queue = device.create_command_queue(CommandQueueDescriptor::new())?;
/// ```
pub struct GraphicsDevice {
    instance: Arc<GraphicsInstance>,
    name: String,
    capabilities: DeviceCapabilities,
    textures: RwLock<Vec<Weak<Texture>>>,
    volumes: RwLock<Vec<Weak<Volume>>>,
}

impl GraphicsDevice {
    pub(crate) fn new(
        instance: Arc<GraphicsInstance>,
        name: String,
        capabilities: DeviceCapabilities,
    ) -> Self {
        Self {
            instance,
            name,
            capabilities,
            textures: RwLock::new(Vec::new()),
            volumes: RwLock::new(Vec::new()),
        }
    }

    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    pub(crate) fn backend(&self) -> &GpuBackend {
        self.instance.backend()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Create a 1D, 2D, 2D-array or cube texture.
    ///
    /// Depth/stencil formats may resolve to the closest supported format; see
    /// [`TextureResource::resolved_format`](crate::TextureResource::resolved_format).
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] for an invalid descriptor
    /// (including `TextureType::D3`, which belongs to
    /// [`create_volume`](Self::create_volume)), and
    /// [`GraphicsError::FeatureNotSupported`] if no suitable format exists.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        crate::profile_function!();
        if descriptor.texture_type == TextureType::D3 {
            return Err(GraphicsError::InvalidParameter(
                "3D textures are created with create_volume".to_string(),
            ));
        }

        let storage = self.create_storage(descriptor)?;
        let texture = Arc::new(Texture::new(storage));

        if let Ok(mut textures) = self.textures.write() {
            textures.push(Arc::downgrade(&texture));
            crate::profile_plot!("tracked_textures", textures.len());
        }

        log::trace!(
            "GraphicsDevice: created texture {:?}, size={}x{}, layers={}, mips={}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.num_layers(),
            descriptor.mip_level_count
        );

        Ok(texture)
    }

    /// Create a volumetric (3D) texture.
    pub fn create_volume(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Volume>, GraphicsError> {
        crate::profile_function!();
        if descriptor.texture_type != TextureType::D3 {
            return Err(GraphicsError::InvalidParameter(format!(
                "create_volume needs a D3 descriptor, got {:?}",
                descriptor.texture_type
            )));
        }

        let storage = self.create_storage(descriptor)?;
        let volume = Arc::new(Volume::new(storage));

        if let Ok(mut volumes) = self.volumes.write() {
            volumes.push(Arc::downgrade(&volume));
        }

        log::trace!(
            "GraphicsDevice: created volume {:?}, size={}x{}x{}, mips={}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth,
            descriptor.mip_level_count
        );

        Ok(volume)
    }

    /// Wrap a swapchain image in a [`Texture`].
    ///
    /// The texture never frees the native image; the swapchain keeps
    /// ownership.
    pub fn import_swapchain_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
        image: SwapchainImage,
    ) -> Result<Arc<Texture>, GraphicsError> {
        if descriptor.texture_type != TextureType::D2 || descriptor.mip_level_count != 1 {
            return Err(GraphicsError::InvalidParameter(
                "swapchain textures are single-mip 2D textures".to_string(),
            ));
        }
        descriptor.validate()?;

        let gpu = self
            .backend()
            .import_swapchain_texture(descriptor, descriptor.format, image)?;
        let storage = TextureStorage::new(
            Arc::clone(self),
            descriptor.clone(),
            descriptor.format,
            gpu,
            true,
        );
        let texture = Arc::new(Texture::new(storage));

        if let Ok(mut textures) = self.textures.write() {
            textures.push(Arc::downgrade(&texture));
        }

        log::trace!(
            "GraphicsDevice: imported swapchain texture {:?}, size={}x{}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height
        );

        Ok(texture)
    }

    /// Create a framebuffer from a set of attachments.
    pub fn create_framebuffer(
        &self,
        descriptor: FramebufferDescriptor,
    ) -> Result<Arc<Framebuffer>, GraphicsError> {
        let label = descriptor.label.clone();
        let framebuffer = Framebuffer::new(descriptor)?;
        log::trace!(
            "GraphicsDevice: created framebuffer {:?} with {} color slots",
            label,
            framebuffer.color_attachment_slot_count()
        );
        Ok(Arc::new(framebuffer))
    }

    pub fn create_command_queue(
        self: &Arc<Self>,
        descriptor: CommandQueueDescriptor,
    ) -> Result<Arc<CommandQueue>, GraphicsError> {
        log::trace!("GraphicsDevice: created command queue {:?}", descriptor.label);
        Ok(Arc::new(CommandQueue::new(Arc::clone(self), descriptor)))
    }

    /// Block until all submitted work on the device has completed.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.backend().wait_idle()
    }

    /// Number of live textures created by this device.
    pub fn texture_count(&self) -> usize {
        self.textures
            .read()
            .map(|t| t.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Number of live volumes created by this device.
    pub fn volume_count(&self) -> usize {
        self.volumes
            .read()
            .map(|v| v.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Clean up dead weak references to released resources.
    pub fn cleanup_dead_resources(&self) {
        if let Ok(mut textures) = self.textures.write() {
            textures.retain(|w| w.strong_count() > 0);
        }
        if let Ok(mut volumes) = self.volumes.write() {
            volumes.retain(|w| w.strong_count() > 0);
        }
    }

    fn create_storage(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureStorage, GraphicsError> {
        descriptor.validate()?;
        self.check_limits(descriptor)?;

        let format = self.resolve_format(descriptor)?;
        let gpu = self.backend().create_texture(descriptor, format)?;
        Ok(TextureStorage::new(
            Arc::clone(self),
            descriptor.clone(),
            format,
            gpu,
            false,
        ))
    }

    fn check_limits(&self, descriptor: &TextureDescriptor) -> Result<(), GraphicsError> {
        let size = descriptor.size;
        let max_dim = match descriptor.texture_type {
            TextureType::D3 => self.capabilities.max_texture_dimension_3d,
            _ => self.capabilities.max_texture_dimension_2d,
        };
        if size.width > max_dim || size.height > max_dim || size.depth > max_dim {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture dimension exceeds maximum {max_dim}"
            )));
        }
        if descriptor.num_layers() > self.capabilities.max_texture_array_layers {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} layers exceed maximum {}",
                descriptor.num_layers(),
                self.capabilities.max_texture_array_layers
            )));
        }
        Ok(())
    }

    /// Pick the format the backend will allocate for `descriptor`.
    ///
    /// Depth/stencil formats walk their candidate list; color formats must be
    /// supported as requested.
    fn resolve_format(&self, descriptor: &TextureDescriptor) -> Result<TextureFormat, GraphicsError> {
        let backend = self.backend();
        let supported = |format: TextureFormat| {
            backend.supports_format(
                format,
                descriptor.usage,
                descriptor.sample_count,
                descriptor.texture_type,
            )
        };

        if !descriptor.format.is_depth_stencil() {
            if supported(descriptor.format) {
                return Ok(descriptor.format);
            }
            return Err(GraphicsError::FeatureNotSupported(format!(
                "{:?} with usage {:?} is not supported by the {} backend",
                descriptor.format,
                descriptor.usage,
                backend.name()
            )));
        }

        let resolved = descriptor
            .format
            .depth_stencil_candidates()
            .iter()
            .copied()
            .find(|&candidate| supported(candidate))
            .ok_or_else(|| {
                GraphicsError::FeatureNotSupported(format!(
                    "no supported substitute for {:?}",
                    descriptor.format
                ))
            })?;

        if resolved != descriptor.format {
            log::debug!(
                "GraphicsDevice: {:?} unsupported, using {:?} for {:?}",
                descriptor.format,
                resolved,
                descriptor.label
            );
        }
        Ok(resolved)
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);
