//! GPU texture resource.

use std::sync::Arc;

use crate::types::{Extent3d, TextureFormat};

use super::resource::sealed::Sealed;
use super::{TextureResource, TextureStorage};

/// A 1D, 2D, 2D-array or cube texture.
///
/// Textures are created by [`GraphicsDevice::create_texture`] and are
/// reference-counted. They hold a strong reference to their parent device,
/// keeping it alive. Volumetric textures are [`Volume`](super::Volume)s.
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(&TextureDescriptor::new_2d(
///     1920, 1080,
///     TextureFormat::Rgba8Unorm,
///     TextureUsage::RENDER_ATTACHMENT,
/// ))?;
/// println!("Texture size: {}x{}", texture.width(), texture.height());
/// ```
///
/// [`GraphicsDevice::create_texture`]: crate::GraphicsDevice::create_texture
pub struct Texture {
    storage: Arc<TextureStorage>,
}

impl Texture {
    pub(crate) fn new(storage: TextureStorage) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// Get the texture size.
    pub fn size(&self) -> Extent3d {
        self.storage.descriptor().size
    }

    /// Get the texture width.
    pub fn width(&self) -> u32 {
        self.size().width
    }

    /// Get the texture height.
    pub fn height(&self) -> u32 {
        self.size().height
    }

    /// Get the resolved texture format.
    pub fn native_format(&self) -> TextureFormat {
        self.storage.format()
    }
}

impl Sealed for Texture {}

impl TextureResource for Texture {
    fn storage(&self) -> &Arc<TextureStorage> {
        &self.storage
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let descriptor = self.storage.descriptor();
        f.debug_struct("Texture")
            .field("id", &self.storage.id())
            .field("size", &descriptor.size)
            .field("format", &descriptor.format)
            .field("usage", &descriptor.usage)
            .field("label", &descriptor.label)
            .finish()
    }
}

// Ensure Texture is Send + Sync
static_assertions::assert_impl_all!(Texture: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GraphicsDevice;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters};
    use crate::types::{FramebufferMode, TextureDescriptor, TextureRange, TextureUsage};

    fn create_test_device() -> Arc<GraphicsDevice> {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let instance = GraphicsInstance::with_parameters(params).unwrap();
        instance.create_device().unwrap()
    }

    #[test]
    fn test_texture_debug() {
        let desc = TextureDescriptor::new_2d(
            1920,
            1080,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        );
        let texture = create_test_device().create_texture(&desc).unwrap();
        let debug = format!("{:?}", texture);
        assert!(debug.contains("Texture"));
        assert!(debug.contains("1920"));
    }

    #[test]
    fn test_texture_dimensions() {
        let desc = TextureDescriptor::new_2d(
            800,
            600,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        let texture = create_test_device().create_texture(&desc).unwrap();
        assert_eq!(texture.width(), 800);
        assert_eq!(texture.height(), 600);
        assert_eq!(texture.dimensions().depth, 1);
        assert_eq!(texture.num_layers(), 1);
        assert_eq!(texture.samples(), 1);
    }

    #[test]
    fn test_fresh_multi_mip_texture_requires_generation() {
        let desc = TextureDescriptor::new_2d(
            64,
            64,
            TextureFormat::Rgba8Unorm,
            TextureUsage::COPY_DST | TextureUsage::TEXTURE_BINDING,
        )
        .with_full_mip_chain();
        let texture = create_test_device().create_texture(&desc).unwrap();
        assert!(texture.is_required_generate_mipmap());
        assert!(!texture.is_populated());
    }

    #[test]
    fn test_upload_of_full_chain_clears_stale_flag() {
        let desc = TextureDescriptor::new_2d(
            4,
            4,
            TextureFormat::R8Unorm,
            TextureUsage::COPY_DST | TextureUsage::TEXTURE_BINDING,
        )
        .with_mip_levels(3);
        let texture = create_test_device().create_texture(&desc).unwrap();

        // 16 + 4 + 1 texels
        texture
            .upload(&TextureRange::full(&desc), &[7u8; 21], 0)
            .unwrap();
        assert!(!texture.is_required_generate_mipmap());
        assert!(texture.is_populated());

        texture
            .upload(&TextureRange::new_2d(0, 0, 2, 2), &[1u8; 4], 0)
            .unwrap();
        assert!(texture.is_required_generate_mipmap());
    }

    #[test]
    fn test_view_cache_is_per_mode() {
        let desc = TextureDescriptor::new_2d_array(
            32,
            32,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        );
        let texture = create_test_device().create_texture(&desc).unwrap();

        let mono = texture.framebuffer_view(0, 0, FramebufferMode::Mono).unwrap();
        let again = texture.framebuffer_view(0, 0, FramebufferMode::Mono).unwrap();
        assert!(Arc::ptr_eq(&mono, &again));

        let stereo = texture
            .framebuffer_view(0, 0, FramebufferMode::Stereo)
            .unwrap();
        assert!(!Arc::ptr_eq(&mono, &stereo));
        assert_eq!(texture.cached_view_count(FramebufferMode::Mono), 1);
        assert_eq!(texture.cached_view_count(FramebufferMode::Stereo), 1);

        // Only two layers: a stereo view starting at layer 1 does not fit.
        assert!(
            texture
                .framebuffer_view(0, 1, FramebufferMode::Stereo)
                .is_err()
        );
    }

    #[test]
    fn test_dropping_texture_invalidates_views() {
        let desc = TextureDescriptor::new_2d(
            16,
            16,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        );
        let texture = create_test_device().create_texture(&desc).unwrap();
        let view = texture.framebuffer_view(0, 0, FramebufferMode::Mono).unwrap();
        assert!(view.is_valid());
        assert_eq!(view.texture_id(), texture.texture_id());

        drop(texture);
        assert!(!view.is_valid());
    }
}
