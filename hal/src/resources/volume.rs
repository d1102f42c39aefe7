//! Volumetric (3D) texture resource.

use std::sync::Arc;

use crate::types::Extent3d;

use super::resource::sealed::Sealed;
use super::{TextureResource, TextureStorage};

/// A 3D texture.
///
/// Created by [`GraphicsDevice::create_volume`]. A volume owns its native
/// image and two lazily populated framebuffer view caches (mono and stereo),
/// keyed by `(mip_level, depth_slice)`. Framebuffer views address depth
/// slices the way array textures address layers.
///
/// [`GraphicsDevice::create_volume`]: crate::GraphicsDevice::create_volume
pub struct Volume {
    storage: Arc<TextureStorage>,
}

impl Volume {
    pub(crate) fn new(storage: TextureStorage) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    pub fn size(&self) -> Extent3d {
        self.storage.descriptor().size
    }

    pub fn width(&self) -> u32 {
        self.size().width
    }

    pub fn height(&self) -> u32 {
        self.size().height
    }

    /// Depth of mip level 0 in texels.
    pub fn depth(&self) -> u32 {
        self.size().depth
    }

    /// Number of array layers of the native image (always 1 for volumes).
    pub fn num_vk_layers(&self) -> u32 {
        1
    }
}

impl Sealed for Volume {}

impl TextureResource for Volume {
    fn storage(&self) -> &Arc<TextureStorage> {
        &self.storage
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let descriptor = self.storage.descriptor();
        f.debug_struct("Volume")
            .field("id", &self.storage.id())
            .field("size", &descriptor.size)
            .field("format", &descriptor.format)
            .field("mip_level_count", &descriptor.mip_level_count)
            .field("label", &descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Volume: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GraphicsDevice;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters};
    use crate::types::{
        FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType,
        TextureUsage,
    };

    fn create_test_device() -> Arc<GraphicsDevice> {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let instance = GraphicsInstance::with_parameters(params).unwrap();
        instance.create_device().unwrap()
    }

    #[test]
    fn test_volume_metadata() {
        let desc = TextureDescriptor::new_3d(
            64,
            64,
            64,
            TextureFormat::R8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        let volume = create_test_device().create_volume(&desc).unwrap();
        assert_eq!(volume.dimensions(), Extent3d::new_3d(64, 64, 64));
        assert_eq!(volume.depth(), 64);
        assert_eq!(volume.num_mip_levels(), 1);
        assert_eq!(volume.num_layers(), 1);
        assert_eq!(volume.num_vk_layers(), 1);
        assert_eq!(volume.texture_type(), TextureType::D3);
        assert!(!volume.is_required_generate_mipmap());
        assert!(!volume.is_swapchain_texture());
    }

    #[test]
    fn test_volume_upload_out_of_range() {
        let desc = TextureDescriptor::new_3d(
            8,
            8,
            8,
            TextureFormat::R8Unorm,
            TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
        );
        let volume = create_test_device().create_volume(&desc).unwrap();

        let inside = TextureRange::new_3d(0, 0, 4, 8, 8, 4);
        volume.upload(&inside, &[3u8; 256], 0).unwrap();

        let outside = TextureRange::new_3d(0, 0, 6, 8, 8, 4);
        let err = volume.upload(&outside, &[9u8; 256], 0).unwrap_err();
        assert!(err.is_validation());

        let mut contents = vec![0xFFu8; 8 * 8 * 8];
        volume
            .storage()
            .read_internal(&TextureRange::full(&desc), &mut contents, 0)
            .unwrap();
        let (front, back) = contents.split_at(8 * 8 * 4);
        assert!(front.iter().all(|&v| v == 0));
        assert!(back.iter().all(|&v| v == 3));
    }

    #[test]
    fn test_volume_slices_as_view_layers() {
        let desc = TextureDescriptor::new_3d(
            16,
            16,
            4,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        )
        .with_mip_levels(2);
        let volume = create_test_device().create_volume(&desc).unwrap();

        assert!(volume.framebuffer_view(0, 3, FramebufferMode::Mono).is_ok());
        assert!(volume.framebuffer_view(0, 2, FramebufferMode::Stereo).is_ok());
        // Mip 1 has a depth of 2.
        assert!(volume.framebuffer_view(1, 2, FramebufferMode::Mono).is_err());
        assert!(volume.framebuffer_view(2, 0, FramebufferMode::Mono).is_err());
    }
}
