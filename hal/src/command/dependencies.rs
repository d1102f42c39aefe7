//! Cross-pass texture dependencies.

use std::sync::{Arc, Weak};

use crate::error::GraphicsError;
use crate::resources::{TextureId, TextureResource, TextureStorage};

/// Maximum number of textures one [`Dependencies`] set can hold.
pub const MAX_DEPENDENCY_TEXTURES: usize = 4;

/// Textures a render pass reads that were written outside of it (by another
/// pass, a compute encoder or an upload).
///
/// Holding a texture here does not keep it alive. When an encoder is created
/// the backend makes every live entry visible to the pass (a layout
/// transition plus memory barrier on Vulkan); expired entries are ignored.
/// A dependency must not also be an attachment of the target framebuffer.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    textures: Vec<Weak<TextureStorage>>,
}

impl Dependencies {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a texture.
    ///
    /// Adding a texture that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the set already holds
    /// [`MAX_DEPENDENCY_TEXTURES`] textures.
    pub fn push<T>(&mut self, texture: &Arc<T>) -> Result<(), GraphicsError>
    where
        T: TextureResource + ?Sized,
    {
        let storage = texture.storage();
        if self
            .textures
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(storage)))
        {
            return Ok(());
        }
        if self.textures.len() >= MAX_DEPENDENCY_TEXTURES {
            return Err(GraphicsError::InvalidParameter(format!(
                "at most {MAX_DEPENDENCY_TEXTURES} dependency textures are supported"
            )));
        }
        self.textures.push(Arc::downgrade(storage));
        Ok(())
    }

    /// Builder form of [`push`](Self::push).
    pub fn with_texture<T>(mut self, texture: &Arc<T>) -> Result<Self, GraphicsError>
    where
        T: TextureResource + ?Sized,
    {
        self.push(texture)?;
        Ok(self)
    }

    /// Number of entries, including expired ones.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Number of entries whose texture is still alive.
    pub fn live_count(&self) -> usize {
        self.textures.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Ids of the textures that are still alive.
    pub fn texture_ids(&self) -> Vec<TextureId> {
        self.textures
            .iter()
            .filter_map(Weak::upgrade)
            .map(|storage| storage.id())
            .collect()
    }

    pub fn clear(&mut self) {
        self.textures.clear();
    }

    pub(crate) fn live_textures(&self) -> Vec<Arc<TextureStorage>> {
        self.textures.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GraphicsDevice;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters};
    use crate::resources::Texture;
    use crate::types::{TextureDescriptor, TextureFormat, TextureUsage};

    fn create_test_device() -> Arc<GraphicsDevice> {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let instance = GraphicsInstance::with_parameters(params).unwrap();
        instance.create_device().unwrap()
    }

    fn create_texture(device: &Arc<GraphicsDevice>) -> Arc<Texture> {
        device
            .create_texture(&TextureDescriptor::new_2d(
                8,
                8,
                TextureFormat::Rgba8Unorm,
                TextureUsage::TEXTURE_BINDING,
            ))
            .unwrap()
    }

    #[test]
    fn test_capacity_is_four() {
        let device = create_test_device();
        let textures: Vec<_> = (0..5).map(|_| create_texture(&device)).collect();

        let mut deps = Dependencies::new();
        for texture in &textures[..4] {
            deps.push(texture).unwrap();
        }
        assert_eq!(deps.len(), MAX_DEPENDENCY_TEXTURES);

        let err = deps.push(&textures[4]).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let device = create_test_device();
        let texture = create_texture(&device);
        let mut deps = Dependencies::new();
        deps.push(&texture).unwrap();
        deps.push(&texture).unwrap();
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn test_entries_do_not_own_textures() {
        let device = create_test_device();
        let texture = create_texture(&device);
        let id = texture.texture_id();

        let deps = Dependencies::new().with_texture(&texture).unwrap();
        assert_eq!(deps.texture_ids(), vec![id]);

        drop(texture);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps.live_count(), 0);
        assert!(deps.live_textures().is_empty());
    }

    #[test]
    fn test_accepts_trait_objects() {
        let device = create_test_device();
        let texture: Arc<dyn TextureResource> = create_texture(&device);
        let deps = Dependencies::new().with_texture(&texture).unwrap();
        assert_eq!(deps.live_count(), 1);
    }
}
