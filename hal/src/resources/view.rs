//! Framebuffer views.

use std::fmt;
use std::sync::Mutex;

use crate::backend::GpuTextureView;
use crate::types::FramebufferMode;

use super::TextureId;

/// A view of exactly one mip level of a texture, used as a framebuffer
/// attachment.
///
/// Views are created lazily by [`TextureResource::framebuffer_view`] and cached
/// per [`FramebufferMode`]. A view holds no reference to its texture: once the
/// texture is destroyed the native view is released and [`is_valid`] returns
/// false, even if callers still hold the `Arc<TextureView>`.
///
/// [`TextureResource::framebuffer_view`]: super::TextureResource::framebuffer_view
/// [`is_valid`]: TextureView::is_valid
pub struct TextureView {
    texture_id: TextureId,
    mip_level: u32,
    layer: u32,
    mode: FramebufferMode,
    native: Mutex<Option<GpuTextureView>>,
}

impl TextureView {
    pub(crate) fn new(
        texture_id: TextureId,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
        native: GpuTextureView,
    ) -> Self {
        Self {
            texture_id,
            mip_level,
            layer,
            mode,
            native: Mutex::new(Some(native)),
        }
    }

    /// Id of the texture this view was created from.
    pub fn texture_id(&self) -> TextureId {
        self.texture_id
    }

    pub fn mip_level(&self) -> u32 {
        self.mip_level
    }

    /// First layer (or depth slice) covered by the view.
    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn mode(&self) -> FramebufferMode {
        self.mode
    }

    /// Returns false once the owning texture has been destroyed.
    pub fn is_valid(&self) -> bool {
        self.native
            .lock()
            .map(|native| native.is_some())
            .unwrap_or(false)
    }

    /// Raw Vulkan image view, if this view belongs to the Vulkan backend and
    /// is still valid.
    #[cfg(feature = "vulkan-backend")]
    pub fn vk_image_view(&self) -> Option<ash::vk::ImageView> {
        self.with_native(|native| match native {
            GpuTextureView::Vulkan { view, .. } => Some(*view),
            _ => None,
        })
        .flatten()
    }

    /// wgpu texture view, if this view belongs to the wgpu backend and is
    /// still valid.
    #[cfg(feature = "wgpu-backend")]
    pub fn wgpu_view(&self) -> Option<wgpu::TextureView> {
        self.with_native(|native| match native {
            GpuTextureView::Wgpu { view, .. } => Some(view.clone()),
            _ => None,
        })
        .flatten()
    }

    pub(crate) fn with_native<R>(&self, f: impl FnOnce(&GpuTextureView) -> R) -> Option<R> {
        let native = self.native.lock().ok()?;
        native.as_ref().map(f)
    }

    /// Release the native view. Called by the owning texture on destruction.
    pub(crate) fn invalidate(&self) {
        let native = match self.native.lock() {
            Ok(mut native) => native.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(native);
    }
}

impl fmt::Debug for TextureView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureView")
            .field("texture_id", &self.texture_id)
            .field("mip_level", &self.mip_level)
            .field("layer", &self.layer)
            .field("mode", &self.mode)
            .field("valid", &self.is_valid())
            .finish()
    }
}

static_assertions::assert_impl_all!(TextureView: Send, Sync);
