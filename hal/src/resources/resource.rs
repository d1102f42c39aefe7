//! The texture capability trait.

use std::fmt;
use std::sync::Arc;

use crate::command::{CommandBuffer, CommandQueue};
use crate::error::GraphicsError;
use crate::types::{
    Extent3d, FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType,
    TextureUsage,
};

use super::{TextureId, TextureStorage, TextureView};

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Capabilities shared by every GPU texture kind.
///
/// Implemented by [`Texture`](super::Texture) and [`Volume`](super::Volume).
/// Metadata accessors are stable for the lifetime of the resource; only pixel
/// contents change, through [`upload`](Self::upload), rendering and mip
/// generation.
///
/// The trait is sealed. Every method has a default implementation on top of
/// the shared storage.
pub trait TextureResource: sealed::Sealed + Send + Sync + fmt::Debug {
    #[doc(hidden)]
    fn storage(&self) -> &Arc<TextureStorage>;

    /// The descriptor the texture was created with.
    fn descriptor(&self) -> &TextureDescriptor {
        self.storage().descriptor()
    }

    fn label(&self) -> Option<&str> {
        self.storage().label()
    }

    /// Format requested at creation.
    fn format(&self) -> TextureFormat {
        self.descriptor().format
    }

    /// Format the backend actually allocated.
    ///
    /// Depth/stencil requests may resolve to the closest supported format, so
    /// this can differ from [`format`](Self::format).
    fn resolved_format(&self) -> TextureFormat {
        self.storage().format()
    }

    /// Size of mip level 0.
    fn dimensions(&self) -> Extent3d {
        self.descriptor().size
    }

    /// Number of native array layers (6 per cube, 1 for volumes).
    fn num_layers(&self) -> u32 {
        self.descriptor().num_layers()
    }

    fn texture_type(&self) -> TextureType {
        self.descriptor().texture_type
    }

    fn usage(&self) -> TextureUsage {
        self.descriptor().usage
    }

    fn samples(&self) -> u32 {
        self.descriptor().sample_count
    }

    fn num_mip_levels(&self) -> u32 {
        self.descriptor().mip_level_count
    }

    fn texture_id(&self) -> TextureId {
        self.storage().id()
    }

    /// Returns true if the native image belongs to a swapchain and is never
    /// freed by this texture.
    fn is_swapchain_texture(&self) -> bool {
        self.storage().is_swapchain()
    }

    /// Returns true once contents were uploaded, rendered or mip-generated.
    fn is_populated(&self) -> bool {
        self.storage().is_populated()
    }

    /// Returns true if the texture has several mip levels and the levels
    /// below 0 are out of date.
    fn is_required_generate_mipmap(&self) -> bool {
        self.storage().is_required_generate_mipmap()
    }

    /// Write `data` into the region described by `range`.
    ///
    /// `bytes_per_row` of 0 means tightly packed rows. Fails with
    /// [`GraphicsError::Validation`] and leaves the contents unchanged if the
    /// texture lacks `COPY_DST`, the region is out of range or `data` is too
    /// short.
    fn upload(
        &self,
        range: &TextureRange,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        self.storage()
            .upload_internal(self.texture_type(), range, data, bytes_per_row)
    }

    /// Record mip generation into an open command buffer.
    ///
    /// Single-mip textures record nothing.
    fn generate_mipmap(&self, buffer: &mut CommandBuffer) -> Result<(), GraphicsError> {
        buffer.record_generate_mipmap(self.storage())
    }

    /// Generate mips on `queue` and wait for the work to complete.
    fn generate_mipmap_with_queue(&self, queue: &CommandQueue) -> Result<(), GraphicsError> {
        queue.generate_mipmap(self.storage())
    }

    /// Get (creating and caching on first request) a view of exactly one mip
    /// level for use as a framebuffer attachment.
    ///
    /// `Mono` views cover one layer; `Stereo` views cover `layer` and
    /// `layer + 1`. Both modes keep independent caches keyed by
    /// `(mip_level, layer)`. For volumes, layers are depth slices.
    fn framebuffer_view(
        &self,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> Result<Arc<TextureView>, GraphicsError> {
        self.storage().framebuffer_view(mip_level, layer, mode)
    }

    /// Number of views currently cached for `mode`.
    fn cached_view_count(&self, mode: FramebufferMode) -> usize {
        self.storage().cached_view_count(mode)
    }

    /// Raw Vulkan image. The texture keeps ownership.
    #[cfg(feature = "vulkan-backend")]
    fn vk_image(&self) -> Option<ash::vk::Image> {
        self.storage().gpu().vk_image()
    }

    /// Raw Vulkan view covering every mip and layer.
    #[cfg(feature = "vulkan-backend")]
    fn vk_image_view(&self) -> Option<ash::vk::ImageView> {
        self.storage().gpu().vk_image_view()
    }

    /// Native format the Vulkan image was created with.
    #[cfg(feature = "vulkan-backend")]
    fn vk_format(&self) -> Option<ash::vk::Format> {
        self.storage().gpu().vk_format()
    }

    /// Raw Vulkan view for a framebuffer attachment. See
    /// [`framebuffer_view`](Self::framebuffer_view).
    #[cfg(feature = "vulkan-backend")]
    fn vk_image_view_for_framebuffer(
        &self,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> Option<ash::vk::ImageView> {
        match self.framebuffer_view(mip_level, layer, mode) {
            Ok(view) => view.vk_image_view(),
            Err(err) => {
                log::warn!("vk_image_view_for_framebuffer: {err}");
                None
            }
        }
    }

    /// The underlying wgpu texture.
    #[cfg(feature = "wgpu-backend")]
    fn wgpu_texture(&self) -> Option<&wgpu::Texture> {
        self.storage().gpu().wgpu_texture()
    }
}
