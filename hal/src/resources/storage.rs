//! Backing storage shared by every texture kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::GpuTexture;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{
    FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType, TextureUsage,
};

use super::TextureView;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a texture.
///
/// Ids are never reused and carry no relation to native handle values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        Self(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type ViewCache = Mutex<HashMap<(u32, u32), Arc<TextureView>>>;

/// Native image plus the metadata and lazily created framebuffer views of
/// one texture.
///
/// Shared between the public handle ([`Texture`](super::Texture) or
/// [`Volume`](super::Volume)) and every in-flight submission that touches it.
/// On drop the cached views are invalidated first, then the native image is
/// released (unless it belongs to a swapchain).
pub struct TextureStorage {
    // Field order matters: views and image must be released before the device.
    mono_views: ViewCache,
    stereo_views: ViewCache,
    gpu: GpuTexture,
    id: TextureId,
    descriptor: TextureDescriptor,
    format: TextureFormat,
    swapchain: bool,
    mips_stale: AtomicBool,
    populated: AtomicBool,
    device: Arc<GraphicsDevice>,
}

impl TextureStorage {
    pub(crate) fn new(
        device: Arc<GraphicsDevice>,
        descriptor: TextureDescriptor,
        format: TextureFormat,
        gpu: GpuTexture,
        swapchain: bool,
    ) -> Self {
        let multi_mip = descriptor.mip_level_count > 1;
        Self {
            mono_views: Mutex::new(HashMap::new()),
            stereo_views: Mutex::new(HashMap::new()),
            gpu,
            id: TextureId::next(),
            descriptor,
            format,
            swapchain,
            mips_stale: AtomicBool::new(multi_mip),
            populated: AtomicBool::new(false),
            device,
        }
    }

    pub(crate) fn gpu(&self) -> &GpuTexture {
        &self.gpu
    }

    pub(crate) fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub(crate) fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Format the backend actually allocated.
    pub(crate) fn format(&self) -> TextureFormat {
        self.format
    }

    pub(crate) fn id(&self) -> TextureId {
        self.id
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub(crate) fn is_swapchain(&self) -> bool {
        self.swapchain
    }

    pub(crate) fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    pub(crate) fn is_required_generate_mipmap(&self) -> bool {
        self.descriptor.mip_level_count > 1 && self.mips_stale.load(Ordering::Acquire)
    }

    /// Called once mip generation has been issued for this texture.
    pub(crate) fn mark_mips_generated(&self) {
        self.mips_stale.store(false, Ordering::Release);
        self.populated.store(true, Ordering::Release);
    }

    /// Called when a render pass or a copy writes into the texture.
    pub(crate) fn mark_written(&self, mip_level: u32) {
        self.populated.store(true, Ordering::Release);
        if mip_level == 0 && self.descriptor.mip_level_count > 1 {
            self.mips_stale.store(true, Ordering::Release);
        }
    }

    /// Number of layers addressable at `mip_level` by a framebuffer view.
    ///
    /// For volumes every depth slice of the mip counts as a layer.
    pub(crate) fn attachment_layers(&self, mip_level: u32) -> u32 {
        match self.descriptor.texture_type {
            TextureType::D3 => self.descriptor.mip_level_size(mip_level).depth,
            _ => self.descriptor.num_layers(),
        }
    }

    /// Write `data` into the region described by `range`.
    ///
    /// `texture_type` must match the type the texture was created with.
    /// Nothing is written when validation fails.
    pub(crate) fn upload_internal(
        &self,
        texture_type: TextureType,
        range: &TextureRange,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("texture_upload");

        if texture_type != self.descriptor.texture_type {
            return Err(GraphicsError::validation(format!(
                "upload as {:?} into a {:?} texture",
                texture_type, self.descriptor.texture_type
            )));
        }
        if !self.descriptor.usage.contains(TextureUsage::COPY_DST) {
            return Err(GraphicsError::validation(format!(
                "texture {:?} was not created with COPY_DST usage",
                self.descriptor.label
            )));
        }
        if self.descriptor.sample_count > 1 {
            return Err(GraphicsError::validation(
                "multisampled textures cannot be uploaded",
            ));
        }
        self.check_transfer(range, data.len(), bytes_per_row)?;

        self.device
            .backend()
            .upload_texture(self, range, data, bytes_per_row)?;

        self.populated.store(true, Ordering::Release);
        if range.covers_all_mips(&self.descriptor) {
            self.mips_stale.store(false, Ordering::Release);
        } else if range.mip_level == 0 && self.descriptor.mip_level_count > 1 {
            self.mips_stale.store(true, Ordering::Release);
        }

        log::trace!(
            "Texture {}: uploaded {} bytes to mip {} layers {}..{}",
            self.id,
            data.len(),
            range.mip_level,
            range.layer,
            range.layer + range.num_layers
        );
        Ok(())
    }

    /// Copy the region described by `range` into `out`.
    pub(crate) fn read_internal(
        &self,
        range: &TextureRange,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("texture_readback");

        if !self.descriptor.usage.contains(TextureUsage::COPY_SRC) {
            return Err(GraphicsError::validation(format!(
                "texture {:?} was not created with COPY_SRC usage",
                self.descriptor.label
            )));
        }
        if self.descriptor.sample_count > 1 {
            return Err(GraphicsError::validation(
                "multisampled textures cannot be read back",
            ));
        }
        if range.num_mip_levels != 1 {
            return Err(GraphicsError::validation(
                "readback covers exactly one mip level",
            ));
        }
        self.check_transfer(range, out.len(), bytes_per_row)?;

        self.device
            .backend()
            .read_texture(self, range, out, bytes_per_row)
    }

    fn check_transfer(
        &self,
        range: &TextureRange,
        len: usize,
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        range.validate_within(&self.descriptor)?;

        if bytes_per_row != 0 {
            if range.num_mip_levels > 1 {
                return Err(GraphicsError::validation(
                    "bytes_per_row must be 0 for multi-mip transfers",
                ));
            }
            let packed = range.width * self.format.block_size();
            if bytes_per_row < packed {
                return Err(GraphicsError::validation(format!(
                    "bytes_per_row {bytes_per_row} is smaller than a packed row of {packed} bytes"
                )));
            }
        }

        let required = range.byte_size(self.format, bytes_per_row);
        if (len as u64) < required {
            return Err(GraphicsError::validation(format!(
                "{len} bytes provided, {required} required"
            )));
        }
        Ok(())
    }

    /// Get (creating on first request) the framebuffer view for one mip
    /// level starting at `layer`.
    pub(crate) fn framebuffer_view(
        &self,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> Result<Arc<TextureView>, GraphicsError> {
        if mip_level >= self.descriptor.mip_level_count {
            return Err(GraphicsError::validation(format!(
                "mip level {} out of range (texture has {})",
                mip_level, self.descriptor.mip_level_count
            )));
        }
        let available = self.attachment_layers(mip_level);
        if layer.saturating_add(mode.layer_count()) > available {
            return Err(GraphicsError::validation(format!(
                "{mode:?} view at layer {layer} needs {} layers, mip {mip_level} has {available}",
                mode.layer_count()
            )));
        }

        let cache = self.view_cache(mode);
        let mut views = cache
            .lock()
            .map_err(|_| GraphicsError::Internal("view cache lock poisoned".to_string()))?;

        if let Some(view) = views.get(&(mip_level, layer)) {
            return Ok(Arc::clone(view));
        }

        let native = self
            .device
            .backend()
            .create_framebuffer_view(self, mip_level, layer, mode)?;
        let view = Arc::new(TextureView::new(self.id, mip_level, layer, mode, native));
        views.insert((mip_level, layer), Arc::clone(&view));

        log::trace!(
            "Texture {}: created {:?} view for mip {} layer {}",
            self.id,
            mode,
            mip_level,
            layer
        );
        Ok(view)
    }

    pub(crate) fn cached_view_count(&self, mode: FramebufferMode) -> usize {
        self.view_cache(mode)
            .lock()
            .map(|views| views.len())
            .unwrap_or(0)
    }

    fn view_cache(&self, mode: FramebufferMode) -> &ViewCache {
        match mode {
            FramebufferMode::Mono => &self.mono_views,
            FramebufferMode::Stereo => &self.stereo_views,
        }
    }
}

impl Drop for TextureStorage {
    fn drop(&mut self) {
        for cache in [&self.mono_views, &self.stereo_views] {
            let mut views = match cache.lock() {
                Ok(views) => views,
                Err(poisoned) => poisoned.into_inner(),
            };
            for view in views.values() {
                view.invalidate();
            }
            views.clear();
        }
        log::trace!(
            "Texture {} ({:?}) destroyed{}",
            self.id,
            self.descriptor.label,
            if self.swapchain {
                ", image left to swapchain"
            } else {
                ""
            }
        );
    }
}

impl fmt::Debug for TextureStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureStorage")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("format", &self.format)
            .field("swapchain", &self.swapchain)
            .finish()
    }
}

static_assertions::assert_impl_all!(TextureStorage: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_ids_are_unique() {
        let a = TextureId::next();
        let b = TextureId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_texture_id_display() {
        assert_eq!(TextureId(42).to_string(), "#42");
    }
}
