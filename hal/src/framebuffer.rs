//! Framebuffers: the set of textures a render pass draws into.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::command::CommandQueue;
use crate::error::GraphicsError;
use crate::resources::{TextureId, TextureResource};
use crate::types::{CommandBufferDescriptor, FramebufferMode, TextureRange, TextureUsage};

/// Maximum number of color attachment slots in a framebuffer.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// A color attachment with an optional multisample resolve target.
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub texture: Arc<dyn TextureResource>,
    pub resolve_texture: Option<Arc<dyn TextureResource>>,
}

impl ColorAttachment {
    pub fn new(texture: Arc<dyn TextureResource>) -> Self {
        Self {
            texture,
            resolve_texture: None,
        }
    }

    /// Set the single-sample texture the attachment resolves into.
    pub fn with_resolve_texture(mut self, texture: Arc<dyn TextureResource>) -> Self {
        self.resolve_texture = Some(texture);
        self
    }
}

/// Descriptor for creating a [`Framebuffer`].
#[derive(Debug, Clone, Default)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    /// Color slots; `None` leaves a slot unbound.
    pub color_attachments: Vec<Option<ColorAttachment>>,
    pub depth_attachment: Option<Arc<dyn TextureResource>>,
    /// Single-sample texture a multisampled depth attachment resolves into.
    pub resolve_depth_attachment: Option<Arc<dyn TextureResource>>,
    pub stencil_attachment: Option<Arc<dyn TextureResource>>,
    pub mode: FramebufferMode,
}

impl FramebufferDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Append a color slot bound to `texture`.
    pub fn with_color_attachment(mut self, texture: Arc<dyn TextureResource>) -> Self {
        self.color_attachments
            .push(Some(ColorAttachment::new(texture)));
        self
    }

    /// Append a color slot with a resolve target.
    pub fn with_resolved_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(Some(attachment));
        self
    }

    /// Append an unbound color slot.
    pub fn with_empty_color_slot(mut self) -> Self {
        self.color_attachments.push(None);
        self
    }

    pub fn with_depth_attachment(mut self, texture: Arc<dyn TextureResource>) -> Self {
        self.depth_attachment = Some(texture);
        self
    }

    pub fn with_resolve_depth_attachment(mut self, texture: Arc<dyn TextureResource>) -> Self {
        self.resolve_depth_attachment = Some(texture);
        self
    }

    pub fn with_stencil_attachment(mut self, texture: Arc<dyn TextureResource>) -> Self {
        self.stencil_attachment = Some(texture);
        self
    }

    pub fn with_mode(mut self, mode: FramebufferMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Color and optional depth texture of one swapchain frame, for
/// [`Framebuffer::update_surface_textures`].
#[derive(Debug, Clone)]
pub struct SurfaceTextures {
    pub color: Arc<dyn TextureResource>,
    pub depth: Option<Arc<dyn TextureResource>>,
}

impl SurfaceTextures {
    pub fn new(color: Arc<dyn TextureResource>) -> Self {
        Self { color, depth: None }
    }

    pub fn with_depth(mut self, depth: Arc<dyn TextureResource>) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// Every texture bound to a framebuffer at one point in time.
#[derive(Debug, Clone, Default)]
pub(crate) struct AttachmentSet {
    pub colors: Vec<Option<ColorAttachment>>,
    pub depth: Option<Arc<dyn TextureResource>>,
    pub resolve_depth: Option<Arc<dyn TextureResource>>,
    pub stencil: Option<Arc<dyn TextureResource>>,
}

impl AttachmentSet {
    /// Ids of every bound texture, resolve targets included.
    pub fn texture_ids(&self) -> Vec<TextureId> {
        let mut ids: Vec<TextureId> = self
            .colors
            .iter()
            .flatten()
            .flat_map(|attachment| {
                std::iter::once(attachment.texture.texture_id())
                    .chain(attachment.resolve_texture.as_ref().map(|t| t.texture_id()))
            })
            .collect();
        ids.extend(
            self.depth
                .iter()
                .chain(self.resolve_depth.iter())
                .chain(self.stencil.iter())
                .map(|t| t.texture_id()),
        );
        ids
    }

    fn first_texture(&self) -> Option<&Arc<dyn TextureResource>> {
        self.colors
            .iter()
            .flatten()
            .map(|attachment| &attachment.texture)
            .chain(self.depth.iter())
            .chain(self.stencil.iter())
            .next()
    }
}

/// A set of attachments shared between render passes.
///
/// The framebuffer holds strong references to its textures. Color attachment
/// 0 (and the depth attachment) can be swapped with
/// [`update_drawable`](Self::update_drawable) and
/// [`update_surface_textures`](Self::update_surface_textures), which is how a
/// swapchain image is retargeted every frame; passes that were already
/// encoded keep the textures they resolved at encoding time.
pub struct Framebuffer {
    label: Option<String>,
    attachments: RwLock<AttachmentSet>,
    mode: FramebufferMode,
}

impl Framebuffer {
    pub(crate) fn new(descriptor: FramebufferDescriptor) -> Result<Self, GraphicsError> {
        let bound_colors = descriptor.color_attachments.iter().flatten().count();
        if bound_colors == 0
            && descriptor.depth_attachment.is_none()
            && descriptor.stencil_attachment.is_none()
        {
            return Err(GraphicsError::InvalidParameter(
                "framebuffer needs at least one attachment".to_string(),
            ));
        }
        if descriptor.color_attachments.len() > MAX_COLOR_ATTACHMENTS {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} color slots requested, at most {MAX_COLOR_ATTACHMENTS} are supported",
                descriptor.color_attachments.len()
            )));
        }

        for (index, attachment) in descriptor.color_attachments.iter().enumerate() {
            if let Some(attachment) = attachment {
                check_color_attachment(attachment, index)?;
            }
        }
        if let Some(depth) = &descriptor.depth_attachment {
            check_depth_attachment(depth.as_ref())?;
        }
        if let Some(resolve) = &descriptor.resolve_depth_attachment {
            let Some(depth) = &descriptor.depth_attachment else {
                return Err(GraphicsError::InvalidParameter(
                    "depth resolve target without a depth attachment".to_string(),
                ));
            };
            check_depth_resolve(depth.as_ref(), resolve.as_ref())?;
        }
        if let Some(stencil) = &descriptor.stencil_attachment {
            check_attachable(stencil.as_ref(), "stencil", 0)?;
            if !stencil.resolved_format().has_stencil() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "stencil attachment has format {:?} without a stencil aspect",
                    stencil.resolved_format()
                )));
            }
        }

        Ok(Self {
            label: descriptor.label,
            attachments: RwLock::new(AttachmentSet {
                colors: descriptor.color_attachments,
                depth: descriptor.depth_attachment,
                resolve_depth: descriptor.resolve_depth_attachment,
                stencil: descriptor.stencil_attachment,
            }),
            mode: descriptor.mode,
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn mode(&self) -> FramebufferMode {
        self.mode
    }

    /// Width of the first bound attachment at mip 0.
    pub fn width(&self) -> u32 {
        self.read()
            .first_texture()
            .map_or(0, |texture| texture.dimensions().width)
    }

    /// Height of the first bound attachment at mip 0.
    pub fn height(&self) -> u32 {
        self.read()
            .first_texture()
            .map_or(0, |texture| texture.dimensions().height)
    }

    /// Number of color slots, bound or not.
    pub fn color_attachment_slot_count(&self) -> usize {
        self.read().colors.len()
    }

    /// Texture bound to color slot `index`.
    pub fn color_attachment(&self, index: usize) -> Option<Arc<dyn TextureResource>> {
        self.read()
            .colors
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|attachment| Arc::clone(&attachment.texture))
    }

    /// Resolve target of color slot `index`.
    pub fn resolve_color_attachment(&self, index: usize) -> Option<Arc<dyn TextureResource>> {
        self.read()
            .colors
            .get(index)
            .and_then(|slot| slot.as_ref())
            .and_then(|attachment| attachment.resolve_texture.clone())
    }

    /// Indices of the bound color slots, ascending.
    pub fn color_attachment_indices(&self) -> Vec<usize> {
        self.read()
            .colors
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| index))
            .collect()
    }

    pub fn depth_attachment(&self) -> Option<Arc<dyn TextureResource>> {
        self.read().depth.clone()
    }

    pub fn resolve_depth_attachment(&self) -> Option<Arc<dyn TextureResource>> {
        self.read().resolve_depth.clone()
    }

    pub fn stencil_attachment(&self) -> Option<Arc<dyn TextureResource>> {
        self.read().stencil.clone()
    }

    /// Replace the texture in color slot 0.
    ///
    /// The new texture must be a render attachment with the same size and
    /// sample count as the texture it replaces, and must still fit the
    /// slot's resolve target. Any resolve target of the slot is kept.
    pub fn update_drawable(&self, texture: Arc<dyn TextureResource>) -> Result<(), GraphicsError> {
        let mut attachments = self.write()?;
        replace_drawable(&mut attachments, texture)
    }

    /// Replace color slot 0 and, when given, the depth attachment.
    ///
    /// A stencil slot bound to the old depth texture follows it to the new
    /// one. Nothing changes if any of the new textures is rejected.
    pub fn update_surface_textures(&self, surface: SurfaceTextures) -> Result<(), GraphicsError> {
        let mut attachments = self.write()?;
        let mut updated = attachments.clone();
        replace_drawable(&mut updated, surface.color)?;

        if let Some(depth) = surface.depth {
            check_depth_attachment(depth.as_ref())?;
            let expected = updated
                .colors
                .first()
                .and_then(|slot| slot.as_ref())
                .map(|attachment| attachment.texture.dimensions());
            let size = depth.dimensions();
            if let Some(expected) = expected
                && (expected.width, expected.height) != (size.width, size.height)
            {
                return Err(GraphicsError::InvalidParameter(format!(
                    "surface depth is {}x{}, drawable is {}x{}",
                    size.width, size.height, expected.width, expected.height
                )));
            }
            if let Some(resolve) = &updated.resolve_depth {
                check_depth_resolve(depth.as_ref(), resolve.as_ref())?;
            }

            let old_depth = updated.depth.replace(Arc::clone(&depth));
            let stencil_follows = match (&old_depth, &updated.stencil) {
                (Some(old), Some(stencil)) => old.texture_id() == stencil.texture_id(),
                _ => false,
            };
            if stencil_follows {
                if !depth.resolved_format().has_stencil() {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "surface depth {:?} has no stencil aspect for the stencil slot",
                        depth.resolved_format()
                    )));
                }
                updated.stencil = Some(depth);
            }
        }

        *attachments = updated;
        Ok(())
    }

    /// Read back a region of color attachment `index`.
    ///
    /// Blocks until `queue` is idle so that every submitted pass has landed.
    pub fn copy_bytes_color_attachment(
        &self,
        queue: &CommandQueue,
        index: usize,
        out: &mut [u8],
        range: &TextureRange,
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        let texture = self.color_attachment(index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("color slot {index} is not bound"))
        })?;
        queue.wait_idle()?;
        texture.storage().read_internal(range, out, bytes_per_row)
    }

    /// Read back a region of the depth attachment.
    ///
    /// Only single-aspect depth formats can be read; combined depth-stencil
    /// formats are rejected with [`GraphicsError::FeatureNotSupported`].
    pub fn copy_bytes_depth_attachment(
        &self,
        queue: &CommandQueue,
        out: &mut [u8],
        range: &TextureRange,
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        let texture = self.depth_attachment().ok_or_else(|| {
            GraphicsError::InvalidParameter("framebuffer has no depth attachment".to_string())
        })?;
        read_single_aspect(queue, texture.as_ref(), "depth", out, range, bytes_per_row)
    }

    /// Read back a region of the stencil attachment. Same format rules as
    /// [`copy_bytes_depth_attachment`](Self::copy_bytes_depth_attachment).
    pub fn copy_bytes_stencil_attachment(
        &self,
        queue: &CommandQueue,
        out: &mut [u8],
        range: &TextureRange,
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        let texture = self.stencil_attachment().ok_or_else(|| {
            GraphicsError::InvalidParameter("framebuffer has no stencil attachment".to_string())
        })?;
        read_single_aspect(queue, texture.as_ref(), "stencil", out, range, bytes_per_row)
    }

    /// Copy a region of color attachment `index` into `destination` on the
    /// GPU and wait for the copy.
    ///
    /// The region has the same coordinates in both textures, which must share
    /// format and sample count. The attachment needs `COPY_SRC` usage and the
    /// destination `COPY_DST`.
    pub fn copy_texture_color_attachment<T>(
        &self,
        queue: &CommandQueue,
        index: usize,
        destination: &Arc<T>,
        range: &TextureRange,
    ) -> Result<(), GraphicsError>
    where
        T: TextureResource + ?Sized,
    {
        crate::profile_scope!("copy_texture_color_attachment");
        let source = self.color_attachment(index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("color slot {index} is not bound"))
        })?;

        let mut buffer = queue.create_command_buffer(
            CommandBufferDescriptor::new().with_label("copy_texture_color_attachment"),
        )?;
        buffer.record_copy_texture(source.storage(), destination.storage(), range)?;
        queue.submit(&mut buffer)?;
        buffer.wait_until_completed();
        Ok(())
    }

    /// Snapshot of every attachment, taken under one lock.
    pub(crate) fn attachments(&self) -> AttachmentSet {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, AttachmentSet> {
        match self.attachments.read() {
            Ok(attachments) => attachments,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, AttachmentSet>, GraphicsError> {
        self.attachments
            .write()
            .map_err(|_| GraphicsError::Internal("framebuffer lock poisoned".to_string()))
    }
}

fn replace_drawable(
    attachments: &mut AttachmentSet,
    texture: Arc<dyn TextureResource>,
) -> Result<(), GraphicsError> {
    if let Some(existing) = attachments.first_texture() {
        let old = existing.dimensions();
        let new = texture.dimensions();
        if (old.width, old.height) != (new.width, new.height) {
            return Err(GraphicsError::InvalidParameter(format!(
                "drawable is {}x{}, framebuffer expects {}x{}",
                new.width, new.height, old.width, old.height
            )));
        }
    }
    let Some(slot) = attachments.colors.first_mut() else {
        return Err(GraphicsError::InvalidParameter(
            "framebuffer has no color slot to update".to_string(),
        ));
    };

    match slot {
        Some(attachment) => {
            if texture.samples() != attachment.texture.samples() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "drawable has {} samples, framebuffer expects {}",
                    texture.samples(),
                    attachment.texture.samples()
                )));
            }
            let updated = ColorAttachment {
                texture,
                resolve_texture: attachment.resolve_texture.clone(),
            };
            check_color_attachment(&updated, 0)?;
            *attachment = updated;
        }
        None => {
            let attachment = ColorAttachment::new(texture);
            check_color_attachment(&attachment, 0)?;
            *slot = Some(attachment);
        }
    }
    Ok(())
}

fn read_single_aspect(
    queue: &CommandQueue,
    texture: &dyn TextureResource,
    aspect: &str,
    out: &mut [u8],
    range: &TextureRange,
    bytes_per_row: u32,
) -> Result<(), GraphicsError> {
    let format = texture.resolved_format();
    if format.has_depth() && format.has_stencil() {
        return Err(GraphicsError::FeatureNotSupported(format!(
            "{aspect} readback of combined depth-stencil format {format:?}"
        )));
    }
    queue.wait_idle()?;
    texture.storage().read_internal(range, out, bytes_per_row)
}

fn check_attachable(
    texture: &dyn TextureResource,
    kind: &str,
    index: usize,
) -> Result<(), GraphicsError> {
    if !texture.usage().contains(TextureUsage::RENDER_ATTACHMENT) {
        return Err(GraphicsError::InvalidParameter(format!(
            "{kind} attachment {index} ({:?}) lacks RENDER_ATTACHMENT usage",
            texture.label()
        )));
    }
    Ok(())
}

fn check_color_attachment(attachment: &ColorAttachment, index: usize) -> Result<(), GraphicsError> {
    let texture = attachment.texture.as_ref();
    check_attachable(texture, "color", index)?;
    if texture.resolved_format().is_depth_stencil() {
        return Err(GraphicsError::InvalidParameter(format!(
            "color attachment {index} has depth/stencil format {:?}",
            texture.resolved_format()
        )));
    }
    if let Some(resolve) = &attachment.resolve_texture {
        check_attachable(resolve.as_ref(), "resolve", index)?;
        if resolve.samples() != 1 || texture.samples() == 1 {
            return Err(GraphicsError::InvalidParameter(format!(
                "resolve {index} must resolve a multisampled attachment into a single-sample texture"
            )));
        }
        if resolve.resolved_format() != texture.resolved_format() {
            return Err(GraphicsError::InvalidParameter(format!(
                "color attachment {index} is {:?}, its resolve target is {:?}",
                texture.resolved_format(),
                resolve.resolved_format()
            )));
        }
    }
    Ok(())
}

fn check_depth_attachment(depth: &dyn TextureResource) -> Result<(), GraphicsError> {
    check_attachable(depth, "depth", 0)?;
    if !depth.resolved_format().has_depth() {
        return Err(GraphicsError::InvalidParameter(format!(
            "depth attachment has format {:?} without a depth aspect",
            depth.resolved_format()
        )));
    }
    Ok(())
}

fn check_depth_resolve(
    depth: &dyn TextureResource,
    resolve: &dyn TextureResource,
) -> Result<(), GraphicsError> {
    check_attachable(resolve, "depth resolve", 0)?;
    if resolve.samples() != 1 || depth.samples() == 1 {
        return Err(GraphicsError::InvalidParameter(
            "depth resolve must resolve a multisampled depth attachment into a single-sample texture"
                .to_string(),
        ));
    }
    if resolve.resolved_format() != depth.resolved_format() {
        return Err(GraphicsError::InvalidParameter(format!(
            "depth attachment is {:?}, its resolve target is {:?}",
            depth.resolved_format(),
            resolve.resolved_format()
        )));
    }
    Ok(())
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("label", &self.label)
            .field("color_slots", &self.color_attachment_slot_count())
            .field("has_depth", &self.read().depth.is_some())
            .field("has_stencil", &self.read().stencil.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

static_assertions::assert_impl_all!(Framebuffer: Send, Sync);
