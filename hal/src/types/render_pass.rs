//! Render pass description.
//!
//! A render pass describes what happens to each framebuffer attachment when
//! an encoder begins and ends: whether existing contents are loaded, cleared
//! or discarded, and which mip level / layer is targeted.

use super::Color;

/// Operation to perform when loading an attachment at the start of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Clear the attachment with the descriptor's clear value.
    Clear,
    /// Load the existing contents of the attachment.
    #[default]
    Load,
    /// Don't care about the existing contents (may be undefined).
    DontCare,
}

/// Operation to perform when storing an attachment at the end of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Store the attachment contents for later use.
    #[default]
    Store,
    /// Don't care about the contents after the pass (may be discarded).
    DontCare,
}

/// Per-attachment state for a color attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachmentDescriptor {
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_color: Color,
    /// Mip level rendered to.
    pub mip_level: u32,
    /// First layer (or depth slice for volumes) rendered to.
    pub layer: u32,
}

impl Default for ColorAttachmentDescriptor {
    fn default() -> Self {
        Self {
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_color: Color::BLACK,
            mip_level: 0,
            layer: 0,
        }
    }
}

impl ColorAttachmentDescriptor {
    /// Clear to the given color, then store.
    pub fn clear(color: Color) -> Self {
        Self {
            clear_color: color,
            ..Self::default()
        }
    }

    /// Preserve existing contents.
    pub fn load() -> Self {
        Self {
            load_op: LoadOp::Load,
            ..Self::default()
        }
    }

    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_target(mut self, mip_level: u32, layer: u32) -> Self {
        self.mip_level = mip_level;
        self.layer = layer;
        self
    }
}

/// Per-attachment state for the depth attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachmentDescriptor {
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_depth: f32,
    pub mip_level: u32,
    pub layer: u32,
}

impl Default for DepthAttachmentDescriptor {
    fn default() -> Self {
        Self {
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_depth: 1.0,
            mip_level: 0,
            layer: 0,
        }
    }
}

/// Per-attachment state for the stencil attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilAttachmentDescriptor {
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_stencil: u32,
    pub mip_level: u32,
    pub layer: u32,
}

impl Default for StencilAttachmentDescriptor {
    fn default() -> Self {
        Self {
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_stencil: 0,
            mip_level: 0,
            layer: 0,
        }
    }
}

/// Describes the attachment operations of one render pass.
///
/// The number of color attachment descriptors must match the number of color
/// attachment slots of the framebuffer the pass is encoded against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachmentDescriptor>,
    pub depth_attachment: DepthAttachmentDescriptor,
    pub stencil_attachment: StencilAttachmentDescriptor,
}

impl RenderPassDescriptor {
    /// Create an empty render pass descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default pass for a framebuffer: every color slot cleared to black,
    /// depth cleared to 1.0, stencil cleared to 0, all stored.
    pub fn for_framebuffer(framebuffer: &crate::Framebuffer) -> Self {
        Self {
            label: None,
            color_attachments: vec![
                ColorAttachmentDescriptor::default();
                framebuffer.color_attachment_slot_count()
            ],
            depth_attachment: DepthAttachmentDescriptor::default(),
            stencil_attachment: StencilAttachmentDescriptor::default(),
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Append a color attachment descriptor.
    pub fn with_color_attachment(mut self, attachment: ColorAttachmentDescriptor) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    /// Set the depth attachment descriptor.
    pub fn with_depth_attachment(mut self, attachment: DepthAttachmentDescriptor) -> Self {
        self.depth_attachment = attachment;
        self
    }

    /// Set the stencil attachment descriptor.
    pub fn with_stencil_attachment(mut self, attachment: StencilAttachmentDescriptor) -> Self {
        self.stencil_attachment = attachment;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_attachment_defaults() {
        let attachment = ColorAttachmentDescriptor::default();
        assert_eq!(attachment.load_op, LoadOp::Clear);
        assert_eq!(attachment.store_op, StoreOp::Store);
        assert_eq!(attachment.mip_level, 0);

        let attachment = ColorAttachmentDescriptor::load().with_target(2, 1);
        assert_eq!(attachment.load_op, LoadOp::Load);
        assert_eq!((attachment.mip_level, attachment.layer), (2, 1));
    }

    #[test]
    fn test_depth_defaults() {
        let depth = DepthAttachmentDescriptor::default();
        assert_eq!(depth.clear_depth, 1.0);
        assert_eq!(depth.load_op, LoadOp::Clear);
    }

    #[test]
    fn test_builder() {
        let pass = RenderPassDescriptor::new()
            .with_label("main")
            .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED))
            .with_color_attachment(ColorAttachmentDescriptor::load());
        assert_eq!(pass.color_attachments.len(), 2);
        assert_eq!(pass.color_attachments[0].clear_color, Color::RED);
        assert_eq!(pass.label.as_deref(), Some("main"));
    }
}
