//! Common types and descriptors.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! consumed by the device and command buffer factories.

mod command;
mod common;
mod render_pass;
mod texture;

pub use command::{
    CommandBufferDescriptor, CommandBufferStatistics, CommandQueueDescriptor, QueueStatistics,
};
pub use common::{Color, Extent3d, ScissorRect, Viewport};
pub use render_pass::{
    ColorAttachmentDescriptor, DepthAttachmentDescriptor, LoadOp, RenderPassDescriptor,
    StencilAttachmentDescriptor, StoreOp,
};
pub use texture::{
    FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType, TextureUsage,
};
