//! Backend-agnostic command stream.
//!
//! Encoders append to a [`RecordedCommand`] list owned by the command buffer.
//! At submission the list is handed to the backend, which translates it into
//! native work. Every texture the stream touches is kept alive by the `Arc`s
//! stored here until the submission has been retired.

use std::sync::Arc;

use crate::framebuffer::Framebuffer;
use crate::resources::{TextureStorage, TextureView};
use crate::types::{Color, RenderPassDescriptor, ScissorRect, TextureRange, Viewport};

use super::pipeline::{NativeComputePipeline, NativeRenderPipeline};
use super::sync::{SubmissionId, SubmissionState};

#[derive(Debug)]
pub(crate) enum RecordedCommand {
    RenderPass(RecordedRenderPass),
    ComputePass(RecordedComputePass),
    PushDebugGroup { label: String, color: Color },
    PopDebugGroup,
    GenerateMipmaps(Arc<TextureStorage>),
    CopyTexture(TextureCopy),
}

/// Copy of one region between two textures of the same format. The region
/// has the same coordinates in both textures.
#[derive(Debug, Clone)]
pub(crate) struct TextureCopy {
    pub source: Arc<TextureStorage>,
    pub destination: Arc<TextureStorage>,
    pub range: TextureRange,
}

/// One attachment resolved to its texture and framebuffer view.
#[derive(Debug, Clone)]
pub(crate) struct AttachmentTarget {
    pub texture: Arc<TextureStorage>,
    pub view: Arc<TextureView>,
}

#[derive(Debug)]
pub(crate) struct RecordedRenderPass {
    pub descriptor: RenderPassDescriptor,
    /// Keeps the attachments alive while the pass is in flight.
    #[allow(dead_code)]
    pub framebuffer: Arc<Framebuffer>,
    /// Indexed like `descriptor.color_attachments`.
    pub color_targets: Vec<Option<AttachmentTarget>>,
    pub resolve_targets: Vec<Option<AttachmentTarget>>,
    pub depth_target: Option<AttachmentTarget>,
    pub depth_resolve_target: Option<AttachmentTarget>,
    pub stencil_target: Option<AttachmentTarget>,
    /// Textures read by the pass that must be made visible before it starts.
    pub dependencies: Vec<Arc<TextureStorage>>,
    pub stereo: bool,
    pub width: u32,
    pub height: u32,
    pub commands: Vec<RenderCommand>,
}

#[derive(Debug, Clone)]
pub(crate) enum RenderCommand {
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    SetStencilReference(u32),
    SetBlendColor(Color),
    BindPipeline(NativeRenderPipeline),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    PushDebugGroup { label: String, color: Color },
    PopDebugGroup,
    InsertDebugMarker { label: String, color: Color },
}

#[derive(Debug)]
pub(crate) struct RecordedComputePass {
    pub label: Option<String>,
    pub commands: Vec<ComputeCommand>,
}

#[derive(Debug, Clone)]
pub(crate) enum ComputeCommand {
    BindPipeline(NativeComputePipeline),
    Dispatch { x: u32, y: u32, z: u32 },
    PushDebugGroup { label: String, color: Color },
    PopDebugGroup,
    InsertDebugMarker { label: String, color: Color },
}

/// Texture state change implied by recorded work.
///
/// Applied only once the device has accepted the submission, so a buffer that
/// is dropped or rejected leaves every texture as it was.
#[derive(Debug, Clone)]
pub(crate) enum ContentUpdate {
    Written {
        texture: Arc<TextureStorage>,
        mip_level: u32,
    },
    MipsGenerated(Arc<TextureStorage>),
}

impl ContentUpdate {
    pub fn apply(&self) {
        match self {
            Self::Written { texture, mip_level } => texture.mark_written(*mip_level),
            Self::MipsGenerated(texture) => texture.mark_mips_generated(),
        }
    }
}

/// Everything a backend needs to execute one command buffer.
#[derive(Debug)]
pub(crate) struct Submission {
    pub id: SubmissionId,
    pub label: Option<String>,
    pub commands: Vec<RecordedCommand>,
    pub present: Option<Arc<TextureStorage>>,
    pub state: Arc<SubmissionState>,
}
