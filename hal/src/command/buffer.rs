//! Command buffers.

use std::fmt;
use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::framebuffer::Framebuffer;
use crate::resources::{TextureResource, TextureStorage};
use crate::types::{
    Color, CommandBufferDescriptor, CommandBufferStatistics, FramebufferMode, RenderPassDescriptor,
    StoreOp, TextureRange, TextureUsage,
};

use super::dependencies::Dependencies;
use super::encoder::{ComputeCommandEncoder, RenderCommandEncoder};
use super::recording::{
    AttachmentTarget, ContentUpdate, RecordedCommand, RecordedRenderPass, Submission,
    TextureCopy,
};
use super::sync::{SubmissionId, SubmissionState, SubmissionStatus};

/// A recorded batch of GPU work.
///
/// Created by [`CommandQueue::create_command_buffer`] and consumed by
/// [`CommandQueue::submit`]. Work is recorded through encoders, each of which
/// borrows the buffer mutably, so at most one encoder is open at a time.
/// After submission the buffer can only be waited on.
///
/// [`CommandQueue::create_command_buffer`]: super::CommandQueue::create_command_buffer
/// [`CommandQueue::submit`]: super::CommandQueue::submit
pub struct CommandBuffer {
    device: Arc<GraphicsDevice>,
    descriptor: CommandBufferDescriptor,
    statistics: CommandBufferStatistics,
    commands: Vec<RecordedCommand>,
    /// In recording order; applied by the queue after a successful submit.
    content_updates: Vec<ContentUpdate>,
    debug_depth: u32,
    present: Option<Arc<TextureStorage>>,
    state: Arc<SubmissionState>,
}

impl CommandBuffer {
    pub(crate) fn new(device: Arc<GraphicsDevice>, descriptor: CommandBufferDescriptor) -> Self {
        log::trace!("CommandBuffer: created {:?}", descriptor.label);
        Self {
            device,
            descriptor,
            statistics: CommandBufferStatistics::default(),
            commands: Vec::new(),
            content_updates: Vec::new(),
            debug_depth: 0,
            present: None,
            state: Arc::new(SubmissionState::new()),
        }
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn descriptor(&self) -> &CommandBufferDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn is_submitted(&self) -> bool {
        self.state.status() != SubmissionStatus::NotSubmitted
    }

    pub fn submission_status(&self) -> SubmissionStatus {
        self.state.status()
    }

    /// Id assigned by the queue at submission.
    pub fn submission_id(&self) -> Option<SubmissionId> {
        self.state.id()
    }

    /// Begin a render pass against `framebuffer`.
    ///
    /// Every live texture in `dependencies` is made visible to the pass
    /// before it starts.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] if the buffer was submitted, the
    /// framebuffer has no attachments, the pass does not describe exactly one
    /// entry per color slot, an attachment is not renderable at the selected
    /// mip level and layer, attachments differ in size, a stereo framebuffer
    /// has fewer than two layers, or a dependency is attached to the
    /// framebuffer.
    pub fn create_render_command_encoder(
        &mut self,
        render_pass: &RenderPassDescriptor,
        framebuffer: &Arc<Framebuffer>,
        dependencies: &Dependencies,
    ) -> Result<RenderCommandEncoder<'_>, GraphicsError> {
        self.ensure_recording()?;

        let attachments = framebuffer.attachments();
        let slots = &attachments.colors;
        let depth = &attachments.depth;
        let stencil = &attachments.stencil;
        if slots.iter().all(Option::is_none) && depth.is_none() && stencil.is_none() {
            return Err(GraphicsError::validation(
                "framebuffer has no attachments",
            ));
        }
        if render_pass.color_attachments.len() != slots.len() {
            return Err(GraphicsError::validation(format!(
                "render pass describes {} color attachments, framebuffer has {} slots",
                render_pass.color_attachments.len(),
                slots.len()
            )));
        }

        let mode = framebuffer.mode();
        let mut area = None;
        let mut color_targets = Vec::with_capacity(slots.len());
        let mut resolve_targets = Vec::with_capacity(slots.len());
        for (index, (slot, ops)) in slots
            .iter()
            .zip(&render_pass.color_attachments)
            .enumerate()
        {
            let Some(attachment) = slot else {
                color_targets.push(None);
                resolve_targets.push(None);
                continue;
            };
            let role = format!("color attachment {index}");
            color_targets.push(Some(resolve_attachment(
                attachment.texture.storage(),
                ops.mip_level,
                ops.layer,
                mode,
                &role,
                &mut area,
            )?));
            let resolve = match &attachment.resolve_texture {
                Some(texture) => Some(resolve_attachment(
                    texture.storage(),
                    ops.mip_level,
                    ops.layer,
                    mode,
                    &format!("resolve attachment {index}"),
                    &mut area,
                )?),
                None => None,
            };
            resolve_targets.push(resolve);
        }

        let depth_target = match depth {
            Some(texture) => Some(resolve_attachment(
                texture.storage(),
                render_pass.depth_attachment.mip_level,
                render_pass.depth_attachment.layer,
                mode,
                "depth attachment",
                &mut area,
            )?),
            None => None,
        };
        let depth_resolve_target = match (&depth_target, &attachments.resolve_depth) {
            (Some(_), Some(texture)) => Some(resolve_attachment(
                texture.storage(),
                render_pass.depth_attachment.mip_level,
                render_pass.depth_attachment.layer,
                mode,
                "depth resolve attachment",
                &mut area,
            )?),
            _ => None,
        };
        let stencil_target = match stencil {
            Some(texture) => Some(resolve_attachment(
                texture.storage(),
                render_pass.stencil_attachment.mip_level,
                render_pass.stencil_attachment.layer,
                mode,
                "stencil attachment",
                &mut area,
            )?),
            None => None,
        };

        let attached = attachments.texture_ids();
        let live = dependencies.live_textures();
        if let Some(conflict) = live.iter().find(|dep| attached.contains(&dep.id())) {
            return Err(GraphicsError::validation(format!(
                "texture {} is both a dependency and an attachment of the pass",
                conflict.id()
            )));
        }
        if live.len() < dependencies.len() {
            log::trace!(
                "CommandBuffer: skipping {} expired dependencies",
                dependencies.len() - live.len()
            );
        }

        let mut stored = Vec::new();
        for (target, ops) in color_targets.iter().zip(&render_pass.color_attachments) {
            if let Some(target) = target
                && ops.store_op == StoreOp::Store
            {
                stored.push((&target.texture, ops.mip_level));
            }
        }
        for (target, ops) in resolve_targets.iter().zip(&render_pass.color_attachments) {
            if let Some(target) = target {
                stored.push((&target.texture, ops.mip_level));
            }
        }
        if let Some(target) = &depth_target
            && render_pass.depth_attachment.store_op == StoreOp::Store
        {
            stored.push((&target.texture, render_pass.depth_attachment.mip_level));
        }
        if let Some(target) = &stencil_target
            && render_pass.stencil_attachment.store_op == StoreOp::Store
        {
            stored.push((&target.texture, render_pass.stencil_attachment.mip_level));
        }
        if let Some(target) = &depth_resolve_target {
            stored.push((&target.texture, render_pass.depth_attachment.mip_level));
        }
        self.content_updates
            .extend(stored.into_iter().map(|(texture, mip_level)| ContentUpdate::Written {
                texture: Arc::clone(texture),
                mip_level,
            }));

        let (width, height) = area.unwrap_or((1, 1));
        log::trace!(
            "CommandBuffer {:?}: begin render pass {:?} ({}x{}, {:?})",
            self.descriptor.label,
            render_pass.label,
            width,
            height,
            mode
        );

        let pass = RecordedRenderPass {
            descriptor: render_pass.clone(),
            framebuffer: Arc::clone(framebuffer),
            color_targets,
            resolve_targets,
            depth_target,
            depth_resolve_target,
            stencil_target,
            dependencies: live,
            stereo: mode == FramebufferMode::Stereo,
            width,
            height,
            commands: Vec::new(),
        };
        Ok(RenderCommandEncoder::new(self, pass))
    }

    /// [`create_render_command_encoder`](Self::create_render_command_encoder)
    /// with no dependencies.
    pub fn create_render_command_encoder_without_dependencies(
        &mut self,
        render_pass: &RenderPassDescriptor,
        framebuffer: &Arc<Framebuffer>,
    ) -> Result<RenderCommandEncoder<'_>, GraphicsError> {
        self.create_render_command_encoder(render_pass, framebuffer, &Dependencies::new())
    }

    /// Begin a compute pass. Fails only if the buffer was already submitted.
    pub fn create_compute_command_encoder(
        &mut self,
    ) -> Result<ComputeCommandEncoder<'_>, GraphicsError> {
        self.ensure_recording()?;
        Ok(ComputeCommandEncoder::new(self, None))
    }

    /// Begin a compute pass shown as `label` in GPU debuggers.
    pub fn create_compute_command_encoder_with_label(
        &mut self,
        label: &str,
    ) -> Result<ComputeCommandEncoder<'_>, GraphicsError> {
        self.ensure_recording()?;
        Ok(ComputeCommandEncoder::new(self, Some(label.to_string())))
    }

    /// Present `texture` once the buffer's work has executed.
    ///
    /// Calling this again replaces the previous drawable. Presenting a texture
    /// that is not part of a swapchain is allowed but logged.
    pub fn present<T>(&mut self, texture: &Arc<T>)
    where
        T: TextureResource + ?Sized,
    {
        if self.is_submitted() {
            log::error!(
                "CommandBuffer {:?}: present after submission ignored",
                self.descriptor.label
            );
            return;
        }
        if !texture.is_swapchain_texture() {
            log::warn!(
                "CommandBuffer {:?}: presenting non-swapchain texture {}",
                self.descriptor.label,
                texture.texture_id()
            );
        }
        if let Some(previous) = self.present.replace(Arc::clone(texture.storage())) {
            log::trace!(
                "CommandBuffer {:?}: drawable {} replaced by {}",
                self.descriptor.label,
                previous.id(),
                texture.texture_id()
            );
        }
    }

    /// Block until the device has accepted the submitted work.
    ///
    /// Returns immediately if the buffer was never submitted.
    pub fn wait_until_scheduled(&self) {
        if !self.is_submitted() {
            log::warn!(
                "CommandBuffer {:?}: wait_until_scheduled on a buffer that was never submitted",
                self.descriptor.label
            );
            return;
        }
        self.state.wait_for(SubmissionStatus::Scheduled);
    }

    /// Block until the submitted work has finished executing.
    ///
    /// Returns immediately if the buffer was never submitted.
    pub fn wait_until_completed(&self) {
        if !self.is_submitted() {
            log::warn!(
                "CommandBuffer {:?}: wait_until_completed on a buffer that was never submitted",
                self.descriptor.label
            );
            return;
        }
        crate::profile_scope!("wait_until_completed");
        if let Err(err) = self.device.backend().wait_for_submission(&self.state) {
            log::error!(
                "CommandBuffer {:?}: waiting for completion failed: {err}",
                self.descriptor.label
            );
            self.state.advance(SubmissionStatus::Completed);
        }
        self.state.wait_for(SubmissionStatus::Completed);
    }

    /// Open a debug region. Must be balanced by
    /// [`pop_debug_group_label`](Self::pop_debug_group_label) before
    /// submission.
    pub fn push_debug_group_label(&mut self, label: &str, color: Color) {
        self.debug_depth += 1;
        self.commands.push(RecordedCommand::PushDebugGroup {
            label: label.to_string(),
            color,
        });
    }

    pub fn pop_debug_group_label(&mut self) {
        if self.debug_depth == 0 {
            debug_assert!(false, "pop_debug_group_label without a matching push");
            log::error!(
                "CommandBuffer {:?}: debug group pop without push, ignored",
                self.descriptor.label
            );
            return;
        }
        self.debug_depth -= 1;
        self.commands.push(RecordedCommand::PopDebugGroup);
    }

    /// Number of debug regions currently open on the buffer.
    pub fn debug_group_depth(&self) -> u32 {
        self.debug_depth
    }

    pub fn current_draw_count(&self) -> u32 {
        self.statistics.current_draw_count
    }

    pub fn increment_current_draw_count(&mut self) {
        self.statistics.current_draw_count += 1;
    }

    pub fn statistics(&self) -> CommandBufferStatistics {
        self.statistics
    }

    /// Record mip generation for `texture`.
    pub(crate) fn record_generate_mipmap(
        &mut self,
        texture: &Arc<TextureStorage>,
    ) -> Result<(), GraphicsError> {
        self.ensure_recording()?;
        if texture.descriptor().mip_level_count <= 1 {
            return Ok(());
        }
        if texture.descriptor().sample_count > 1 {
            return Err(GraphicsError::validation(
                "mips cannot be generated for multisampled textures",
            ));
        }
        self.device.backend().check_mipmap_support(texture)?;

        self.commands
            .push(RecordedCommand::GenerateMipmaps(Arc::clone(texture)));
        self.content_updates
            .push(ContentUpdate::MipsGenerated(Arc::clone(texture)));
        log::trace!(
            "CommandBuffer {:?}: generate {} mips for texture {}",
            self.descriptor.label,
            texture.descriptor().mip_level_count,
            texture.id()
        );
        Ok(())
    }

    /// Record a GPU copy of `range` from `source` into `destination`.
    pub(crate) fn record_copy_texture(
        &mut self,
        source: &Arc<TextureStorage>,
        destination: &Arc<TextureStorage>,
        range: &TextureRange,
    ) -> Result<(), GraphicsError> {
        self.ensure_recording()?;
        if source.id() == destination.id() {
            return Err(GraphicsError::validation(
                "texture copy source and destination are the same texture",
            ));
        }
        let (src, dst) = (source.descriptor(), destination.descriptor());
        if !src.usage.contains(TextureUsage::COPY_SRC) {
            return Err(GraphicsError::validation(format!(
                "copy source {} lacks COPY_SRC usage",
                source.id()
            )));
        }
        if !dst.usage.contains(TextureUsage::COPY_DST) {
            return Err(GraphicsError::validation(format!(
                "copy destination {} lacks COPY_DST usage",
                destination.id()
            )));
        }
        if source.format() != destination.format() || src.texture_type != dst.texture_type {
            return Err(GraphicsError::validation(format!(
                "cannot copy {:?} {:?} into {:?} {:?}",
                src.texture_type,
                source.format(),
                dst.texture_type,
                destination.format()
            )));
        }
        if src.sample_count > 1 || dst.sample_count > 1 {
            return Err(GraphicsError::validation(
                "multisampled textures cannot be copied",
            ));
        }
        if range.num_mip_levels != 1 {
            return Err(GraphicsError::validation(
                "texture copies cover exactly one mip level",
            ));
        }
        range.validate_within(src)?;
        range.validate_within(dst)?;

        self.commands.push(RecordedCommand::CopyTexture(TextureCopy {
            source: Arc::clone(source),
            destination: Arc::clone(destination),
            range: *range,
        }));
        self.content_updates.push(ContentUpdate::Written {
            texture: Arc::clone(destination),
            mip_level: range.mip_level,
        });
        log::trace!(
            "CommandBuffer {:?}: copy texture {} into {}",
            self.descriptor.label,
            source.id(),
            destination.id()
        );
        Ok(())
    }

    pub(crate) fn push_recorded(&mut self, command: RecordedCommand) {
        self.commands.push(command);
    }

    pub(crate) fn state(&self) -> &Arc<SubmissionState> {
        &self.state
    }

    pub(crate) fn has_present(&self) -> bool {
        self.present.is_some()
    }

    /// Texture state changes of the recorded work, in recording order.
    pub(crate) fn take_content_updates(&mut self) -> Vec<ContentUpdate> {
        std::mem::take(&mut self.content_updates)
    }

    /// Move the recorded work out of the buffer and mark it submitted.
    pub(crate) fn take_submission(&mut self, id: SubmissionId) -> Submission {
        if self.debug_depth > 0 {
            debug_assert!(
                self.debug_depth == 0,
                "command buffer submitted with open debug groups"
            );
            log::error!(
                "CommandBuffer {:?}: submitted with {} open debug group(s), closing",
                self.descriptor.label,
                self.debug_depth
            );
            for _ in 0..self.debug_depth {
                self.commands.push(RecordedCommand::PopDebugGroup);
            }
            self.debug_depth = 0;
        }

        self.state.set_id(id);
        self.state.advance(SubmissionStatus::Submitted);

        Submission {
            id,
            label: self.descriptor.label.clone(),
            commands: std::mem::take(&mut self.commands),
            present: self.present.take(),
            state: Arc::clone(&self.state),
        }
    }

    fn ensure_recording(&self) -> Result<(), GraphicsError> {
        if self.is_submitted() {
            return Err(GraphicsError::validation(format!(
                "command buffer {:?} was already submitted",
                self.descriptor.label
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn recorded_command_count(&self) -> usize {
        self.commands.len()
    }
}

/// Check one attachment and get its framebuffer view.
///
/// `area` collects the render area; every attachment must match it.
fn resolve_attachment(
    texture: &Arc<TextureStorage>,
    mip_level: u32,
    layer: u32,
    mode: FramebufferMode,
    role: &str,
    area: &mut Option<(u32, u32)>,
) -> Result<AttachmentTarget, GraphicsError> {
    let descriptor = texture.descriptor();
    if !descriptor.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        return Err(GraphicsError::validation(format!(
            "{role} ({}) lacks RENDER_ATTACHMENT usage",
            texture.id()
        )));
    }
    if mip_level >= descriptor.mip_level_count {
        return Err(GraphicsError::validation(format!(
            "{role}: mip level {mip_level} out of range ({} levels)",
            descriptor.mip_level_count
        )));
    }
    let layers = texture.attachment_layers(mip_level);
    if mode == FramebufferMode::Stereo && layers < 2 {
        return Err(GraphicsError::validation(format!(
            "{role}: stereo rendering needs at least 2 layers, texture has {layers}"
        )));
    }
    if layer.saturating_add(mode.layer_count()) > layers {
        return Err(GraphicsError::validation(format!(
            "{role}: layer {layer} out of range ({layers} layers at mip {mip_level})"
        )));
    }

    let size = descriptor.mip_level_size(mip_level);
    match *area {
        Some((width, height)) if (width, height) != (size.width, size.height) => {
            return Err(GraphicsError::validation(format!(
                "{role} is {}x{} at mip {mip_level}, other attachments are {width}x{height}",
                size.width, size.height
            )));
        }
        Some(_) => {}
        None => *area = Some((size.width, size.height)),
    }

    let view = texture.framebuffer_view(mip_level, layer, mode)?;
    Ok(AttachmentTarget {
        texture: Arc::clone(texture),
        view,
    })
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if !self.is_submitted() && !self.commands.is_empty() {
            log::debug!(
                "CommandBuffer {:?}: dropped with {} unsubmitted commands",
                self.descriptor.label,
                self.commands.len()
            );
        }
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.descriptor.label)
            .field("status", &self.state.status())
            .field("commands", &self.commands.len())
            .field("draw_count", &self.statistics.current_draw_count)
            .field("debug_depth", &self.debug_depth)
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandBuffer: Send);
