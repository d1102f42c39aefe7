//! Render and compute command encoders.
//!
//! An encoder exclusively borrows its command buffer for as long as it is
//! recording. Ending the encoder (explicitly or by dropping it) appends the
//! recorded pass to the buffer.

use crate::types::{Color, ScissorRect, Viewport};

use super::CommandBuffer;
use super::pipeline::{NativeComputePipeline, NativeRenderPipeline};
use super::recording::{
    ComputeCommand, RecordedCommand, RecordedComputePass, RecordedRenderPass, RenderCommand,
};

/// Records draw commands for one render pass.
///
/// Created by [`CommandBuffer::create_render_command_encoder`].
pub struct RenderCommandEncoder<'a> {
    buffer: &'a mut CommandBuffer,
    pass: Option<RecordedRenderPass>,
    debug_depth: u32,
}

impl<'a> RenderCommandEncoder<'a> {
    pub(crate) fn new(buffer: &'a mut CommandBuffer, pass: RecordedRenderPass) -> Self {
        Self {
            buffer,
            pass: Some(pass),
            debug_depth: 0,
        }
    }

    /// Width and height of the attachments at the rendered mip level.
    pub fn render_area(&self) -> (u32, u32) {
        self.pass
            .as_ref()
            .map(|pass| (pass.width, pass.height))
            .unwrap_or_default()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record(RenderCommand::SetViewport(viewport));
    }

    pub fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.record(RenderCommand::SetScissorRect(rect));
    }

    pub fn set_stencil_reference(&mut self, reference: u32) {
        self.record(RenderCommand::SetStencilReference(reference));
    }

    pub fn set_blend_color(&mut self, color: Color) {
        self.record(RenderCommand::SetBlendColor(color));
    }

    pub fn bind_render_pipeline(&mut self, pipeline: NativeRenderPipeline) {
        self.record(RenderCommand::BindPipeline(pipeline));
    }

    /// Record a non-indexed draw. Counts toward the buffer's draw statistics.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(RenderCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        self.buffer.increment_current_draw_count();
    }

    pub fn push_debug_group_label(&mut self, label: &str, color: Color) {
        self.debug_depth += 1;
        self.record(RenderCommand::PushDebugGroup {
            label: label.to_string(),
            color,
        });
    }

    pub fn pop_debug_group_label(&mut self) {
        if self.debug_depth == 0 {
            debug_assert!(false, "pop_debug_group_label without a matching push");
            log::error!("RenderCommandEncoder: debug group pop without push, ignored");
            return;
        }
        self.debug_depth -= 1;
        self.record(RenderCommand::PopDebugGroup);
    }

    pub fn insert_debug_event_label(&mut self, label: &str, color: Color) {
        self.record(RenderCommand::InsertDebugMarker {
            label: label.to_string(),
            color,
        });
    }

    /// Finish recording. Equivalent to dropping the encoder.
    pub fn end_encoding(self) {}

    fn record(&mut self, command: RenderCommand) {
        if let Some(pass) = self.pass.as_mut() {
            pass.commands.push(command);
        }
    }
}

impl Drop for RenderCommandEncoder<'_> {
    fn drop(&mut self) {
        let Some(mut pass) = self.pass.take() else {
            return;
        };
        if self.debug_depth > 0 {
            log::error!(
                "RenderCommandEncoder: {} debug group(s) left open, closing",
                self.debug_depth
            );
            for _ in 0..self.debug_depth {
                pass.commands.push(RenderCommand::PopDebugGroup);
            }
        }
        log::trace!(
            "RenderCommandEncoder: ended pass {:?} with {} commands",
            pass.descriptor.label,
            pass.commands.len()
        );
        self.buffer.push_recorded(RecordedCommand::RenderPass(pass));
    }
}

/// Records compute dispatches.
///
/// Created by [`CommandBuffer::create_compute_command_encoder`] or
/// [`CommandBuffer::create_compute_command_encoder_with_label`].
pub struct ComputeCommandEncoder<'a> {
    buffer: &'a mut CommandBuffer,
    pass: Option<RecordedComputePass>,
    debug_depth: u32,
}

impl<'a> ComputeCommandEncoder<'a> {
    pub(crate) fn new(buffer: &'a mut CommandBuffer, label: Option<String>) -> Self {
        Self {
            buffer,
            pass: Some(RecordedComputePass {
                label,
                commands: Vec::new(),
            }),
            debug_depth: 0,
        }
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: NativeComputePipeline) {
        self.record(ComputeCommand::BindPipeline(pipeline));
    }

    pub fn dispatch_thread_groups(&mut self, x: u32, y: u32, z: u32) {
        self.record(ComputeCommand::Dispatch { x, y, z });
    }

    pub fn push_debug_group_label(&mut self, label: &str, color: Color) {
        self.debug_depth += 1;
        self.record(ComputeCommand::PushDebugGroup {
            label: label.to_string(),
            color,
        });
    }

    pub fn pop_debug_group_label(&mut self) {
        if self.debug_depth == 0 {
            debug_assert!(false, "pop_debug_group_label without a matching push");
            log::error!("ComputeCommandEncoder: debug group pop without push, ignored");
            return;
        }
        self.debug_depth -= 1;
        self.record(ComputeCommand::PopDebugGroup);
    }

    pub fn insert_debug_event_label(&mut self, label: &str, color: Color) {
        self.record(ComputeCommand::InsertDebugMarker {
            label: label.to_string(),
            color,
        });
    }

    /// Finish recording. Equivalent to dropping the encoder.
    pub fn end_encoding(self) {}

    fn record(&mut self, command: ComputeCommand) {
        if let Some(pass) = self.pass.as_mut() {
            pass.commands.push(command);
        }
    }
}

impl Drop for ComputeCommandEncoder<'_> {
    fn drop(&mut self) {
        let Some(mut pass) = self.pass.take() else {
            return;
        };
        if self.debug_depth > 0 {
            log::error!(
                "ComputeCommandEncoder: {} debug group(s) left open, closing",
                self.debug_depth
            );
            for _ in 0..self.debug_depth {
                pass.commands.push(ComputeCommand::PopDebugGroup);
            }
        }
        log::trace!(
            "ComputeCommandEncoder: ended pass {:?} with {} commands",
            pass.label,
            pass.commands.len()
        );
        self.buffer.push_recorded(RecordedCommand::ComputePass(pass));
    }
}
