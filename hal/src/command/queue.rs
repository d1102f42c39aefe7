//! Command queue: submission and statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::TextureStorage;
use crate::types::{CommandBufferDescriptor, CommandQueueDescriptor, QueueStatistics};

use super::CommandBuffer;
use super::sync::{SubmissionId, SubmissionStatus};

static NEXT_SUBMISSION_ID: AtomicU64 = AtomicU64::new(1);

/// Submits command buffers to the device in order.
///
/// Work executes in submission order. Textures referenced by a submission
/// stay alive until the submission has completed.
pub struct CommandQueue {
    device: Arc<GraphicsDevice>,
    descriptor: CommandQueueDescriptor,
    statistics: Mutex<QueueStatistics>,
}

impl CommandQueue {
    pub(crate) fn new(device: Arc<GraphicsDevice>, descriptor: CommandQueueDescriptor) -> Self {
        Self {
            device,
            descriptor,
            statistics: Mutex::new(QueueStatistics::default()),
        }
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Create an empty command buffer for this queue.
    pub fn create_command_buffer(
        &self,
        descriptor: CommandBufferDescriptor,
    ) -> Result<CommandBuffer, GraphicsError> {
        Ok(CommandBuffer::new(Arc::clone(&self.device), descriptor))
    }

    /// Hand the buffer's recorded work to the device.
    ///
    /// The buffer is left in the submitted state and can be waited on. A
    /// buffer can only be submitted once.
    pub fn submit(&self, buffer: &mut CommandBuffer) -> Result<SubmissionId, GraphicsError> {
        crate::profile_scope!("queue_submit");

        if buffer.is_submitted() {
            return Err(GraphicsError::validation(format!(
                "command buffer {:?} was already submitted",
                buffer.label()
            )));
        }

        let id = SubmissionId(NEXT_SUBMISSION_ID.fetch_add(1, Ordering::Relaxed));
        let draws = buffer.current_draw_count();
        let presents = buffer.has_present();
        let state = Arc::clone(buffer.state());
        let content_updates = buffer.take_content_updates();
        let submission = buffer.take_submission(id);

        log::debug!(
            "CommandQueue {:?}: submitting {:?} as {} ({} commands, {} draws)",
            self.descriptor.label,
            submission.label,
            id,
            submission.commands.len(),
            draws
        );

        if let Err(err) = self.device.backend().submit(submission) {
            log::error!("CommandQueue {:?}: {id} failed: {err}", self.descriptor.label);
            state.advance(SubmissionStatus::Completed);
            return Err(err);
        }

        // Later uploads and readbacks are ordered after this submission, so
        // the texture state can move ahead of execution.
        for update in &content_updates {
            update.apply();
        }
        if let Ok(mut stats) = self.statistics.lock() {
            stats.submitted_command_buffers += 1;
            stats.draw_calls += u64::from(draws);
            crate::profile_plot!("draws_per_submission", draws);
            if presents {
                stats.presented_frames += 1;
            }
        }
        if presents {
            crate::frame_mark!();
        }
        Ok(id)
    }

    /// Block until every submitted command buffer has completed.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        crate::profile_scope!("queue_wait_idle");
        self.device.backend().wait_idle()
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.statistics
            .lock()
            .map(|stats| *stats)
            .unwrap_or_default()
    }

    /// Generate mips for `texture` in a one-off submission and wait for it.
    pub(crate) fn generate_mipmap(
        &self,
        texture: &Arc<TextureStorage>,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("generate_mipmap");
        if texture.descriptor().mip_level_count <= 1 {
            return Ok(());
        }
        let mut buffer =
            self.create_command_buffer(CommandBufferDescriptor::new().with_label("generate_mipmap"))?;
        buffer.record_generate_mipmap(texture)?;
        self.submit(&mut buffer)?;
        buffer.wait_until_completed();
        Ok(())
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("label", &self.descriptor.label)
            .field("statistics", &self.statistics())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandQueue: Send, Sync);
