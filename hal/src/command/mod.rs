//! Command recording and submission.
//!
//! The flow is: [`CommandQueue::create_command_buffer`] → one or more encoders
//! from [`CommandBuffer`] → optional [`CommandBuffer::present`] →
//! [`CommandQueue::submit`] → optional waits on the buffer.

mod buffer;
mod dependencies;
mod encoder;
mod pipeline;
mod queue;
pub(crate) mod recording;
mod sync;

pub use buffer::CommandBuffer;
pub use dependencies::{Dependencies, MAX_DEPENDENCY_TEXTURES};
pub use encoder::{ComputeCommandEncoder, RenderCommandEncoder};
pub use pipeline::{NativeComputePipeline, NativeRenderPipeline};
pub use queue::CommandQueue;
pub(crate) use sync::SubmissionState;
pub use sync::{SubmissionId, SubmissionStatus};
