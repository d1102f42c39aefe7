//! # RedLilium HAL
//!
//! GPU hardware abstraction layer for RedLilium: command buffers, render and
//! compute encoders, framebuffers and texture resources, implemented once per
//! backend.
//!
//! ## Overview
//!
//! - [`GraphicsInstance`] - Entry point, selects the backend
//! - [`GraphicsDevice`] - Factory for textures, volumes, framebuffers and queues
//! - [`CommandQueue`] / [`CommandBuffer`] - Recording and submission
//! - [`RenderCommandEncoder`] / [`ComputeCommandEncoder`] - Pass recording
//! - [`TextureResource`] - Shared capability set of [`Texture`] and [`Volume`]
//!
//! Backends: Dummy (CPU simulation, always compiled), wgpu (`wgpu-backend`)
//! and native Vulkan (`vulkan-backend`).
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_hal::*;
//!
//! let instance = GraphicsInstance::new()?;
//! let device = instance.create_device()?;
//! let queue = device.create_command_queue(CommandQueueDescriptor::new())?;
//!
//! let target = device.create_texture(&TextureDescriptor::new_2d(
//!     256, 256,
//!     TextureFormat::Rgba8Unorm,
//!     TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
//! ))?;
//! let framebuffer = device.create_framebuffer(
//!     FramebufferDescriptor::new().with_color_attachment(target),
//! )?;
//!
//! let mut buffer = queue.create_command_buffer(CommandBufferDescriptor::new())?;
//! {
//!     let pass = RenderPassDescriptor::new()
//!         .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED));
//!     let mut encoder =
//!         buffer.create_render_command_encoder(&pass, &framebuffer, &Dependencies::new())?;
//!     encoder.draw(3, 1, 0, 0);
//! }
//! queue.submit(&mut buffer)?;
//! buffer.wait_until_completed();
//! ```

pub mod backend;
pub mod command;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod instance;
pub mod profiling;
pub mod resources;
pub mod types;

pub use backend::SwapchainImage;
pub use command::{
    CommandBuffer, CommandQueue, ComputeCommandEncoder, Dependencies, MAX_DEPENDENCY_TEXTURES,
    NativeComputePipeline, NativeRenderPipeline, RenderCommandEncoder, SubmissionId,
    SubmissionStatus,
};
pub use device::{DeviceCapabilities, GraphicsDevice};
pub use error::GraphicsError;
pub use framebuffer::{
    ColorAttachment, Framebuffer, FramebufferDescriptor, MAX_COLOR_ATTACHMENTS, SurfaceTextures,
};
pub use instance::{
    AdapterInfo, AdapterType, BACKEND_ENV_VAR, BackendType, GraphicsInstance, InstanceParameters,
    VALIDATION_ENV_VAR, WgpuBackendType,
};
pub use resources::{Texture, TextureId, TextureResource, TextureView, Volume};
pub use types::{
    Color, ColorAttachmentDescriptor, CommandBufferDescriptor, CommandBufferStatistics,
    CommandQueueDescriptor, DepthAttachmentDescriptor, Extent3d, FramebufferMode, LoadOp,
    QueueStatistics, RenderPassDescriptor, ScissorRect, StencilAttachmentDescriptor, StoreOp,
    TextureDescriptor, TextureFormat, TextureRange, TextureType, TextureUsage, Viewport,
};

/// HAL library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the HAL.
///
/// Only logs the version; instances can be created without calling it.
pub fn init() {
    log::info!("RedLilium HAL v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_instance() {
        let instance =
            GraphicsInstance::with_parameters(InstanceParameters::new().with_backend(BackendType::Dummy))
                .unwrap();
        assert_eq!(instance.backend_type(), BackendType::Dummy);
        assert_eq!(instance.backend_name(), "Dummy");
    }
}
