//! Opaque handles to pipelines created outside this crate.
//!
//! Shader compilation and pipeline creation are left to the caller. Encoders
//! accept the resulting native objects as-is; a pipeline from a different
//! backend than the one recording is skipped with a warning.

/// A render pipeline created with the native API of one backend.
#[derive(Debug, Clone)]
pub enum NativeRenderPipeline {
    /// Placeholder for the dummy backend. The string is a debug name.
    Dummy(String),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu::RenderPipeline),
    /// Raw Vulkan pipeline. The caller keeps ownership and must keep it alive
    /// until every submission using it has completed.
    #[cfg(feature = "vulkan-backend")]
    Vulkan(ash::vk::Pipeline),
}

/// A compute pipeline created with the native API of one backend.
#[derive(Debug, Clone)]
pub enum NativeComputePipeline {
    Dummy(String),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu::ComputePipeline),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(ash::vk::Pipeline),
}
