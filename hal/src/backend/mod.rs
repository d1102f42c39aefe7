//! GPU backend abstraction layer.
//!
//! Each backend is a variant of [`GpuBackend`]; native objects owned by
//! textures and views are variants of [`GpuTexture`] and [`GpuTextureView`].
//!
//! # Available Backends
//!
//! - `dummy`: CPU simulation executing submissions on a worker thread
//! - `wgpu-backend`: Cross-platform backend using wgpu
//! - `vulkan-backend`: Native Vulkan backend using ash

mod dummy;
#[cfg(any(feature = "vulkan-backend", feature = "wgpu-backend"))]
mod transfer;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_impl;

use std::sync::Arc;

pub use dummy::DummyBackend;
pub(crate) use dummy::DummyImage;
#[cfg(feature = "vulkan-backend")]
pub use vulkan::VulkanBackend;
#[cfg(feature = "vulkan-backend")]
pub(crate) use vulkan::VulkanImage;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_impl::WgpuBackend;

use crate::command::SubmissionState;
use crate::command::recording::Submission;
use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, BackendType, InstanceParameters};
use crate::resources::TextureStorage;
use crate::types::{
    FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType, TextureUsage,
};

/// Native image handed to
/// [`GraphicsDevice::import_swapchain_texture`](crate::GraphicsDevice::import_swapchain_texture).
///
/// The swapchain keeps ownership of the image.
#[derive(Debug, Clone)]
pub enum SwapchainImage {
    /// Simulated image for the dummy backend.
    Dummy,
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu::Texture),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(ash::vk::Image),
}

/// Native image backing one texture.
#[allow(clippy::large_enum_variant)]
pub(crate) enum GpuTexture {
    /// CPU-side texel storage.
    Dummy(DummyImage),
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        texture: wgpu::Texture,
        /// Covers every mip and layer.
        view: wgpu::TextureView,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan(VulkanImage),
}

impl GpuTexture {
    #[cfg(feature = "vulkan-backend")]
    pub(crate) fn vk_image(&self) -> Option<ash::vk::Image> {
        match self {
            Self::Vulkan(image) => Some(image.image()),
            _ => None,
        }
    }

    #[cfg(feature = "vulkan-backend")]
    pub(crate) fn vk_image_view(&self) -> Option<ash::vk::ImageView> {
        match self {
            Self::Vulkan(image) => Some(image.view()),
            _ => None,
        }
    }

    #[cfg(feature = "vulkan-backend")]
    pub(crate) fn vk_format(&self) -> Option<ash::vk::Format> {
        match self {
            Self::Vulkan(image) => Some(image.format()),
            _ => None,
        }
    }

    #[cfg(feature = "wgpu-backend")]
    pub(crate) fn wgpu_texture(&self) -> Option<&wgpu::Texture> {
        match self {
            Self::Wgpu { texture, .. } => Some(texture),
            _ => None,
        }
    }

    pub(crate) fn dummy_image(&self) -> Option<&DummyImage> {
        match self {
            Self::Dummy(image) => Some(image),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(image) => f.debug_tuple("GpuTexture::Dummy").field(image).finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { texture, .. } => f
                .debug_struct("GpuTexture::Wgpu")
                .field("texture", texture)
                .finish_non_exhaustive(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(image) => f.debug_tuple("GpuTexture::Vulkan").field(image).finish(),
        }
    }
}

/// Native view of one mip level, used as a framebuffer attachment.
pub(crate) enum GpuTextureView {
    Dummy {
        mip_level: u32,
        base_layer: u32,
        layer_count: u32,
    },
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        view: wgpu::TextureView,
        /// Depth slice to render into when the view is a 3D view.
        depth_slice: Option<u32>,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        view: ash::vk::ImageView,
    },
}

impl std::fmt::Debug for GpuTextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy {
                mip_level,
                base_layer,
                layer_count,
            } => f
                .debug_struct("GpuTextureView::Dummy")
                .field("mip_level", mip_level)
                .field("base_layer", base_layer)
                .field("layer_count", layer_count)
                .finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { view, depth_slice } => f
                .debug_struct("GpuTextureView::Wgpu")
                .field("view", view)
                .field("depth_slice", depth_slice)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { view, .. } => f
                .debug_struct("GpuTextureView::Vulkan")
                .field("view", view)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTextureView {
    fn drop(&mut self) {
        if let GpuTextureView::Vulkan { device, view } = self {
            unsafe {
                device.destroy_image_view(*view, None);
            }
        }
    }
}

/// The backend selected for an instance.
#[allow(clippy::large_enum_variant)]
pub(crate) enum GpuBackend {
    Dummy(DummyBackend),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(WgpuBackend),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(VulkanBackend),
}

impl GpuBackend {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Dummy(_) => "Dummy",
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(_) => "wgpu",
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => "Vulkan",
        }
    }

    pub(crate) fn backend_type(&self) -> BackendType {
        match self {
            Self::Dummy(_) => BackendType::Dummy,
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(_) => BackendType::Wgpu,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(_) => BackendType::Vulkan,
        }
    }

    pub(crate) fn adapter_info(&self) -> AdapterInfo {
        match self {
            Self::Dummy(b) => b.adapter_info(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.adapter_info(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.adapter_info(),
        }
    }

    pub(crate) fn capabilities(&self) -> DeviceCapabilities {
        match self {
            Self::Dummy(b) => b.capabilities(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.capabilities(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.capabilities(),
        }
    }

    /// Whether `format` can back a texture with the given usage, sample
    /// count and type.
    pub(crate) fn supports_format(
        &self,
        format: TextureFormat,
        usage: TextureUsage,
        sample_count: u32,
        texture_type: TextureType,
    ) -> bool {
        match self {
            Self::Dummy(b) => b.supports_format(format, usage, sample_count, texture_type),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.supports_format(format, usage, sample_count, texture_type),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.supports_format(format, usage, sample_count, texture_type),
        }
    }

    /// Allocate a native image. `format` is the already resolved format.
    pub(crate) fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
    ) -> Result<GpuTexture, GraphicsError> {
        match self {
            Self::Dummy(b) => b.create_texture(descriptor, format),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.create_texture(descriptor, format),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.create_texture(descriptor, format),
        }
    }

    pub(crate) fn import_swapchain_texture(
        &self,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
        image: SwapchainImage,
    ) -> Result<GpuTexture, GraphicsError> {
        match (self, image) {
            (Self::Dummy(b), SwapchainImage::Dummy) => b.create_texture(descriptor, format),
            #[cfg(feature = "wgpu-backend")]
            (Self::Wgpu(b), SwapchainImage::Wgpu(texture)) => {
                b.import_swapchain_texture(descriptor, texture)
            }
            #[cfg(feature = "vulkan-backend")]
            (Self::Vulkan(b), SwapchainImage::Vulkan(image)) => {
                b.import_swapchain_texture(descriptor, format, image)
            }
            #[allow(unreachable_patterns)]
            (backend, image) => Err(GraphicsError::InvalidParameter(format!(
                "swapchain image {image:?} does not belong to the {} backend",
                backend.name()
            ))),
        }
    }

    pub(crate) fn create_framebuffer_view(
        &self,
        texture: &TextureStorage,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> Result<GpuTextureView, GraphicsError> {
        match self {
            Self::Dummy(b) => Ok(b.create_framebuffer_view(mip_level, layer, mode)),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.create_framebuffer_view(texture, mip_level, layer, mode),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.create_framebuffer_view(texture, mip_level, layer, mode),
        }
        .inspect(|_| {
            log::trace!(
                "{}: framebuffer view for texture {} mip {mip_level} layer {layer}",
                self.name(),
                texture.id()
            )
        })
    }

    /// Copy `data` into `texture`. Ordered after all earlier submissions.
    pub(crate) fn upload_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        match self {
            Self::Dummy(b) => b.upload_texture(texture, range, data, bytes_per_row),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.upload_texture(texture, range, data, bytes_per_row),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.upload_texture(texture, range, data, bytes_per_row),
        }
    }

    /// Copy one mip level region of `texture` into `out`, blocking until the
    /// data is available.
    pub(crate) fn read_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        match self {
            Self::Dummy(b) => b.read_texture(texture, range, out, bytes_per_row),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.read_texture(texture, range, out, bytes_per_row),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.read_texture(texture, range, out, bytes_per_row),
        }
    }

    /// Fails if the backend cannot generate mips for `texture`.
    pub(crate) fn check_mipmap_support(
        &self,
        texture: &Arc<TextureStorage>,
    ) -> Result<(), GraphicsError> {
        match self {
            Self::Dummy(_) => Ok(()),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.check_mipmap_support(texture),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.check_mipmap_support(texture),
        }
    }

    /// Translate and execute a recorded command buffer.
    ///
    /// The backend advances the submission state to `Scheduled` and
    /// `Completed` and keeps the submission alive until it has completed.
    pub(crate) fn submit(&self, submission: Submission) -> Result<(), GraphicsError> {
        crate::profile_scope!("backend_submit");
        match self {
            Self::Dummy(b) => b.submit(submission),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.submit(submission),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.submit(submission),
        }
    }

    /// Block until the submission tracked by `state` has completed.
    pub(crate) fn wait_for_submission(&self, state: &SubmissionState) -> Result<(), GraphicsError> {
        match self {
            Self::Dummy(_) => {
                state.wait_for(crate::command::SubmissionStatus::Completed);
                Ok(())
            }
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.wait_for_submission(state),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.wait_for_submission(state),
        }
    }

    /// Block until every submission has completed.
    pub(crate) fn wait_idle(&self) -> Result<(), GraphicsError> {
        match self {
            Self::Dummy(b) => {
                b.wait_idle();
                Ok(())
            }
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(b) => b.wait_idle(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(b) => b.wait_idle(),
        }
    }
}

/// Create the backend requested by `params`.
///
/// `BackendType::Auto` tries Vulkan, then wgpu, then falls back to Dummy.
pub(crate) fn create_backend(params: &InstanceParameters) -> Result<GpuBackend, GraphicsError> {
    match params.backend {
        BackendType::Dummy => Ok(GpuBackend::Dummy(DummyBackend::with_params(params))),
        BackendType::Wgpu => create_wgpu(params),
        BackendType::Vulkan => create_vulkan(params),
        BackendType::Auto => {
            match create_vulkan(params) {
                Ok(backend) => return Ok(backend),
                Err(e) => log::warn!("Failed to create Vulkan backend: {}", e),
            }
            match create_wgpu(params) {
                Ok(backend) => return Ok(backend),
                Err(e) => log::warn!("Failed to create wgpu backend: {}", e),
            }
            log::info!("Falling back to dummy backend");
            Ok(GpuBackend::Dummy(DummyBackend::with_params(params)))
        }
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan(params: &InstanceParameters) -> Result<GpuBackend, GraphicsError> {
    VulkanBackend::with_params(params).map(GpuBackend::Vulkan)
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan(_params: &InstanceParameters) -> Result<GpuBackend, GraphicsError> {
    Err(GraphicsError::InitializationFailed(
        "compiled without the vulkan-backend feature".to_string(),
    ))
}

#[cfg(feature = "wgpu-backend")]
fn create_wgpu(params: &InstanceParameters) -> Result<GpuBackend, GraphicsError> {
    WgpuBackend::with_params(params).map(GpuBackend::Wgpu)
}

#[cfg(not(feature = "wgpu-backend"))]
fn create_wgpu(_params: &InstanceParameters) -> Result<GpuBackend, GraphicsError> {
    Err(GraphicsError::InitializationFailed(
        "compiled without the wgpu-backend feature".to_string(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(any(feature = "vulkan-backend", feature = "wgpu-backend"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dummy_backend() {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let backend = create_backend(&params).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Dummy);
        assert_eq!(backend.name(), "Dummy");
    }

    #[test]
    fn test_auto_always_yields_a_backend() {
        let params = InstanceParameters::new()
            .with_backend(BackendType::Auto)
            .with_validation(false);
        assert!(create_backend(&params).is_ok());
    }

    #[test]
    fn test_swapchain_image_must_match_backend() {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let backend = create_backend(&params).unwrap();
        let desc = TextureDescriptor::new_2d(
            4,
            4,
            TextureFormat::Bgra8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        );
        assert!(
            backend
                .import_swapchain_texture(&desc, desc.format, SwapchainImage::Dummy)
                .is_ok()
        );
    }
}
