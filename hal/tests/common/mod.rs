//! Common utilities for HAL integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

use std::sync::Arc;

use redlilium_hal::{
    BackendType, Color, ColorAttachmentDescriptor, CommandBuffer, CommandBufferDescriptor,
    CommandQueue, CommandQueueDescriptor, Dependencies, Framebuffer, FramebufferDescriptor,
    GraphicsDevice, GraphicsInstance, InstanceParameters, RenderPassDescriptor, Texture,
    TextureDescriptor, TextureFormat, TextureRange, TextureResource, TextureUsage,
    WgpuBackendType,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (CPU simulation).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
    /// WebGPU backend (via wgpu).
    WebGpu,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
            #[cfg(feature = "wgpu-backend")]
            Backend::WebGpu => true,
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::WebGpu => false,
        }
    }

    /// Get the backend name for display.
    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
            Backend::WebGpu => "webgpu",
        }
    }

    /// Convert to InstanceParameters for creating a GraphicsInstance.
    pub fn to_instance_parameters(self) -> InstanceParameters {
        let params = InstanceParameters::new().with_validation(false);
        match self {
            Backend::Dummy => params.with_backend(BackendType::Dummy),
            Backend::Vulkan => params.with_backend(BackendType::Vulkan),
            Backend::WebGpu => params
                .with_backend(BackendType::Wgpu)
                .with_wgpu_backend(WgpuBackendType::Auto),
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Instance, device and queue for one test.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    #[allow(dead_code)]
    instance: Arc<GraphicsInstance>,
    pub device: Arc<GraphicsDevice>,
    pub queue: Arc<CommandQueue>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not compiled in or no device could
    /// be opened (no GPU on the machine running the tests).
    pub fn new(backend: Backend) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        if !backend.is_available() {
            return None;
        }

        let instance = GraphicsInstance::with_parameters(backend.to_instance_parameters())
            .map_err(|e| eprintln!("{} instance unavailable: {e}", backend.name()))
            .ok()?;
        let device = instance.create_device().ok()?;
        let queue = device
            .create_command_queue(CommandQueueDescriptor::new().with_label("test queue"))
            .ok()?;

        Some(Self {
            backend,
            instance,
            device,
            queue,
        })
    }

    /// Create a 2D texture with the given dimensions and format.
    pub fn create_texture_2d(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Arc<Texture> {
        self.device
            .create_texture(&TextureDescriptor::new_2d(width, height, format, usage))
            .expect("Failed to create texture")
    }

    /// Create an RGBA8 render target that can be read back.
    pub fn create_render_target(&self, width: u32, height: u32) -> Arc<Texture> {
        self.create_texture_2d(
            width,
            height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::COPY_DST,
        )
    }

    pub fn create_command_buffer(&self, label: &str) -> CommandBuffer {
        self.queue
            .create_command_buffer(CommandBufferDescriptor::new().with_label(label))
            .expect("Failed to create command buffer")
    }

    /// Clear every color attachment of `framebuffer` to `color` and wait.
    pub fn clear(&self, framebuffer: &Arc<Framebuffer>, color: Color) {
        let mut pass = RenderPassDescriptor::new().with_label("clear");
        for _ in 0..framebuffer.color_attachment_slot_count() {
            pass = pass.with_color_attachment(ColorAttachmentDescriptor::clear(color));
        }
        self.run_pass(framebuffer, &pass, &Dependencies::new());
    }

    /// Encode `pass` without draws, submit it and wait for completion.
    pub fn run_pass(
        &self,
        framebuffer: &Arc<Framebuffer>,
        pass: &RenderPassDescriptor,
        dependencies: &Dependencies,
    ) {
        let mut buffer = self.create_command_buffer("run_pass");
        buffer
            .create_render_command_encoder(pass, framebuffer, dependencies)
            .expect("Failed to create render encoder")
            .end_encoding();
        self.queue.submit(&mut buffer).expect("Submit failed");
        buffer.wait_until_completed();
    }

    /// Read color attachment `index` of `framebuffer` completely.
    pub fn read_color(&self, framebuffer: &Framebuffer, index: usize) -> Vec<u8> {
        let texture = framebuffer
            .color_attachment(index)
            .expect("Color slot is empty");
        let range = TextureRange::full_mip(texture.descriptor(), 0);
        let mut out = vec![0u8; range.byte_size(texture.resolved_format(), 0) as usize];
        framebuffer
            .copy_bytes_color_attachment(&self.queue, index, &mut out, &range, 0)
            .expect("Readback failed");
        out
    }

    /// Read one region of `texture` through a throwaway framebuffer.
    ///
    /// The texture needs `RENDER_ATTACHMENT` and `COPY_SRC` usage.
    pub fn read(&self, texture: Arc<dyn TextureResource>, range: &TextureRange) -> Vec<u8> {
        let size = range.byte_size(texture.resolved_format(), 0) as usize;
        let framebuffer = single_target_framebuffer(self, texture);
        let mut out = vec![0u8; size];
        framebuffer
            .copy_bytes_color_attachment(&self.queue, 0, &mut out, range, 0)
            .expect("Readback failed");
        out
    }
}

/// Create a single-attachment framebuffer.
pub fn single_target_framebuffer(
    ctx: &TestContext,
    texture: Arc<dyn TextureResource>,
) -> Arc<Framebuffer> {
    ctx.device
        .create_framebuffer(FramebufferDescriptor::new().with_color_attachment(texture))
        .expect("Failed to create framebuffer")
}

// ============================================================================
// Pixel helpers
// ============================================================================

/// Convert a color to RGBA8 bytes the way a GPU clear would.
pub fn rgba8(color: Color) -> [u8; 4] {
    color.to_array().map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Assert that every 4-byte texel of `data` equals `expected` within one
/// unit of rounding.
pub fn assert_all_texels(data: &[u8], expected: [u8; 4]) {
    assert!(!data.is_empty(), "no texels read back");
    for (index, texel) in data.chunks_exact(4).enumerate() {
        let close = texel
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| a.abs_diff(*b) <= 1);
        assert!(close, "texel {index} is {texel:?}, expected {expected:?}");
    }
}

/// Deterministic RGBA8 pattern for `width * height` texels.
pub fn generate_test_pattern(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| {
            let x = (i % width) as u8;
            let y = (i / width) as u8;
            [x.wrapping_mul(16), y.wrapping_mul(16), x ^ y, 255]
        })
        .collect()
}
