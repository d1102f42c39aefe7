//! End-to-end tests of the HAL against every compiled backend.
//!
//! GPU backends are skipped when no adapter is present.

mod common;

use std::sync::Arc;

use common::{
    Backend, TestContext, assert_all_texels, generate_test_pattern, rgba8,
    single_target_framebuffer,
};
use redlilium_hal::{
    Color, ColorAttachmentDescriptor, Dependencies, FramebufferDescriptor, FramebufferMode,
    GraphicsError, NativeRenderPipeline, RenderPassDescriptor, ScissorRect, SubmissionStatus,
    SurfaceTextures, TextureDescriptor, TextureFormat, TextureRange, TextureResource,
    TextureUsage, Viewport,
};
use rstest::rstest;

macro_rules! context_or_skip {
    ($backend:expr) => {
        match TestContext::new($backend) {
            Some(ctx) => ctx,
            None => {
                eprintln!("Backend {:?} not available, skipping", $backend);
                return;
            }
        }
    };
}

fn mip_usage() -> TextureUsage {
    TextureUsage::RENDER_ATTACHMENT
        | TextureUsage::TEXTURE_BINDING
        | TextureUsage::COPY_SRC
        | TextureUsage::COPY_DST
}

// ============================================================================
// Clears and readback
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_clear_and_readback(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let target = ctx.create_render_target(64, 32);
    let framebuffer = single_target_framebuffer(&ctx, target.clone());
    ctx.clear(&framebuffer, Color::RED);

    let pixels = ctx.read_color(&framebuffer, 0);
    assert_eq!(pixels.len(), 64 * 32 * 4);
    assert_all_texels(&pixels, [255, 0, 0, 255]);
    assert!(target.is_populated());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_clear_multiple_color_attachments(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = ctx
        .device
        .create_framebuffer(
            FramebufferDescriptor::new()
                .with_label("gbuffer")
                .with_color_attachment(ctx.create_render_target(16, 16))
                .with_empty_color_slot()
                .with_color_attachment(ctx.create_render_target(16, 16)),
        )
        .expect("Failed to create framebuffer");

    let pass = RenderPassDescriptor::new()
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::GREEN))
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::WHITE))
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::BLUE));
    ctx.run_pass(&framebuffer, &pass, &Dependencies::new());

    assert_all_texels(&ctx.read_color(&framebuffer, 0), rgba8(Color::GREEN));
    assert_all_texels(&ctx.read_color(&framebuffer, 2), rgba8(Color::BLUE));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_load_preserves_previous_contents(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = single_target_framebuffer(&ctx, ctx.create_render_target(8, 8));
    let gray = Color::new(0.5, 0.5, 0.5, 1.0);
    ctx.clear(&framebuffer, gray);

    let pass = RenderPassDescriptor::new().with_color_attachment(ColorAttachmentDescriptor::load());
    ctx.run_pass(&framebuffer, &pass, &Dependencies::new());

    assert_all_texels(&ctx.read_color(&framebuffer, 0), rgba8(gray));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_clear_selected_layer_only(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let array = ctx
        .device
        .create_texture(&TextureDescriptor::new_2d_array(
            8,
            8,
            3,
            TextureFormat::Rgba8Unorm,
            mip_usage(),
        ))
        .expect("Failed to create array texture");
    let framebuffer = single_target_framebuffer(&ctx, array.clone());

    let everything = TextureRange::full_mip(array.descriptor(), 0);
    let black = vec![0u8; everything.byte_size(array.resolved_format(), 0) as usize];
    array.upload(&everything, &black, 0).expect("Upload failed");

    let pass = RenderPassDescriptor::new()
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED).with_target(0, 1));
    ctx.run_pass(&framebuffer, &pass, &Dependencies::new());

    let layer = |index: u32| {
        ctx.read(
            array.clone(),
            &TextureRange::new_2d(0, 0, 8, 8).with_layers(index, 1),
        )
    };
    assert_all_texels(&layer(0), [0, 0, 0, 0]);
    assert_all_texels(&layer(1), [255, 0, 0, 255]);
    assert_all_texels(&layer(2), [0, 0, 0, 0]);
}

// ============================================================================
// Uploads
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_upload_with_row_padding(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let (width, height) = (10u32, 6u32);
    let texture = ctx.create_render_target(width, height);
    let pattern = generate_test_pattern(width, height);

    let padded_row = 64usize;
    let mut padded = vec![0xAAu8; padded_row * height as usize];
    for (row, chunk) in pattern.chunks_exact(width as usize * 4).enumerate() {
        padded[row * padded_row..row * padded_row + chunk.len()].copy_from_slice(chunk);
    }

    texture
        .upload(
            &TextureRange::new_2d(0, 0, width, height),
            &padded,
            padded_row as u32,
        )
        .expect("Upload failed");

    let framebuffer = single_target_framebuffer(&ctx, texture);
    assert_eq!(ctx.read_color(&framebuffer, 0), pattern);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_partial_upload_and_readback(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let texture = ctx.create_render_target(16, 16);
    let framebuffer = single_target_framebuffer(&ctx, texture.clone());
    ctx.clear(&framebuffer, Color::BLACK);

    let region = TextureRange::new_2d(4, 2, 5, 3);
    let pattern = generate_test_pattern(5, 3);
    texture.upload(&region, &pattern, 0).expect("Upload failed");

    let mut out = vec![0u8; pattern.len()];
    framebuffer
        .copy_bytes_color_attachment(&ctx.queue, 0, &mut out, &region, 0)
        .expect("Readback failed");
    assert_eq!(out, pattern);

    let corner = ctx.read(texture, &TextureRange::new_2d(0, 0, 2, 2));
    assert_all_texels(&corner, [0, 0, 0, 255]);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_invalid_transfers_rejected(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let sampled_only = ctx.create_texture_2d(
        8,
        8,
        TextureFormat::Rgba8Unorm,
        TextureUsage::TEXTURE_BINDING,
    );
    let range = TextureRange::new_2d(0, 0, 8, 8);
    let data = vec![0u8; 8 * 8 * 4];
    assert!(
        sampled_only
            .upload(&range, &data, 0)
            .unwrap_err()
            .is_validation()
    );

    let target = ctx.create_render_target(8, 8);
    assert!(target.upload(&range, &data[..10], 0).unwrap_err().is_validation());
    assert!(
        target
            .upload(&TextureRange::new_2d(4, 4, 8, 8), &data, 0)
            .unwrap_err()
            .is_validation()
    );
    assert!(!target.is_populated());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_rejected_upload_keeps_contents(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let target = ctx.create_render_target(8, 8);
    let full = TextureRange::new_2d(0, 0, 8, 8);
    let pattern = generate_test_pattern(8, 8);
    target.upload(&full, &pattern, 0).expect("Upload failed");

    let overwrite = vec![0xEEu8; 8 * 8 * 4];
    assert!(
        target
            .upload(&TextureRange::new_2d(4, 4, 8, 8), &overwrite, 0)
            .unwrap_err()
            .is_validation()
    );
    assert!(
        target
            .upload(&full.with_mip_levels(1, 1), &overwrite, 0)
            .is_err()
    );

    assert_eq!(ctx.read(target, &full), pattern);
}

// ============================================================================
// Mipmaps
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_generate_mipmaps(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let texture = ctx
        .device
        .create_texture(
            &TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm, mip_usage())
                .with_full_mip_chain()
                .with_label("mipmapped"),
        )
        .expect("Failed to create texture");
    assert_eq!(texture.num_mip_levels(), 5);

    let solid: Vec<u8> = [200u8, 100, 50, 255].repeat(16 * 16);
    texture
        .upload(&TextureRange::new_2d(0, 0, 16, 16), &solid, 0)
        .expect("Upload failed");
    assert!(texture.is_required_generate_mipmap());

    texture
        .generate_mipmap_with_queue(&ctx.queue)
        .expect("Mip generation failed");
    assert!(!texture.is_required_generate_mipmap());

    for mip in 1..texture.num_mip_levels() {
        let range = TextureRange::full_mip(texture.descriptor(), mip);
        assert_all_texels(&ctx.read(texture.clone(), &range), [200, 100, 50, 255]);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_generate_mipmaps_in_command_buffer(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let texture = ctx
        .device
        .create_texture(
            &TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm, mip_usage())
                .with_mip_levels(2),
        )
        .expect("Failed to create texture");
    let framebuffer = single_target_framebuffer(&ctx, texture.clone());

    let mut buffer = ctx.create_command_buffer("mips");
    buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachmentDescriptor::clear(Color::BLUE)),
            &framebuffer,
            &Dependencies::new(),
        )
        .expect("Failed to create encoder")
        .end_encoding();
    assert!(texture.is_required_generate_mipmap());
    texture
        .generate_mipmap(&mut buffer)
        .expect("Failed to record mip generation");
    // Recording alone changes nothing.
    assert!(texture.is_required_generate_mipmap());
    ctx.queue.submit(&mut buffer).expect("Submit failed");
    assert!(!texture.is_required_generate_mipmap());
    buffer.wait_until_completed();

    let range = TextureRange::full_mip(texture.descriptor(), 1);
    assert_all_texels(&ctx.read(texture, &range), [0, 0, 255, 255]);
}

/// The dummy backend downsamples on the CPU and accepts any usage.
#[rstest]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_mipmaps_rejected_without_gpu_usage(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let texture = ctx
        .device
        .create_texture(
            &TextureDescriptor::new_2d(
                8,
                8,
                TextureFormat::Rgba8Unorm,
                TextureUsage::COPY_DST,
            )
            .with_full_mip_chain(),
        )
        .expect("Failed to create texture");
    let err = texture.generate_mipmap_with_queue(&ctx.queue).unwrap_err();
    assert!(err.is_validation(), "unexpected error {err:?}");
}

// ============================================================================
// Dependencies
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_pass_chain_with_dependencies(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let shadow = ctx.create_texture_2d(32, 32, TextureFormat::Rgba8Unorm, mip_usage());
    let shadow_fb = single_target_framebuffer(&ctx, shadow.clone());
    let output = ctx.create_render_target(32, 32);
    let output_fb = single_target_framebuffer(&ctx, output);

    let dependencies = Dependencies::new()
        .with_texture(&shadow)
        .expect("Dependency set is full");
    assert_eq!(dependencies.live_count(), 1);

    let mut buffer = ctx.create_command_buffer("frame");
    buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachmentDescriptor::clear(Color::WHITE)),
            &shadow_fb,
            &Dependencies::new(),
        )
        .expect("Shadow pass failed")
        .end_encoding();
    buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachmentDescriptor::clear(Color::GREEN)),
            &output_fb,
            &dependencies,
        )
        .expect("Main pass failed")
        .end_encoding();
    ctx.queue.submit(&mut buffer).expect("Submit failed");
    buffer.wait_until_completed();

    assert_all_texels(&ctx.read_color(&shadow_fb, 0), [255, 255, 255, 255]);
    assert_all_texels(&ctx.read_color(&output_fb, 0), [0, 255, 0, 255]);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_dependency_on_attachment_rejected(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let target = ctx.create_render_target(8, 8);
    let framebuffer = single_target_framebuffer(&ctx, target.clone());
    let dependencies = Dependencies::new()
        .with_texture(&target)
        .expect("Dependency set is full");

    let mut buffer = ctx.create_command_buffer("feedback");
    let error = buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::for_framebuffer(&framebuffer),
            &framebuffer,
            &dependencies,
        )
        .err();
    assert!(matches!(error, Some(GraphicsError::Validation(_))));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_expired_dependency_is_ignored(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = single_target_framebuffer(&ctx, ctx.create_render_target(8, 8));
    let mut dependencies = Dependencies::new();
    {
        let transient = ctx.create_texture_2d(8, 8, TextureFormat::Rgba8Unorm, mip_usage());
        dependencies.push(&transient).expect("Dependency set is full");
    }
    assert_eq!(dependencies.len(), 1);
    assert_eq!(dependencies.live_count(), 0);

    ctx.run_pass(
        &framebuffer,
        &RenderPassDescriptor::new()
            .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED)),
        &dependencies,
    );
    assert_all_texels(&ctx.read_color(&framebuffer, 0), [255, 0, 0, 255]);
}

// ============================================================================
// Stereo and volumes
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_stereo_clear_writes_both_views(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);
    if !ctx.device.capabilities().multiview {
        eprintln!("Backend {:?} has no multiview, skipping", backend);
        return;
    }

    let eyes = ctx
        .device
        .create_texture(&TextureDescriptor::new_2d_array(
            16,
            16,
            2,
            TextureFormat::Rgba8Unorm,
            mip_usage(),
        ))
        .expect("Failed to create eye texture");
    let framebuffer = ctx
        .device
        .create_framebuffer(
            FramebufferDescriptor::new()
                .with_color_attachment(eyes.clone())
                .with_mode(FramebufferMode::Stereo),
        )
        .expect("Failed to create stereo framebuffer");
    ctx.clear(&framebuffer, Color::GREEN);

    for layer in 0..2 {
        let range = TextureRange::new_2d(0, 0, 16, 16).with_layers(layer, 1);
        assert_all_texels(&ctx.read(eyes.clone(), &range), [0, 255, 0, 255]);
    }
    assert_eq!(eyes.cached_view_count(FramebufferMode::Stereo), 1);
    assert_eq!(eyes.cached_view_count(FramebufferMode::Mono), 0);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_stereo_needs_two_layers(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = ctx
        .device
        .create_framebuffer(
            FramebufferDescriptor::new()
                .with_color_attachment(ctx.create_render_target(8, 8))
                .with_mode(FramebufferMode::Stereo),
        )
        .expect("Failed to create framebuffer");
    let mut buffer = ctx.create_command_buffer("stereo");
    let error = buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::for_framebuffer(&framebuffer),
            &framebuffer,
            &Dependencies::new(),
        )
        .err();
    assert!(error.is_some());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_render_into_volume_slice(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let volume = ctx
        .device
        .create_volume(
            &TextureDescriptor::new_3d(8, 8, 4, TextureFormat::Rgba8Unorm, mip_usage())
                .with_label("volume"),
        )
        .expect("Failed to create volume");
    assert_eq!(ctx.device.volume_count(), 1);

    let everything = TextureRange::new_3d(0, 0, 0, 8, 8, 4);
    let zeros = vec![0u8; 8 * 8 * 4 * 4];
    volume.upload(&everything, &zeros, 0).expect("Upload failed");

    let framebuffer = single_target_framebuffer(&ctx, volume.clone());
    let pass = RenderPassDescriptor::new()
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED).with_target(0, 2));
    ctx.run_pass(&framebuffer, &pass, &Dependencies::new());

    for slice in 0..4 {
        let expected = if slice == 2 { [255, 0, 0, 255] } else { [0, 0, 0, 0] };
        let range = TextureRange::new_3d(0, 0, slice, 8, 8, 1);
        assert_all_texels(&ctx.read(volume.clone(), &range), expected);
    }
}

// ============================================================================
// Encoders and submission
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_submission_status_progression(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = single_target_framebuffer(&ctx, ctx.create_render_target(8, 8));
    let mut buffer = ctx.create_command_buffer("status");
    assert_eq!(buffer.submission_status(), SubmissionStatus::NotSubmitted);
    assert!(!buffer.is_submitted());

    {
        let mut encoder = buffer
            .create_render_command_encoder_without_dependencies(
                &RenderPassDescriptor::for_framebuffer(&framebuffer),
                &framebuffer,
            )
            .expect("Failed to create encoder");
        encoder.set_viewport(Viewport::from_dimensions(8, 8));
        encoder.set_scissor_rect(ScissorRect::from_dimensions(8, 8));
        encoder.set_stencil_reference(1);
        encoder.set_blend_color(Color::WHITE);
        encoder.end_encoding();
    }

    let id = ctx.queue.submit(&mut buffer).expect("Submit failed");
    assert!(buffer.is_submitted());
    assert_eq!(buffer.submission_id(), Some(id));

    buffer.wait_until_scheduled();
    assert!(buffer.submission_status() >= SubmissionStatus::Scheduled);
    buffer.wait_until_completed();
    assert_eq!(buffer.submission_status(), SubmissionStatus::Completed);

    // Waiting again returns immediately.
    buffer.wait_until_completed();

    let error = buffer
        .create_render_command_encoder_without_dependencies(
            &RenderPassDescriptor::for_framebuffer(&framebuffer),
            &framebuffer,
        )
        .err();
    assert!(error.is_some());
    assert!(ctx.queue.submit(&mut buffer).is_err());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_draws_and_statistics(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = single_target_framebuffer(&ctx, ctx.create_render_target(8, 8));
    let mut buffer = ctx.create_command_buffer("draws");
    {
        let mut encoder = buffer
            .create_render_command_encoder_without_dependencies(
                &RenderPassDescriptor::for_framebuffer(&framebuffer),
                &framebuffer,
            )
            .expect("Failed to create encoder");
        encoder.push_debug_group_label("geometry", Color::GREEN);
        encoder.bind_render_pipeline(NativeRenderPipeline::Dummy("triangles".to_string()));
        encoder.draw(3, 1, 0, 0);
        encoder.draw(6, 2, 0, 0);
        encoder.pop_debug_group_label();
        encoder.end_encoding();
    }
    assert_eq!(buffer.current_draw_count(), 2);

    buffer.push_debug_group_label("compute", Color::BLUE);
    {
        let mut compute = buffer
            .create_compute_command_encoder_with_label("cull")
            .expect("Failed to create compute encoder");
        compute.dispatch_thread_groups(4, 4, 1);
        compute.end_encoding();
    }
    assert_eq!(buffer.debug_group_depth(), 1);
    buffer.pop_debug_group_label();
    assert_eq!(buffer.debug_group_depth(), 0);

    ctx.queue.submit(&mut buffer).expect("Submit failed");
    buffer.wait_until_completed();

    let stats = ctx.queue.statistics();
    assert_eq!(stats.submitted_command_buffers, 1);
    assert_eq!(stats.draw_calls, 2);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_pass_must_match_framebuffer_slots(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = single_target_framebuffer(&ctx, ctx.create_render_target(8, 8));
    let mut buffer = ctx.create_command_buffer("mismatch");
    let error = buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::new(),
            &framebuffer,
            &Dependencies::new(),
        )
        .err();
    assert!(matches!(error, Some(GraphicsError::Validation(_))));

    let error = buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED).with_target(1, 0)),
            &framebuffer,
            &Dependencies::new(),
        )
        .err();
    assert!(error.is_some());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_many_submissions_then_idle(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = single_target_framebuffer(&ctx, ctx.create_render_target(16, 16));
    let colors = [Color::RED, Color::GREEN, Color::BLUE, Color::WHITE];
    let mut buffers = Vec::new();
    for (frame, color) in colors.iter().enumerate() {
        let mut buffer = ctx.create_command_buffer(&format!("frame {frame}"));
        buffer
            .create_render_command_encoder(
                &RenderPassDescriptor::new()
                    .with_color_attachment(ColorAttachmentDescriptor::clear(*color)),
                &framebuffer,
                &Dependencies::new(),
            )
            .expect("Failed to create encoder")
            .end_encoding();
        ctx.queue.submit(&mut buffer).expect("Submit failed");
        buffers.push(buffer);
    }

    ctx.queue.wait_idle().expect("wait_idle failed");
    for buffer in &buffers {
        assert_eq!(buffer.submission_status(), SubmissionStatus::Completed);
    }
    assert_all_texels(&ctx.read_color(&framebuffer, 0), [255, 255, 255, 255]);
    assert_eq!(ctx.queue.statistics().submitted_command_buffers, 4);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_attachment_dropped_while_in_flight(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let mut buffer = ctx.create_command_buffer("in flight");
    {
        let target = ctx.create_render_target(64, 64);
        let framebuffer = single_target_framebuffer(&ctx, target);
        buffer
            .create_render_command_encoder(
                &RenderPassDescriptor::new()
                    .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED)),
                &framebuffer,
                &Dependencies::new(),
            )
            .expect("Failed to create encoder")
            .end_encoding();
    }
    ctx.queue.submit(&mut buffer).expect("Submit failed");
    buffer.wait_until_completed();
    ctx.device.wait_idle().expect("wait_idle failed");
}

// ============================================================================
// Framebuffers
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_depth_attachment_pass(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let color = ctx.create_render_target(16, 16);
    let depth = ctx.create_texture_2d(
        16,
        16,
        TextureFormat::Depth32Float,
        TextureUsage::RENDER_ATTACHMENT,
    );
    let framebuffer = ctx
        .device
        .create_framebuffer(
            FramebufferDescriptor::new()
                .with_color_attachment(color)
                .with_depth_attachment(depth.clone()),
        )
        .expect("Failed to create framebuffer");

    let pass = RenderPassDescriptor::for_framebuffer(&framebuffer);
    assert_eq!(pass.color_attachments.len(), 1);
    ctx.run_pass(&framebuffer, &pass, &Dependencies::new());
    assert!(depth.is_populated());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_mismatched_attachment_sizes_rejected(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let framebuffer = ctx
        .device
        .create_framebuffer(
            FramebufferDescriptor::new()
                .with_color_attachment(ctx.create_render_target(16, 16))
                .with_color_attachment(ctx.create_render_target(8, 8)),
        )
        .expect("Failed to create framebuffer");

    let mut buffer = ctx.create_command_buffer("mismatch");
    let error = buffer
        .create_render_command_encoder(
            &RenderPassDescriptor::for_framebuffer(&framebuffer),
            &framebuffer,
            &Dependencies::new(),
        )
        .err();
    assert!(matches!(error, Some(GraphicsError::Validation(_))));
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_update_drawable_redirects_rendering(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let first = ctx.create_render_target(8, 8);
    let second = ctx.create_render_target(8, 8);
    let framebuffer = single_target_framebuffer(&ctx, first.clone());
    ctx.clear(&framebuffer, Color::RED);

    framebuffer
        .update_drawable(second.clone() as Arc<dyn TextureResource>)
        .expect("Failed to swap drawable");
    ctx.clear(&framebuffer, Color::BLUE);

    assert_all_texels(
        &ctx.read(first, &TextureRange::new_2d(0, 0, 8, 8)),
        [255, 0, 0, 255],
    );
    assert_all_texels(
        &ctx.read(second, &TextureRange::new_2d(0, 0, 8, 8)),
        [0, 0, 255, 255],
    );
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_surface_textures_swap(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let depth_texture = |size| {
        ctx.create_texture_2d(
            size,
            size,
            TextureFormat::Depth32Float,
            TextureUsage::RENDER_ATTACHMENT,
        )
    };
    let framebuffer = ctx
        .device
        .create_framebuffer(
            FramebufferDescriptor::new()
                .with_color_attachment(ctx.create_render_target(8, 8))
                .with_depth_attachment(depth_texture(8)),
        )
        .expect("Failed to create framebuffer");

    let color = ctx.create_render_target(8, 8);
    let depth = depth_texture(8);
    framebuffer
        .update_surface_textures(SurfaceTextures::new(color.clone()).with_depth(depth.clone()))
        .expect("Failed to swap surface textures");

    let pass = RenderPassDescriptor::new()
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::GREEN))
        .with_depth_attachment(Default::default());
    ctx.run_pass(&framebuffer, &pass, &Dependencies::new());
    assert!(depth.is_populated());
    assert_all_texels(
        &ctx.read(color, &TextureRange::new_2d(0, 0, 8, 8)),
        rgba8(Color::GREEN),
    );

    let rejected = framebuffer.update_surface_textures(
        SurfaceTextures::new(ctx.create_render_target(8, 8)).with_depth(depth_texture(4)),
    );
    assert!(rejected.is_err());
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
#[case::webgpu(Backend::WebGpu)]
fn test_copy_color_attachment_to_texture(#[case] backend: Backend) {
    let ctx = context_or_skip!(backend);

    let source = ctx.create_render_target(8, 8);
    let pattern = generate_test_pattern(8, 8);
    source
        .upload(&TextureRange::new_2d(0, 0, 8, 8), &pattern, 0)
        .expect("Upload failed");
    let framebuffer = single_target_framebuffer(&ctx, source);

    let destination = ctx.create_render_target(8, 8);
    framebuffer
        .copy_texture_color_attachment(
            &ctx.queue,
            0,
            &destination,
            &TextureRange::new_2d(0, 0, 8, 8),
        )
        .expect("Copy failed");
    assert!(destination.is_populated());
    assert_eq!(
        ctx.read(destination, &TextureRange::new_2d(0, 0, 8, 8)),
        pattern
    );

    let sampled_only = ctx.create_texture_2d(
        8,
        8,
        TextureFormat::Rgba8Unorm,
        TextureUsage::TEXTURE_BINDING,
    );
    let error = framebuffer
        .copy_texture_color_attachment(
            &ctx.queue,
            0,
            &sampled_only,
            &TextureRange::new_2d(0, 0, 8, 8),
        )
        .err();
    assert!(matches!(error, Some(GraphicsError::Validation(_))));
    assert!(!sampled_only.is_populated());
}
