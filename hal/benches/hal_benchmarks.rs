use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_hal::{
    BackendType, Color, ColorAttachmentDescriptor, CommandBufferDescriptor, CommandQueue,
    CommandQueueDescriptor, Dependencies, Framebuffer, FramebufferDescriptor, GraphicsDevice,
    GraphicsInstance, InstanceParameters, NativeRenderPipeline, RenderPassDescriptor,
    TextureDescriptor, TextureFormat, TextureRange, TextureResource, TextureUsage,
};

fn dummy_device() -> Arc<GraphicsDevice> {
    let instance = GraphicsInstance::with_parameters(
        InstanceParameters::new().with_backend(BackendType::Dummy),
    )
    .unwrap();
    instance.create_device().unwrap()
}

fn render_target(device: &Arc<GraphicsDevice>, size: u32) -> Arc<Framebuffer> {
    let texture = device
        .create_texture(&TextureDescriptor::new_2d(
            size,
            size,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        ))
        .unwrap();
    device
        .create_framebuffer(FramebufferDescriptor::new().with_color_attachment(texture))
        .unwrap()
}

fn queue(device: &Arc<GraphicsDevice>) -> Arc<CommandQueue> {
    device
        .create_command_queue(CommandQueueDescriptor::new())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Resource creation
// ---------------------------------------------------------------------------

fn bench_dummy_create_texture(c: &mut Criterion) {
    let device = dummy_device();

    c.bench_function("dummy_create_texture_256x256", |b| {
        b.iter(|| {
            black_box(
                device
                    .create_texture(&TextureDescriptor::new_2d(
                        256,
                        256,
                        TextureFormat::Rgba8Unorm,
                        TextureUsage::TEXTURE_BINDING,
                    ))
                    .unwrap(),
            );
        });
    });
}

fn bench_dummy_framebuffer_view_cache(c: &mut Criterion) {
    let device = dummy_device();
    let texture = device
        .create_texture(
            &TextureDescriptor::new_2d_array(
                64,
                64,
                8,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_ATTACHMENT,
            )
            .with_full_mip_chain(),
        )
        .unwrap();

    c.bench_function("dummy_framebuffer_view_cached_lookup", |b| {
        b.iter(|| {
            for layer in 0..8 {
                black_box(
                    texture
                        .framebuffer_view(1, layer, Default::default())
                        .unwrap(),
                );
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Command recording
// ---------------------------------------------------------------------------

fn bench_record_render_pass(c: &mut Criterion) {
    let device = dummy_device();
    let queue = queue(&device);
    let framebuffer = render_target(&device, 64);
    let pass = RenderPassDescriptor::new()
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::BLACK));

    c.bench_function("record_render_pass_100_draws", |b| {
        b.iter(|| {
            let mut buffer = queue
                .create_command_buffer(CommandBufferDescriptor::new())
                .unwrap();
            {
                let mut encoder = buffer
                    .create_render_command_encoder(&pass, &framebuffer, &Dependencies::new())
                    .unwrap();
                encoder.bind_render_pipeline(NativeRenderPipeline::Dummy("bench".into()));
                for i in 0..100 {
                    encoder.draw(3, 1, i * 3, 0);
                }
            }
            black_box(buffer.current_draw_count());
        });
    });
}

fn bench_record_with_dependencies(c: &mut Criterion) {
    let device = dummy_device();
    let queue = queue(&device);
    let framebuffer = render_target(&device, 64);
    let inputs: Vec<_> = (0..4)
        .map(|_| {
            device
                .create_texture(&TextureDescriptor::new_2d(
                    64,
                    64,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::TEXTURE_BINDING,
                ))
                .unwrap()
        })
        .collect();
    let pass = RenderPassDescriptor::for_framebuffer(&framebuffer);

    c.bench_function("record_render_pass_4_dependencies", |b| {
        b.iter(|| {
            let mut dependencies = Dependencies::new();
            for input in &inputs {
                dependencies.push(input).unwrap();
            }
            let mut buffer = queue
                .create_command_buffer(CommandBufferDescriptor::new())
                .unwrap();
            buffer
                .create_render_command_encoder(&pass, &framebuffer, &dependencies)
                .unwrap()
                .end_encoding();
            black_box(&buffer);
        });
    });
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

fn bench_dummy_submit_and_wait(c: &mut Criterion) {
    let device = dummy_device();
    let queue = queue(&device);
    let framebuffer = render_target(&device, 256);
    let pass = RenderPassDescriptor::new()
        .with_color_attachment(ColorAttachmentDescriptor::clear(Color::RED));

    c.bench_function("dummy_submit_clear_256x256", |b| {
        b.iter_with_setup(
            || {
                let mut buffer = queue
                    .create_command_buffer(CommandBufferDescriptor::new())
                    .unwrap();
                buffer
                    .create_render_command_encoder(&pass, &framebuffer, &Dependencies::new())
                    .unwrap()
                    .end_encoding();
                buffer
            },
            |mut buffer| {
                queue.submit(&mut buffer).unwrap();
                buffer.wait_until_completed();
            },
        );
    });
}

fn bench_dummy_upload(c: &mut Criterion) {
    let device = dummy_device();
    let texture = device
        .create_texture(&TextureDescriptor::new_2d(
            256,
            256,
            TextureFormat::Rgba8Unorm,
            TextureUsage::COPY_DST,
        ))
        .unwrap();
    let data = vec![0x7Fu8; 256 * 256 * 4];
    let range = TextureRange::new_2d(0, 0, 256, 256);

    c.bench_function("dummy_upload_256x256", |b| {
        b.iter(|| texture.upload(&range, black_box(&data), 0).unwrap());
    });
}

criterion_group!(
    benches,
    bench_dummy_create_texture,
    bench_dummy_framebuffer_view_cache,
    bench_record_render_pass,
    bench_record_with_dependencies,
    bench_dummy_submit_and_wait,
    bench_dummy_upload,
);
criterion_main!(benches);
