//! Mip chain generation for the wgpu backend.
//!
//! wgpu has no blit, so every level is rendered from the previous one with a
//! fullscreen triangle. The shader averages a 2x2 texel footprint with
//! `textureLoad`, which works for filterable and non-filterable float formats
//! alike and needs no sampler.

use std::collections::HashMap;
use std::sync::Mutex;

const DOWNSAMPLE_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let last = vec2<i32>(textureDimensions(source)) - vec2<i32>(1, 1);
    let base = vec2<i32>(position.xy) * 2;
    let a = textureLoad(source, min(base, last), 0);
    let b = textureLoad(source, min(base + vec2<i32>(1, 0), last), 0);
    let c = textureLoad(source, min(base + vec2<i32>(0, 1), last), 0);
    let d = textureLoad(source, min(base + vec2<i32>(1, 1), last), 0);
    return (a + b + c + d) * 0.25;
}
"#;

/// Shared shader state plus one pipeline per target format.
pub(super) struct MipmapGenerator {
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Mutex<HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>>,
}

impl MipmapGenerator {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mipmap Downsample"),
            source: wgpu::ShaderSource::Wgsl(DOWNSAMPLE_SHADER.into()),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mipmap Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mipmap Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        Self {
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `format` can be downsampled by this generator.
    pub fn supports_format(format: wgpu::TextureFormat) -> bool {
        matches!(
            format.sample_type(None, None),
            Some(wgpu::TextureSampleType::Float { .. })
        ) && !format.is_depth_stencil_format()
    }

    fn pipeline(&self, device: &wgpu::Device, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        let mut pipelines = self
            .pipelines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        pipelines
            .entry(format)
            .or_insert_with(|| {
                log::debug!("wgpu: creating mipmap pipeline for {:?}", format);
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Mipmap Pipeline"),
                    layout: Some(&self.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &self.shader,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &self.shader,
                        entry_point: Some("fs_main"),
                        targets: &[Some(format.into())],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                })
            })
            .clone()
    }

    /// Record the downsampling of every layer of `texture` from mip 0.
    pub fn encode(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
    ) {
        crate::profile_scope!("wgpu_generate_mips");
        let pipeline = self.pipeline(device, texture.format());
        let layers = match texture.dimension() {
            wgpu::TextureDimension::D3 => 1,
            _ => texture.depth_or_array_layers(),
        };

        let level_view = |mip: u32, layer: u32| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Mipmap Level"),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_mip_level: mip,
                mip_level_count: Some(1),
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..Default::default()
            })
        };

        for layer in 0..layers {
            for mip in 1..texture.mip_level_count() {
                let source = level_view(mip - 1, layer);
                let target = level_view(mip, layer);
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Mipmap Bind Group"),
                    layout: &self.bind_group_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source),
                    }],
                });

                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Mipmap Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
                pass.set_pipeline(&pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_formats() {
        assert!(MipmapGenerator::supports_format(wgpu::TextureFormat::Rgba8Unorm));
        assert!(MipmapGenerator::supports_format(wgpu::TextureFormat::R32Float));
        assert!(!MipmapGenerator::supports_format(wgpu::TextureFormat::R8Uint));
        assert!(!MipmapGenerator::supports_format(wgpu::TextureFormat::Depth32Float));
    }
}
