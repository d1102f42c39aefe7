//! Translation of a recorded submission into a wgpu command encoder.
//!
//! wgpu tracks resource states itself, so pass dependencies need no explicit
//! barriers here.

use std::num::NonZeroU32;

use crate::backend::GpuTextureView;
use crate::command::recording::{
    AttachmentTarget, ComputeCommand, RecordedCommand, RecordedComputePass, RecordedRenderPass,
    RenderCommand, Submission, TextureCopy,
};
use crate::command::{NativeComputePipeline, NativeRenderPipeline};
use crate::framebuffer::MAX_COLOR_ATTACHMENTS;
use crate::types::{ScissorRect, Viewport};

use super::WgpuBackend;
use super::conversion::{convert_color, convert_load_op, convert_store_op};
use super::resources::copy_region;

/// Views 0 and 1 of a stereo pass.
const STEREO_VIEW_MASK: u32 = 0b11;

fn native_view(target: &AttachmentTarget) -> Option<(wgpu::TextureView, Option<u32>)> {
    target
        .view
        .with_native(|native| match native {
            GpuTextureView::Wgpu { view, depth_slice } => Some((view.clone(), *depth_slice)),
            #[allow(unreachable_patterns)]
            _ => None,
        })
        .flatten()
}

/// wgpu requires viewports inside the render target.
fn clamped_viewport(viewport: &Viewport, width: u32, height: u32) -> Viewport {
    let x = viewport.x.clamp(0.0, width as f32);
    let y = viewport.y.clamp(0.0, height as f32);
    Viewport {
        x,
        y,
        width: (viewport.x + viewport.width).clamp(x, width as f32) - x,
        height: (viewport.y + viewport.height).clamp(y, height as f32) - y,
        min_depth: viewport.min_depth.clamp(0.0, 1.0),
        max_depth: viewport.max_depth.clamp(0.0, 1.0),
    }
}

/// Scissor intersected with the render target, as `(x, y, width, height)`.
fn clamped_scissor(rect: &ScissorRect, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let clip = |offset: i32, len: u32, max: u32| {
        let start = (offset.max(0) as u32).min(max);
        let end = (offset as i64 + len as i64).clamp(0, max as i64) as u32;
        (start, end.saturating_sub(start))
    };
    let (x, w) = clip(rect.x, rect.width, width);
    let (y, h) = clip(rect.y, rect.height, height);
    (x, y, w, h)
}

impl WgpuBackend {
    /// Record every command of `submission` into `encoder`.
    pub(super) fn encode_submission(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        submission: &Submission,
    ) {
        crate::profile_scope!("wgpu_encode_submission");

        if let Some(label) = &submission.label {
            encoder.push_debug_group(label);
        }

        for command in &submission.commands {
            match command {
                RecordedCommand::RenderPass(pass) => self.encode_render_pass(encoder, pass),
                RecordedCommand::ComputePass(pass) => encode_compute_pass(encoder, pass),
                RecordedCommand::PushDebugGroup { label, .. } => encoder.push_debug_group(label),
                RecordedCommand::PopDebugGroup => encoder.pop_debug_group(),
                RecordedCommand::GenerateMipmaps(texture) => {
                    if let Some(native) = texture.gpu().wgpu_texture() {
                        self.mipmaps.encode(&self.device, encoder, native);
                    }
                }
                RecordedCommand::CopyTexture(copy) => encode_copy_texture(encoder, copy),
            }
        }

        if submission.label.is_some() {
            encoder.pop_debug_group();
        }
    }

    fn encode_render_pass(&self, encoder: &mut wgpu::CommandEncoder, pass: &RecordedRenderPass) {
        crate::profile_scope!("wgpu_render_pass");

        if !pass.dependencies.is_empty() {
            log::trace!(
                "wgpu: {:?} reads {} dependencies",
                pass.descriptor.label,
                pass.dependencies.len()
            );
        }

        if pass.depth_resolve_target.is_some() {
            log::warn!(
                "wgpu: {:?} has a depth resolve target, wgpu cannot resolve depth",
                pass.descriptor.label
            );
        }

        // Owned views first; attachments borrow them below.
        let color_views: Vec<Option<(wgpu::TextureView, Option<u32>)>> = pass
            .color_targets
            .iter()
            .map(|target| target.as_ref().and_then(native_view))
            .collect();
        let resolve_views: Vec<Option<wgpu::TextureView>> = pass
            .resolve_targets
            .iter()
            .map(|target| target.as_ref().and_then(native_view).map(|(view, _)| view))
            .collect();
        let depth_stencil_target = pass.depth_target.as_ref().or(pass.stencil_target.as_ref());
        let depth_stencil_view = depth_stencil_target.and_then(native_view);

        let mut color_attachments = [const { None }; MAX_COLOR_ATTACHMENTS];
        let color_count = pass
            .descriptor
            .color_attachments
            .len()
            .min(MAX_COLOR_ATTACHMENTS);
        for (index, attachment) in pass
            .descriptor
            .color_attachments
            .iter()
            .enumerate()
            .take(color_count)
        {
            let Some(Some((view, depth_slice))) = color_views.get(index) else {
                continue;
            };
            color_attachments[index] = Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: resolve_views.get(index).and_then(Option::as_ref),
                ops: wgpu::Operations {
                    load: convert_load_op(attachment.load_op, convert_color(attachment.clear_color)),
                    store: convert_store_op(attachment.store_op),
                },
                depth_slice: *depth_slice,
            });
        }
        let color_attachments = &color_attachments[..color_count];

        let depth = &pass.descriptor.depth_attachment;
        let stencil = &pass.descriptor.stencil_attachment;
        let depth_stencil_attachment =
            depth_stencil_view
                .as_ref()
                .map(|(view, _)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: pass
                        .depth_target
                        .as_ref()
                        .filter(|target| target.texture.format().has_depth())
                        .map(|_| wgpu::Operations {
                            load: convert_load_op(depth.load_op, depth.clear_depth),
                            store: convert_store_op(depth.store_op),
                        }),
                    stencil_ops: pass
                        .stencil_target
                        .as_ref()
                        .filter(|target| target.texture.format().has_stencil())
                        .map(|_| wgpu::Operations {
                            load: convert_load_op(stencil.load_op, stencil.clear_stencil),
                            store: convert_store_op(stencil.store_op),
                        }),
                });

        if color_attachments.iter().all(Option::is_none) && depth_stencil_attachment.is_none() {
            log::warn!(
                "wgpu: render pass {:?} has no native attachments, skipped",
                pass.descriptor.label
            );
            return;
        }

        let multiview_mask = if pass.stereo {
            NonZeroU32::new(STEREO_VIEW_MASK)
        } else {
            None
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: pass.descriptor.label.as_deref(),
            color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask,
        });

        let (width, height) = (pass.width, pass.height);
        let mut pipeline_bound = false;
        let mut skipped_draws = 0u32;
        for command in &pass.commands {
            match command {
                RenderCommand::SetViewport(viewport) => {
                    let vp = clamped_viewport(viewport, width, height);
                    render_pass.set_viewport(
                        vp.x,
                        vp.y,
                        vp.width,
                        vp.height,
                        vp.min_depth,
                        vp.max_depth,
                    );
                }
                RenderCommand::SetScissorRect(rect) => {
                    let (x, y, w, h) = clamped_scissor(rect, width, height);
                    render_pass.set_scissor_rect(x, y, w, h);
                }
                RenderCommand::SetStencilReference(reference) => {
                    render_pass.set_stencil_reference(*reference)
                }
                RenderCommand::SetBlendColor(color) => {
                    render_pass.set_blend_constant(convert_color(*color))
                }
                RenderCommand::BindPipeline(pipeline) => match pipeline {
                    NativeRenderPipeline::Wgpu(pipeline) => {
                        render_pass.set_pipeline(pipeline);
                        pipeline_bound = true;
                    }
                    #[allow(unreachable_patterns)]
                    other => {
                        log::warn!("wgpu: ignoring non-wgpu render pipeline {:?}", other);
                        pipeline_bound = false;
                    }
                },
                RenderCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => {
                    if pipeline_bound {
                        render_pass.draw(
                            *first_vertex..first_vertex + vertex_count,
                            *first_instance..first_instance + instance_count,
                        );
                    } else {
                        skipped_draws += 1;
                    }
                }
                RenderCommand::PushDebugGroup { label, .. } => render_pass.push_debug_group(label),
                RenderCommand::PopDebugGroup => render_pass.pop_debug_group(),
                RenderCommand::InsertDebugMarker { label, .. } => {
                    render_pass.insert_debug_marker(label)
                }
            }
        }
        if skipped_draws > 0 {
            log::warn!(
                "wgpu: skipped {} draws in {:?} without a wgpu pipeline",
                skipped_draws,
                pass.descriptor.label
            );
        }
    }
}

fn encode_compute_pass(encoder: &mut wgpu::CommandEncoder, pass: &RecordedComputePass) {
    crate::profile_scope!("wgpu_compute_pass");

    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: pass.label.as_deref(),
        timestamp_writes: None,
    });

    let mut pipeline_bound = false;
    let mut skipped_dispatches = 0u32;
    for command in &pass.commands {
        match command {
            ComputeCommand::BindPipeline(pipeline) => match pipeline {
                NativeComputePipeline::Wgpu(pipeline) => {
                    compute_pass.set_pipeline(pipeline);
                    pipeline_bound = true;
                }
                #[allow(unreachable_patterns)]
                other => {
                    log::warn!("wgpu: ignoring non-wgpu compute pipeline {:?}", other);
                    pipeline_bound = false;
                }
            },
            ComputeCommand::Dispatch { x, y, z } => {
                if pipeline_bound {
                    compute_pass.dispatch_workgroups(*x, *y, *z);
                } else {
                    skipped_dispatches += 1;
                }
            }
            ComputeCommand::PushDebugGroup { label, .. } => compute_pass.push_debug_group(label),
            ComputeCommand::PopDebugGroup => compute_pass.pop_debug_group(),
            ComputeCommand::InsertDebugMarker { label, .. } => {
                compute_pass.insert_debug_marker(label)
            }
        }
    }
    if skipped_dispatches > 0 {
        log::warn!(
            "wgpu: skipped {} dispatches in {:?} without a wgpu pipeline",
            skipped_dispatches,
            pass.label
        );
    }
}

fn encode_copy_texture(encoder: &mut wgpu::CommandEncoder, copy: &TextureCopy) {
    let (Some(source), Some(destination)) = (
        copy.source.gpu().wgpu_texture(),
        copy.destination.gpu().wgpu_texture(),
    ) else {
        log::warn!("wgpu: texture copy between non-wgpu textures skipped");
        return;
    };
    let (origin, extent) = copy_region(&copy.range, copy.source.descriptor().texture_type, 0);
    encoder.copy_texture_to_texture(
        wgpu::TexelCopyTextureInfo {
            texture: source,
            mip_level: copy.range.mip_level,
            origin,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyTextureInfo {
            texture: destination,
            mip_level: copy.range.mip_level,
            origin,
            aspect: wgpu::TextureAspect::All,
        },
        extent,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_is_clamped_to_target() {
        let vp = clamped_viewport(&Viewport::new(-10.0, 0.0, 100.0, 300.0), 64, 64);
        assert_eq!(vp.x, 0.0);
        assert_eq!(vp.width, 64.0);
        assert_eq!(vp.height, 64.0);
    }

    #[test]
    fn test_scissor_is_intersected() {
        assert_eq!(
            clamped_scissor(&ScissorRect::new(-4, 2, 10, 100), 32, 32),
            (0, 2, 6, 30)
        );
        assert_eq!(
            clamped_scissor(&ScissorRect::new(40, 40, 10, 10), 32, 32),
            (32, 32, 0, 0)
        );
    }
}
