//! Translation of a recorded submission into a Vulkan command buffer.
//!
//! Render passes use dynamic rendering. Attachments move into their
//! attachment layout when a pass begins and back to their resting layout
//! when it ends, so textures read by later passes are always shader-readable.

use ash::vk;

use crate::backend::{GpuTexture, GpuTextureView};
use crate::command::recording::{
    AttachmentTarget, ComputeCommand, RecordedCommand, RecordedComputePass, RecordedRenderPass,
    RenderCommand, Submission, TextureCopy,
};
use crate::command::{NativeComputePipeline, NativeRenderPipeline};
use crate::resources::TextureStorage;
use crate::types::{ScissorRect, Viewport};

use super::VulkanBackend;
use super::barriers::BarrierBatch;
use super::conversion::{
    clear_color_value, clear_depth_stencil_value, convert_load_op, convert_store_op, resolve_mode,
};
use super::layout::TextureLayout;
use super::texture::VulkanImage;

/// Views 0 and 1 of a stereo pass.
const STEREO_VIEW_MASK: u32 = 0b11;

pub(super) fn vulkan_image(texture: &TextureStorage) -> Option<&VulkanImage> {
    match texture.gpu() {
        GpuTexture::Vulkan(image) => Some(image),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn native_view(target: &AttachmentTarget) -> vk::ImageView {
    target
        .view
        .with_native(|native| match native {
            GpuTextureView::Vulkan { view, .. } => *view,
            #[allow(unreachable_patterns)]
            _ => vk::ImageView::null(),
        })
        .unwrap_or(vk::ImageView::null())
}

/// Viewport with Y flipped so that +Y points up, matching the other backends.
fn flipped_viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y + viewport.height,
        width: viewport.width,
        height: -viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

/// Vulkan rejects negative scissor offsets; clip them away instead.
fn clamped_scissor(rect: &ScissorRect) -> vk::Rect2D {
    let x = rect.x.max(0);
    let y = rect.y.max(0);
    let width = rect.width.saturating_sub((x - rect.x) as u32);
    let height = rect.height.saturating_sub((y - rect.y) as u32);
    vk::Rect2D {
        offset: vk::Offset2D { x, y },
        extent: vk::Extent2D { width, height },
    }
}

impl VulkanBackend {
    /// Record every command of `submission` into `cmd`.
    pub(super) fn record_submission(&self, cmd: vk::CommandBuffer, submission: &Submission) {
        crate::profile_scope!("vulkan_record_submission");

        if let Some(label) = &submission.label {
            self.labels.begin(cmd, label, crate::types::Color::WHITE);
        }

        for command in &submission.commands {
            match command {
                RecordedCommand::RenderPass(pass) => self.record_render_pass(cmd, pass),
                RecordedCommand::ComputePass(pass) => self.record_compute_pass(cmd, pass),
                RecordedCommand::PushDebugGroup { label, color } => {
                    self.labels.begin(cmd, label, *color)
                }
                RecordedCommand::PopDebugGroup => self.labels.end(cmd),
                RecordedCommand::GenerateMipmaps(texture) => {
                    if let Some(image) = vulkan_image(texture) {
                        let linear = self.supports_linear_blit(image.hal_format());
                        image.record_generate_mips(cmd, linear);
                    }
                }
                RecordedCommand::CopyTexture(copy) => self.record_copy_texture(cmd, copy),
            }
        }

        if let Some(texture) = &submission.present
            && let Some(image) = vulkan_image(texture)
        {
            let mut barriers = BarrierBatch::new();
            barriers.add_image_barrier(
                image.image(),
                image.layout(),
                TextureLayout::PresentSrc,
                image.aspect(),
            );
            barriers.submit(&self.device, cmd);
            image.set_layout(TextureLayout::PresentSrc);
        }

        if submission.label.is_some() {
            self.labels.end(cmd);
        }
    }

    fn record_render_pass(&self, cmd: vk::CommandBuffer, pass: &RecordedRenderPass) {
        crate::profile_scope!("vulkan_render_pass");
        let device = &self.device;

        let label = pass.descriptor.label.as_deref().unwrap_or("render pass");
        self.labels.begin(cmd, label, crate::types::Color::BLUE);

        // Every image written by the pass, deduplicated (depth and stencil
        // may share one texture).
        let mut attachments: Vec<&VulkanImage> = Vec::new();
        let all_targets = pass
            .color_targets
            .iter()
            .chain(pass.resolve_targets.iter())
            .flatten()
            .chain(pass.depth_target.iter())
            .chain(pass.depth_resolve_target.iter())
            .chain(pass.stencil_target.iter());
        for target in all_targets {
            if let Some(image) = vulkan_image(&target.texture)
                && !attachments.iter().any(|a| a.image() == image.image())
            {
                attachments.push(image);
            }
        }

        let mut barriers = BarrierBatch::new();
        for dependency in &pass.dependencies {
            if let Some(image) = vulkan_image(dependency) {
                barriers.add_dependency_barrier(
                    image.image(),
                    image.layout(),
                    image.resting_layout(),
                    image.aspect(),
                );
                image.set_layout(image.resting_layout());
            }
        }
        for image in &attachments {
            let target = TextureLayout::attachment(image.hal_format().is_depth_stencil());
            barriers.add_image_barrier(image.image(), image.layout(), target, image.aspect());
            image.set_layout(target);
        }
        barriers.submit(device, cmd);

        let color_infos: Vec<vk::RenderingAttachmentInfo> = pass
            .descriptor
            .color_attachments
            .iter()
            .enumerate()
            .map(|(index, attachment)| {
                let Some(Some(target)) = pass.color_targets.get(index) else {
                    return vk::RenderingAttachmentInfo::default()
                        .image_view(vk::ImageView::null());
                };
                let format = target.texture.format();
                let mut info = vk::RenderingAttachmentInfo::default()
                    .image_view(native_view(target))
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(convert_load_op(attachment.load_op))
                    .store_op(convert_store_op(attachment.store_op))
                    .clear_value(clear_color_value(format, attachment.clear_color));
                if let Some(Some(resolve)) = pass.resolve_targets.get(index) {
                    info = info
                        .resolve_mode(resolve_mode(format))
                        .resolve_image_view(native_view(resolve))
                        .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                }
                info
            })
            .collect();

        let depth = &pass.descriptor.depth_attachment;
        let depth_info = pass.depth_target.as_ref().map(|target| {
            let info = vk::RenderingAttachmentInfo::default()
                .image_view(native_view(target))
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(convert_load_op(depth.load_op))
                .store_op(convert_store_op(depth.store_op))
                .clear_value(clear_depth_stencil_value(depth.clear_depth, 0));
            match &pass.depth_resolve_target {
                // Sample zero is the one depth resolve mode every device supports.
                Some(resolve) => info
                    .resolve_mode(vk::ResolveModeFlags::SAMPLE_ZERO)
                    .resolve_image_view(native_view(resolve))
                    .resolve_image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
                None => info,
            }
        });

        let stencil = &pass.descriptor.stencil_attachment;
        let stencil_info = pass.stencil_target.as_ref().map(|target| {
            vk::RenderingAttachmentInfo::default()
                .image_view(native_view(target))
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(convert_load_op(stencil.load_op))
                .store_op(convert_store_op(stencil.store_op))
                .clear_value(clear_depth_stencil_value(0.0, stencil.clear_stencil))
        });

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: pass.width,
                height: pass.height,
            },
        };

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .color_attachments(&color_infos);
        rendering_info = match (pass.stereo, self.features.multiview) {
            (true, true) => rendering_info.view_mask(STEREO_VIEW_MASK).layer_count(1),
            (true, false) => rendering_info.layer_count(2),
            (false, _) => rendering_info.layer_count(1),
        };
        if let Some(depth_info) = &depth_info {
            rendering_info = rendering_info.depth_attachment(depth_info);
        }
        if let Some(stencil_info) = &stencil_info {
            rendering_info = rendering_info.stencil_attachment(stencil_info);
        }

        self.rendering.begin(cmd, &rendering_info);

        let full = Viewport::from_dimensions(pass.width, pass.height);
        unsafe {
            device.cmd_set_viewport(cmd, 0, &[flipped_viewport(&full)]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
        }

        let mut pipeline_bound = false;
        let mut skipped_draws = 0u32;
        for command in &pass.commands {
            match command {
                RenderCommand::SetViewport(viewport) => unsafe {
                    device.cmd_set_viewport(cmd, 0, &[flipped_viewport(viewport)]);
                },
                RenderCommand::SetScissorRect(rect) => unsafe {
                    device.cmd_set_scissor(cmd, 0, &[clamped_scissor(rect)]);
                },
                RenderCommand::SetStencilReference(reference) => unsafe {
                    device.cmd_set_stencil_reference(
                        cmd,
                        vk::StencilFaceFlags::FRONT_AND_BACK,
                        *reference,
                    );
                },
                RenderCommand::SetBlendColor(color) => unsafe {
                    device.cmd_set_blend_constants(cmd, &color.to_array());
                },
                RenderCommand::BindPipeline(pipeline) => match pipeline {
                    NativeRenderPipeline::Vulkan(pipeline) => {
                        unsafe {
                            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, *pipeline)
                        };
                        pipeline_bound = true;
                    }
                    #[allow(unreachable_patterns)]
                    other => {
                        log::warn!("Vulkan: ignoring non-Vulkan render pipeline {:?}", other);
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
                        unsafe {
                            device.cmd_draw(
                                cmd,
                                *vertex_count,
                                *instance_count,
                                *first_vertex,
                                *first_instance,
                            )
                        };
                    } else {
                        skipped_draws += 1;
                    }
                }
                RenderCommand::PushDebugGroup { label, color } => {
                    self.labels.begin(cmd, label, *color)
                }
                RenderCommand::PopDebugGroup => self.labels.end(cmd),
                RenderCommand::InsertDebugMarker { label, color } => {
                    self.labels.insert(cmd, label, *color)
                }
            }
        }
        if skipped_draws > 0 {
            log::warn!(
                "Vulkan: skipped {} draws in {:?} without a Vulkan pipeline",
                skipped_draws,
                pass.descriptor.label
            );
        }

        self.rendering.end(cmd);

        barriers.clear();
        for image in &attachments {
            let resting = image.resting_layout();
            barriers.add_image_barrier(image.image(), image.layout(), resting, image.aspect());
            image.set_layout(resting);
        }
        barriers.submit(device, cmd);

        self.labels.end(cmd);
    }

    fn record_copy_texture(&self, cmd: vk::CommandBuffer, copy: &TextureCopy) {
        let (Some(source), Some(destination)) =
            (vulkan_image(&copy.source), vulkan_image(&copy.destination))
        else {
            log::warn!("Vulkan: texture copy between non-Vulkan textures skipped");
            return;
        };
        let range = &copy.range;
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: source.aspect(),
            mip_level: range.mip_level,
            base_array_layer: range.layer,
            layer_count: range.num_layers,
        };
        let offset = vk::Offset3D {
            x: range.x as i32,
            y: range.y as i32,
            z: range.z as i32,
        };
        let extent = range.extent_at(0);
        let region = vk::ImageCopy {
            src_subresource: subresource,
            src_offset: offset,
            dst_subresource: subresource,
            dst_offset: offset,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            },
        };

        let mut barriers = BarrierBatch::new();
        barriers.add_image_barrier(
            source.image(),
            source.layout(),
            TextureLayout::TransferSrc,
            source.aspect(),
        );
        barriers.add_image_barrier(
            destination.image(),
            destination.layout(),
            TextureLayout::TransferDst,
            destination.aspect(),
        );
        barriers.submit(&self.device, cmd);

        unsafe {
            self.device.cmd_copy_image(
                cmd,
                source.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                destination.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        barriers.clear();
        for (image, from) in [
            (source, TextureLayout::TransferSrc),
            (destination, TextureLayout::TransferDst),
        ] {
            let resting = image.resting_layout();
            barriers.add_image_barrier(image.image(), from, resting, image.aspect());
            image.set_layout(resting);
        }
        barriers.submit(&self.device, cmd);
    }

    fn record_compute_pass(&self, cmd: vk::CommandBuffer, pass: &RecordedComputePass) {
        crate::profile_scope!("vulkan_compute_pass");
        let device = &self.device;

        let label = pass.label.as_deref().unwrap_or("compute pass");
        self.labels.begin(cmd, label, crate::types::Color::GREEN);

        let mut pipeline_bound = false;
        let mut skipped_dispatches = 0u32;
        for command in &pass.commands {
            match command {
                ComputeCommand::BindPipeline(pipeline) => match pipeline {
                    NativeComputePipeline::Vulkan(pipeline) => {
                        unsafe {
                            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, *pipeline)
                        };
                        pipeline_bound = true;
                    }
                    #[allow(unreachable_patterns)]
                    other => {
                        log::warn!("Vulkan: ignoring non-Vulkan compute pipeline {:?}", other);
                        pipeline_bound = false;
                    }
                },
                ComputeCommand::Dispatch { x, y, z } => {
                    if pipeline_bound {
                        unsafe { device.cmd_dispatch(cmd, *x, *y, *z) };
                    } else {
                        skipped_dispatches += 1;
                    }
                }
                ComputeCommand::PushDebugGroup { label, color } => {
                    self.labels.begin(cmd, label, *color)
                }
                ComputeCommand::PopDebugGroup => self.labels.end(cmd),
                ComputeCommand::InsertDebugMarker { label, color } => {
                    self.labels.insert(cmd, label, *color)
                }
            }
        }
        if skipped_dispatches > 0 {
            log::warn!(
                "Vulkan: skipped {} dispatches in {:?} without a Vulkan pipeline",
                skipped_dispatches,
                pass.label
            );
        }

        // Make compute writes visible to whatever comes next.
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }

        self.labels.end(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_is_flipped() {
        let viewport = flipped_viewport(&Viewport::from_dimensions(640, 480));
        assert_eq!(viewport.y, 480.0);
        assert_eq!(viewport.height, -480.0);
        assert_eq!(viewport.width, 640.0);
    }

    #[test]
    fn test_negative_scissor_is_clipped() {
        let rect = clamped_scissor(&ScissorRect {
            x: -10,
            y: 5,
            width: 30,
            height: 20,
        });
        assert_eq!(rect.offset.x, 0);
        assert_eq!(rect.offset.y, 5);
        assert_eq!(rect.extent.width, 20);
        assert_eq!(rect.extent.height, 20);
    }
}
