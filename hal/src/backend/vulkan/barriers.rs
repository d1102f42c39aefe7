//! Image memory barriers.
//!
//! Barriers are collected for every image a pass touches, then submitted
//! as a single pipeline barrier command.

use std::collections::HashMap;

use ash::vk;

use super::layout::TextureLayout;

/// Stages that may have written a texture before a pass depends on it.
const DEPENDENCY_WRITE_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COMPUTE_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::TRANSFER.as_raw(),
);

const DEPENDENCY_WRITE_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::SHADER_WRITE.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::TRANSFER_WRITE.as_raw(),
);

/// Stages of a pass that read its dependencies.
const DEPENDENCY_READ_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
);

/// A batch of image memory barriers to submit together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    /// Image barriers keyed by image handle (to avoid duplicates).
    image_barriers: HashMap<vk::Image, ImageBarrierInfo>,
    /// Source pipeline stage mask (union of all barriers).
    src_stage_mask: vk::PipelineStageFlags,
    /// Destination pipeline stage mask (union of all barriers).
    dst_stage_mask: vk::PipelineStageFlags,
}

/// Information for a single image barrier.
#[derive(Debug, Clone)]
struct ImageBarrierInfo {
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
    aspect_mask: vk::ImageAspectFlags,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a whole-image layout transition.
    ///
    /// A second barrier for the same image replaces the first, keeping the
    /// original `old_layout`. Barriers where `old_layout == new_layout` are
    /// skipped.
    pub fn add_image_barrier(
        &mut self,
        image: vk::Image,
        old_layout: TextureLayout,
        new_layout: TextureLayout,
        aspect_mask: vk::ImageAspectFlags,
    ) {
        if old_layout == new_layout {
            return;
        }

        let old_vk = self
            .image_barriers
            .get(&image)
            .map(|existing| existing.old_layout)
            .unwrap_or_else(|| old_layout.to_vk());

        self.image_barriers.insert(
            image,
            ImageBarrierInfo {
                old_layout: old_vk,
                new_layout: new_layout.to_vk(),
                src_access_mask: old_layout.src_access_mask(),
                dst_access_mask: new_layout.dst_access_mask(),
                aspect_mask,
            },
        );
        self.src_stage_mask |= old_layout.src_stage();
        self.dst_stage_mask |= new_layout.dst_stage();
    }

    /// Make earlier writes to `image` visible to shader reads, moving it to
    /// `new_layout` on the way.
    ///
    /// Unlike [`add_image_barrier`](Self::add_image_barrier) this is never
    /// skipped: a texture that already rests in `new_layout` still gets a
    /// same-layout memory barrier.
    pub fn add_dependency_barrier(
        &mut self,
        image: vk::Image,
        old_layout: TextureLayout,
        new_layout: TextureLayout,
        aspect_mask: vk::ImageAspectFlags,
    ) {
        let mut info = ImageBarrierInfo {
            old_layout: old_layout.to_vk(),
            new_layout: new_layout.to_vk(),
            src_access_mask: old_layout.src_access_mask() | DEPENDENCY_WRITE_ACCESS,
            dst_access_mask: new_layout.dst_access_mask() | vk::AccessFlags::SHADER_READ,
            aspect_mask,
        };
        if let Some(existing) = self.image_barriers.get(&image) {
            info.old_layout = existing.old_layout;
            info.src_access_mask |= existing.src_access_mask;
        }
        self.image_barriers.insert(image, info);
        self.src_stage_mask |= old_layout.src_stage() | DEPENDENCY_WRITE_STAGES;
        self.dst_stage_mask |= new_layout.dst_stage() | DEPENDENCY_READ_STAGES;
    }

    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.image_barriers.len()
    }

    /// Record all barriers in a single pipeline barrier command.
    ///
    /// Does nothing if the batch is empty.
    pub fn submit(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }

        let barriers: Vec<vk::ImageMemoryBarrier> = self
            .image_barriers
            .iter()
            .map(|(image, info)| {
                vk::ImageMemoryBarrier::default()
                    .old_layout(info.old_layout)
                    .new_layout(info.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(*image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: info.aspect_mask,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    })
                    .src_access_mask(info.src_access_mask)
                    .dst_access_mask(info.dst_access_mask)
            })
            .collect();

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage_mask,
                self.dst_stage_mask,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }

    pub fn clear(&mut self) {
        self.image_barriers.clear();
        self.src_stage_mask = vk::PipelineStageFlags::empty();
        self.dst_stage_mask = vk::PipelineStageFlags::empty();
    }
}

/// Record a transition of `mip_count` mips starting at `base_mip`.
///
/// Used where mips of one image are in different layouts.
#[allow(clippy::too_many_arguments)]
pub fn transition_mips(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: TextureLayout,
    new_layout: TextureLayout,
    base_mip: u32,
    mip_count: u32,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout.to_vk())
        .new_layout(new_layout.to_vk())
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: base_mip,
            level_count: mip_count,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(old_layout.src_access_mask())
        .dst_access_mask(new_layout.dst_access_mask());

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            old_layout.src_stage(),
            new_layout.dst_stage(),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_barrier_batch_empty() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_barrier_batch_skip_same_layout() {
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(12345);

        batch.add_image_barrier(
            image,
            TextureLayout::ColorAttachment,
            TextureLayout::ColorAttachment,
            vk::ImageAspectFlags::COLOR,
        );

        assert!(batch.is_empty());
    }

    #[test]
    fn test_barrier_batch_adds_transition() {
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(12345);

        batch.add_image_barrier(
            image,
            TextureLayout::Undefined,
            TextureLayout::ColorAttachment,
            vk::ImageAspectFlags::COLOR,
        );

        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_barrier_batch_deduplicates_and_keeps_first_old_layout() {
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(12345);

        batch.add_image_barrier(
            image,
            TextureLayout::Undefined,
            TextureLayout::ColorAttachment,
            vk::ImageAspectFlags::COLOR,
        );
        batch.add_image_barrier(
            image,
            TextureLayout::ColorAttachment,
            TextureLayout::ShaderReadOnly,
            vk::ImageAspectFlags::COLOR,
        );

        assert_eq!(batch.len(), 1);
        let info = &batch.image_barriers[&image];
        assert_eq!(info.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(info.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_barrier_batch_multiple_images() {
        let mut batch = BarrierBatch::new();

        batch.add_image_barrier(
            vk::Image::from_raw(11111),
            TextureLayout::Undefined,
            TextureLayout::ColorAttachment,
            vk::ImageAspectFlags::COLOR,
        );
        batch.add_image_barrier(
            vk::Image::from_raw(22222),
            TextureLayout::ColorAttachment,
            TextureLayout::ShaderReadOnly,
            vk::ImageAspectFlags::COLOR,
        );

        assert_eq!(batch.len(), 2);

        batch.clear();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_dependency_barrier_kept_for_same_layout() {
        // A storage texture written by compute rests in General.
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(777);

        batch.add_dependency_barrier(
            image,
            TextureLayout::General,
            TextureLayout::General,
            vk::ImageAspectFlags::COLOR,
        );

        assert_eq!(batch.len(), 1);
        let info = &batch.image_barriers[&image];
        assert_eq!(info.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(info.new_layout, vk::ImageLayout::GENERAL);
        assert!(info.src_access_mask.contains(vk::AccessFlags::SHADER_WRITE));
        assert!(info.dst_access_mask.contains(vk::AccessFlags::SHADER_READ));
        assert!(
            batch
                .src_stage_mask
                .contains(vk::PipelineStageFlags::COMPUTE_SHADER)
        );
        assert!(
            batch
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::FRAGMENT_SHADER)
        );
    }

    #[test]
    fn test_dependency_barrier_for_sampled_texture() {
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(888);

        batch.add_dependency_barrier(
            image,
            TextureLayout::ShaderReadOnly,
            TextureLayout::ShaderReadOnly,
            vk::ImageAspectFlags::COLOR,
        );

        let info = &batch.image_barriers[&image];
        assert_eq!(info.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(
            info.src_access_mask
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        );
        assert!(
            batch
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::VERTEX_SHADER)
        );
    }

    #[test]
    fn test_dependency_barrier_transitions_and_merges() {
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(999);

        batch.add_dependency_barrier(
            image,
            TextureLayout::TransferDst,
            TextureLayout::ShaderReadOnly,
            vk::ImageAspectFlags::COLOR,
        );
        batch.add_dependency_barrier(
            image,
            TextureLayout::ShaderReadOnly,
            TextureLayout::ShaderReadOnly,
            vk::ImageAspectFlags::COLOR,
        );

        assert_eq!(batch.len(), 1);
        let info = &batch.image_barriers[&image];
        assert_eq!(info.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(info.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(info.src_access_mask.contains(vk::AccessFlags::TRANSFER_WRITE));
    }
}
