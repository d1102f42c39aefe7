//! Vulkan images: creation, framebuffer views, transfers and mip blits.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;

use crate::backend::transfer::PackedLayout;
use crate::error::GraphicsError;
use crate::types::{
    Extent3d, FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType,
    TextureUsage,
};

use super::allocator::{self, SharedAllocator};
use super::barriers::{BarrierBatch, transition_mips};
use super::command::OneTimeCommands;
use super::conversion::{
    aspect_mask, convert_image_type, convert_sample_count, convert_texture_format,
    convert_texture_usage, convert_view_type,
};
use super::debug::DebugLabels;
use super::layout::TextureLayout;

/// Staging buffer offsets must be multiples of 4 and of the texel size.
const STAGING_OFFSET_ALIGNMENT: u64 = 16;

/// Everything a blocking transfer needs. The caller holds the queue lock.
pub(crate) struct TransferContext<'a> {
    pub device: &'a ash::Device,
    pub allocator: &'a SharedAllocator,
    pub pool: vk::CommandPool,
    pub queue: vk::Queue,
}

/// A Vulkan image with its full-resource view and tracked layout.
///
/// All subresources share one layout between commands. The layout is only
/// read and written while recording under the backend's queue lock, so it
/// always matches the state the queue will leave the image in.
pub(crate) struct VulkanImage {
    device: ash::Device,
    allocator: SharedAllocator,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    vk_format: vk::Format,
    format: TextureFormat,
    texture_type: TextureType,
    usage: TextureUsage,
    extent: Extent3d,
    mip_levels: u32,
    aspect: vk::ImageAspectFlags,
    layout: Mutex<TextureLayout>,
    /// False for swapchain images: the view is ours, the image is not.
    owned: bool,
}

impl VulkanImage {
    pub(crate) fn create(
        device: &ash::Device,
        allocator: &SharedAllocator,
        labels: &DebugLabels,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
    ) -> Result<Self, GraphicsError> {
        let vk_format = convert_texture_format(format);
        let (image_type, flags) = convert_image_type(descriptor.texture_type, descriptor.usage);
        let extent = image_extent(descriptor.texture_type, descriptor.size);
        let array_layers = match descriptor.texture_type {
            TextureType::D3 => 1,
            _ => descriptor.num_layers(),
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(vk_format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            })
            .mip_levels(descriptor.mip_level_count)
            .array_layers(array_layers)
            .samples(convert_sample_count(descriptor.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let name = descriptor.label.as_deref().unwrap_or("texture");
        let allocation = match allocator::allocate_image(allocator, device, image, name) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut texture = Self {
            device: device.clone(),
            allocator: SharedAllocator::clone(allocator),
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            vk_format,
            format,
            texture_type: descriptor.texture_type,
            usage: descriptor.usage,
            extent,
            mip_levels: descriptor.mip_level_count,
            aspect: aspect_mask(format),
            layout: Mutex::new(TextureLayout::Undefined),
            owned: true,
        };
        // On failure the image and memory are released by Drop.
        texture.view = texture.create_full_view()?;

        if let Some(label) = &descriptor.label {
            labels.set_name(texture.image, label);
            labels.set_name(texture.view, label);
        }

        log::trace!(
            "Vulkan: created image {:?} ({:?} {}x{}x{}, {} mips, {} layers, {:?})",
            descriptor.label,
            descriptor.texture_type,
            extent.width,
            extent.height,
            extent.depth,
            descriptor.mip_level_count,
            array_layers,
            vk_format
        );
        Ok(texture)
    }

    /// Wrap an image owned by a swapchain.
    pub(crate) fn import(
        device: &ash::Device,
        allocator: &SharedAllocator,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
        image: vk::Image,
    ) -> Result<Self, GraphicsError> {
        let mut texture = Self {
            device: device.clone(),
            allocator: SharedAllocator::clone(allocator),
            image,
            view: vk::ImageView::null(),
            allocation: None,
            vk_format: convert_texture_format(format),
            format,
            texture_type: descriptor.texture_type,
            usage: descriptor.usage,
            extent: image_extent(descriptor.texture_type, descriptor.size),
            mip_levels: 1,
            aspect: aspect_mask(format),
            layout: Mutex::new(TextureLayout::Undefined),
            owned: false,
        };
        texture.view = texture.create_full_view()?;
        Ok(texture)
    }

    pub(crate) fn image(&self) -> vk::Image {
        self.image
    }

    pub(crate) fn view(&self) -> vk::ImageView {
        self.view
    }

    pub(crate) fn format(&self) -> vk::Format {
        self.vk_format
    }

    pub(crate) fn hal_format(&self) -> TextureFormat {
        self.format
    }

    pub(crate) fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub(crate) fn layout(&self) -> TextureLayout {
        *self.layout.lock()
    }

    pub(crate) fn set_layout(&self, layout: TextureLayout) {
        *self.layout.lock() = layout;
    }

    /// Layout the image returns to after transfers and render passes.
    pub(crate) fn resting_layout(&self) -> TextureLayout {
        TextureLayout::resting(self.usage, self.format.is_depth_stencil())
    }

    fn create_view(
        &self,
        view_type: vk::ImageViewType,
        aspect_mask: vk::ImageAspectFlags,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
    ) -> Result<vk::ImageView, GraphicsError> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(view_type)
            .format(self.vk_format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level,
                level_count,
                base_array_layer,
                layer_count,
            });

        unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })
    }

    /// View over every mip and layer. Depth-stencil images expose the depth
    /// aspect, which is what shaders sample.
    fn create_full_view(&self) -> Result<vk::ImageView, GraphicsError> {
        let aspect = if self.aspect.contains(vk::ImageAspectFlags::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            self.aspect
        };
        self.create_view(
            convert_view_type(self.texture_type),
            aspect,
            0,
            vk::REMAINING_MIP_LEVELS,
            0,
            vk::REMAINING_ARRAY_LAYERS,
        )
    }

    /// View of one mip level usable as a render attachment.
    ///
    /// For volumes `layer` is a depth slice of the mip.
    pub(crate) fn create_framebuffer_view(
        &self,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> Result<vk::ImageView, GraphicsError> {
        let one_dimensional = matches!(self.texture_type, TextureType::D1 | TextureType::D1Array);
        let view_type = match (mode, one_dimensional) {
            (FramebufferMode::Mono, true) => vk::ImageViewType::TYPE_1D,
            (FramebufferMode::Mono, false) => vk::ImageViewType::TYPE_2D,
            (FramebufferMode::Stereo, true) => vk::ImageViewType::TYPE_1D_ARRAY,
            (FramebufferMode::Stereo, false) => vk::ImageViewType::TYPE_2D_ARRAY,
        };
        self.create_view(
            view_type,
            self.aspect,
            mip_level,
            1,
            layer,
            mode.layer_count(),
        )
    }

    /// Aspect used by buffer copies. Vulkan copies one aspect at a time, and
    /// the packed layout of a combined depth-stencil texel has no Vulkan
    /// buffer equivalent.
    fn copy_aspect(&self) -> Result<vk::ImageAspectFlags, GraphicsError> {
        if self.format.has_depth() && self.format.has_stencil() {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "transfers of combined depth-stencil format {:?}",
                self.format
            )));
        }
        Ok(self.aspect)
    }

    fn copy_regions(
        &self,
        range: &TextureRange,
        layout: &PackedLayout,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Vec<vk::BufferImageCopy> {
        layout
            .mips
            .iter()
            .map(|mip| {
                let (x, y, z) = if mip.mip_offset == 0 {
                    (range.x, range.y, range.z)
                } else {
                    (0, 0, 0)
                };
                vk::BufferImageCopy {
                    buffer_offset: mip.offset,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask,
                        mip_level: range.mip_level + mip.mip_offset,
                        base_array_layer: range.layer,
                        layer_count: range.num_layers,
                    },
                    image_offset: vk::Offset3D {
                        x: x as i32,
                        y: y as i32,
                        z: z as i32,
                    },
                    image_extent: vk::Extent3D {
                        width: mip.extent.width,
                        height: mip.extent.height,
                        depth: mip.extent.depth,
                    },
                }
            })
            .collect()
    }

    /// Copy caller data into the image and wait for the copy to finish.
    pub(crate) fn upload(
        &self,
        ctx: &TransferContext<'_>,
        range: &TextureRange,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_upload");

        let aspect = self.copy_aspect()?;
        let layout = PackedLayout::new(range, self.format, 1, STAGING_OFFSET_ALIGNMENT);
        let mut staging = StagingBuffer::new(
            ctx.device,
            ctx.allocator,
            layout.size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        let mapped = staging.mapped_mut()?;
        layout.for_each_row(range, self.format, bytes_per_row, |src, dst, len| {
            mapped[dst..dst + len].copy_from_slice(&data[src..src + len]);
        });

        let regions = self.copy_regions(range, &layout, aspect);
        let old_layout = self.layout();
        let resting = self.resting_layout();

        let commands = OneTimeCommands::begin(ctx.device, ctx.pool)?;
        let cmd = commands.cmd();

        let mut barriers = BarrierBatch::new();
        barriers.add_image_barrier(self.image, old_layout, TextureLayout::TransferDst, self.aspect);
        barriers.submit(ctx.device, cmd);

        unsafe {
            ctx.device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }

        barriers.clear();
        barriers.add_image_barrier(self.image, TextureLayout::TransferDst, resting, self.aspect);
        barriers.submit(ctx.device, cmd);

        commands.finish(ctx.queue)?;
        self.set_layout(resting);
        Ok(())
    }

    /// Copy a region of the image into `out` and wait for the data.
    pub(crate) fn read(
        &self,
        ctx: &TransferContext<'_>,
        range: &TextureRange,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_readback");

        let aspect = self.copy_aspect()?;
        let layout = PackedLayout::new(range, self.format, 1, STAGING_OFFSET_ALIGNMENT);
        let staging = StagingBuffer::new(
            ctx.device,
            ctx.allocator,
            layout.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;

        let regions = self.copy_regions(range, &layout, aspect);
        let old_layout = self.layout();
        let resting = self.resting_layout();

        let commands = OneTimeCommands::begin(ctx.device, ctx.pool)?;
        let cmd = commands.cmd();

        let mut barriers = BarrierBatch::new();
        barriers.add_image_barrier(self.image, old_layout, TextureLayout::TransferSrc, self.aspect);
        barriers.submit(ctx.device, cmd);

        unsafe {
            ctx.device.cmd_copy_image_to_buffer(
                cmd,
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.buffer,
                &regions,
            );

            let host_barrier = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(staging.buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            ctx.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[host_barrier],
                &[],
            );
        }

        barriers.clear();
        barriers.add_image_barrier(self.image, TextureLayout::TransferSrc, resting, self.aspect);
        barriers.submit(ctx.device, cmd);

        commands.finish(ctx.queue)?;
        self.set_layout(resting);

        let mapped = staging.mapped()?;
        layout.for_each_row(range, self.format, bytes_per_row, |dst, src, len| {
            out[dst..dst + len].copy_from_slice(&mapped[src..src + len]);
        });
        Ok(())
    }

    /// Record blits rebuilding every mip below the first.
    ///
    /// Leaves the whole image in its resting layout.
    pub(crate) fn record_generate_mips(&self, cmd: vk::CommandBuffer, linear_filter: bool) {
        if self.mip_levels <= 1 {
            return;
        }
        let device = &self.device;
        let aspect = self.aspect;
        let layer_count = match self.texture_type {
            TextureType::D3 => 1,
            _ => vk::REMAINING_ARRAY_LAYERS,
        };
        let filter = if linear_filter {
            vk::Filter::LINEAR
        } else {
            vk::Filter::NEAREST
        };

        transition_mips(
            device,
            cmd,
            self.image,
            aspect,
            self.layout(),
            TextureLayout::TransferDst,
            0,
            self.mip_levels,
        );

        for mip in 1..self.mip_levels {
            transition_mips(
                device,
                cmd,
                self.image,
                aspect,
                TextureLayout::TransferDst,
                TextureLayout::TransferSrc,
                mip - 1,
                1,
            );

            let src = self.extent.mip_level_size(mip - 1);
            let dst = self.extent.mip_level_size(mip);
            let blit = vk::ImageBlit::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: mip - 1,
                    base_array_layer: 0,
                    layer_count,
                })
                .src_offsets([vk::Offset3D::default(), offset_of(src)])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: mip,
                    base_array_layer: 0,
                    layer_count,
                })
                .dst_offsets([vk::Offset3D::default(), offset_of(dst)]);

            unsafe {
                device.cmd_blit_image(
                    cmd,
                    self.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    filter,
                );
            }
        }

        let resting = self.resting_layout();
        transition_mips(
            device,
            cmd,
            self.image,
            aspect,
            TextureLayout::TransferSrc,
            resting,
            0,
            self.mip_levels - 1,
        );
        transition_mips(
            device,
            cmd,
            self.image,
            aspect,
            TextureLayout::TransferDst,
            resting,
            self.mip_levels - 1,
            1,
        );
        self.set_layout(resting);
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            if self.owned {
                self.device.destroy_image(self.image, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            allocator::free(&self.allocator, allocation);
        }
    }
}

impl std::fmt::Debug for VulkanImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanImage")
            .field("image", &self.image)
            .field("format", &self.vk_format)
            .field("layout", &self.layout())
            .field("owned", &self.owned)
            .finish()
    }
}

/// Native image extent. 1D images are one texel high; only volumes are deep.
fn image_extent(texture_type: TextureType, size: Extent3d) -> Extent3d {
    match texture_type {
        TextureType::D1 | TextureType::D1Array => Extent3d::new_1d(size.width),
        TextureType::D3 => size,
        _ => Extent3d::new_2d(size.width, size.height),
    }
}

fn offset_of(extent: Extent3d) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

/// Host-visible buffer used for one transfer.
struct StagingBuffer {
    device: ash::Device,
    allocator: SharedAllocator,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl StagingBuffer {
    fn new(
        device: &ash::Device,
        allocator: &SharedAllocator,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self, GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create staging buffer: {:?}",
                e
            ))
        })?;

        let allocation =
            match allocator::allocate_buffer(allocator, device, buffer, location, "staging") {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        Ok(Self {
            device: device.clone(),
            allocator: SharedAllocator::clone(allocator),
            buffer,
            allocation: Some(allocation),
        })
    }

    fn mapped(&self) -> Result<&[u8], GraphicsError> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| GraphicsError::Internal("staging buffer is not mapped".to_string()))
    }

    fn mapped_mut(&mut self) -> Result<&mut [u8], GraphicsError> {
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| GraphicsError::Internal("staging buffer is not mapped".to_string()))
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            allocator::free(&self.allocator, allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_extent_per_type() {
        let size = Extent3d::new_3d(8, 4, 2);
        assert_eq!(image_extent(TextureType::D1Array, size), Extent3d::new_1d(8));
        assert_eq!(image_extent(TextureType::Cube, size), Extent3d::new_2d(8, 4));
        assert_eq!(image_extent(TextureType::D3, size), size);
    }

    #[test]
    fn test_blit_offsets() {
        let offset = offset_of(Extent3d::new_3d(4, 2, 1));
        assert_eq!((offset.x, offset.y, offset.z), (4, 2, 1));
    }
}
