//! Texture creation, framebuffer views and transfers for the wgpu backend.

use crate::backend::transfer::{PackedLayout, align_up};
use crate::backend::{GpuTexture, GpuTextureView};
use crate::error::GraphicsError;
use crate::resources::TextureStorage;
use crate::types::{
    FramebufferMode, TextureDescriptor, TextureFormat, TextureRange, TextureType,
};

use super::WgpuBackend;
use super::conversion::{
    convert_texture_dimension, convert_texture_format, convert_texture_usage,
    convert_view_dimension, copy_aspect,
};

pub(super) fn wgpu_texture(texture: &TextureStorage) -> Result<&wgpu::Texture, GraphicsError> {
    texture.gpu().wgpu_texture().ok_or_else(|| {
        GraphicsError::Internal(format!("texture {} is not a wgpu texture", texture.id()))
    })
}

/// Origin and copy extent of `range` at `mip_offset`.
///
/// Volumes address depth slices, everything else array layers.
pub(super) fn copy_region(
    range: &TextureRange,
    texture_type: TextureType,
    mip_offset: u32,
) -> (wgpu::Origin3d, wgpu::Extent3d) {
    let extent = range.extent_at(mip_offset);
    let (z, depth_or_array_layers) = match texture_type {
        TextureType::D3 => (range.z >> mip_offset, extent.depth),
        _ => (range.layer, range.num_layers),
    };
    (
        wgpu::Origin3d {
            x: range.x >> mip_offset,
            y: range.y >> mip_offset,
            z,
        },
        wgpu::Extent3d {
            width: extent.width,
            height: extent.height,
            depth_or_array_layers,
        },
    )
}

/// Aspect for copying `format`, or an error when wgpu cannot copy it.
fn checked_copy_aspect(format: TextureFormat) -> Result<wgpu::TextureAspect, GraphicsError> {
    let aspect = copy_aspect(format).ok_or_else(|| {
        GraphicsError::FeatureNotSupported(format!(
            "{:?} has both depth and stencil and cannot be copied",
            format
        ))
    })?;
    if convert_texture_format(format)
        .block_copy_size(Some(aspect))
        .is_none()
    {
        return Err(GraphicsError::FeatureNotSupported(format!(
            "{:?} cannot be copied on wgpu",
            format
        )));
    }
    Ok(aspect)
}

impl WgpuBackend {
    pub(crate) fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
    ) -> Result<GpuTexture, GraphicsError> {
        crate::profile_scope!("wgpu_create_texture");
        let (dimension, depth_or_array_layers) = convert_texture_dimension(
            descriptor.texture_type,
            descriptor.size.depth,
            descriptor.array_layers,
        );
        let mut usage = convert_texture_usage(descriptor.usage);
        if usage.is_empty() {
            usage = wgpu::TextureUsages::COPY_DST;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth_or_array_layers,
            },
            mip_level_count: descriptor.mip_level_count,
            sample_count: descriptor.sample_count,
            dimension,
            format: convert_texture_format(format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: descriptor.label.as_deref(),
            dimension: Some(convert_view_dimension(descriptor.texture_type)),
            ..Default::default()
        });

        Ok(GpuTexture::Wgpu { texture, view })
    }

    pub(crate) fn import_swapchain_texture(
        &self,
        descriptor: &TextureDescriptor,
        texture: wgpu::Texture,
    ) -> Result<GpuTexture, GraphicsError> {
        if texture.width() != descriptor.size.width || texture.height() != descriptor.size.height
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "swapchain texture is {}x{}, descriptor says {}x{}",
                texture.width(),
                texture.height(),
                descriptor.size.width,
                descriptor.size.height
            )));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTexture::Wgpu { texture, view })
    }

    pub(crate) fn create_framebuffer_view(
        &self,
        texture: &TextureStorage,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> Result<GpuTextureView, GraphicsError> {
        let native = wgpu_texture(texture)?;
        let label = texture.label();

        let (view, depth_slice) = match (texture.descriptor().texture_type, mode) {
            (TextureType::D3, FramebufferMode::Mono) => {
                let view = native.create_view(&wgpu::TextureViewDescriptor {
                    label,
                    dimension: Some(wgpu::TextureViewDimension::D3),
                    base_mip_level: mip_level,
                    mip_level_count: Some(1),
                    ..Default::default()
                });
                (view, Some(layer))
            }
            (TextureType::D3, FramebufferMode::Stereo) => {
                return Err(GraphicsError::FeatureNotSupported(
                    "stereo rendering into a volume".to_string(),
                ));
            }
            (_, FramebufferMode::Mono) => {
                let view = native.create_view(&wgpu::TextureViewDescriptor {
                    label,
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: mip_level,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                });
                (view, None)
            }
            (_, FramebufferMode::Stereo) => {
                if !self.supports_multiview() {
                    return Err(GraphicsError::FeatureNotSupported(
                        "stereo framebuffers need multiview".to_string(),
                    ));
                }
                let view = native.create_view(&wgpu::TextureViewDescriptor {
                    label,
                    dimension: Some(wgpu::TextureViewDimension::D2Array),
                    base_mip_level: mip_level,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(mode.layer_count()),
                    ..Default::default()
                });
                (view, None)
            }
        };

        Ok(GpuTextureView::Wgpu { view, depth_slice })
    }

    /// Queue writes are ordered after every earlier submission.
    pub(crate) fn upload_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("wgpu_upload_texture");
        let native = wgpu_texture(texture)?;
        let format = texture.format();
        let aspect = checked_copy_aspect(format)?;
        let texture_type = texture.descriptor().texture_type;

        let mut offset = 0usize;
        for mip_offset in 0..range.num_mip_levels {
            let (origin, extent) = copy_region(range, texture_type, mip_offset);
            let row_pitch = range.row_pitch(format, bytes_per_row, mip_offset);
            let size = row_pitch as usize
                * extent.height as usize
                * extent.depth_or_array_layers as usize;
            let chunk = data.get(offset..offset + size).ok_or_else(|| {
                GraphicsError::Internal(format!(
                    "upload data ends before mip {} of texture {}",
                    range.mip_level + mip_offset,
                    texture.id()
                ))
            })?;

            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: native,
                    mip_level: range.mip_level + mip_offset,
                    origin,
                    aspect,
                },
                chunk,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row_pitch),
                    rows_per_image: Some(extent.height),
                },
                extent,
            );
            offset += size;
        }
        Ok(())
    }

    /// Copy through a mapped staging buffer and wait for it.
    pub(crate) fn read_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("wgpu_read_texture");
        let native = wgpu_texture(texture)?;
        let format = texture.format();
        let aspect = checked_copy_aspect(format)?;
        let texture_type = texture.descriptor().texture_type;

        let layout = PackedLayout::new(
            range,
            format,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
            wgpu::COPY_BUFFER_ALIGNMENT,
        );
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback Buffer"),
            size: align_up(layout.size, wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Readback Encoder"),
            });
        for mip in &layout.mips {
            let (origin, extent) = copy_region(range, texture_type, mip.mip_offset);
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: native,
                    mip_level: range.mip_level + mip.mip_offset,
                    origin,
                    aspect,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: mip.offset,
                        bytes_per_row: Some(mip.row_pitch),
                        rows_per_image: Some(mip.rows_per_image()),
                    },
                },
                extent,
            );
        }
        let index = self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.poll_wait(Some(index))?;

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(GraphicsError::Internal(format!(
                    "failed to map readback buffer: {e}"
                )));
            }
            Err(_) => {
                return Err(GraphicsError::Internal(
                    "readback buffer was never mapped".to_string(),
                ));
            }
        }

        {
            let mapped = slice.get_mapped_range();
            layout.for_each_row(range, format, bytes_per_row, |dst, src, len| {
                out[dst..dst + len].copy_from_slice(&mapped[src..src + len]);
            });
        }
        staging.unmap();

        self.retire_completed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_region_layers() {
        let range = TextureRange::new_2d(2, 3, 8, 8).with_layers(4, 2);
        let (origin, extent) = copy_region(&range, TextureType::D2Array, 0);
        assert_eq!((origin.x, origin.y, origin.z), (2, 3, 4));
        assert_eq!(
            (extent.width, extent.height, extent.depth_or_array_layers),
            (8, 8, 2)
        );
    }

    #[test]
    fn test_copy_region_volume_mips() {
        let range = TextureRange::new_3d(0, 0, 0, 16, 16, 8).with_mip_levels(0, 2);
        let (origin, extent) = copy_region(&range, TextureType::D3, 1);
        assert_eq!(origin.z, 0);
        assert_eq!(
            (extent.width, extent.height, extent.depth_or_array_layers),
            (8, 8, 4)
        );
    }

    #[test]
    fn test_uncopyable_formats() {
        assert!(checked_copy_aspect(TextureFormat::Depth24PlusStencil8).is_err());
        assert!(checked_copy_aspect(TextureFormat::Depth24Plus).is_err());
        assert_eq!(
            checked_copy_aspect(TextureFormat::Depth32Float).unwrap(),
            wgpu::TextureAspect::DepthOnly
        );
    }
}
