//! Type conversions between HAL types and Vulkan types.

use ash::vk;

use crate::types::{Color, LoadOp, StoreOp, TextureFormat, TextureType, TextureUsage};

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        // 8-bit formats
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R8Snorm => vk::Format::R8_SNORM,
        TextureFormat::R8Uint => vk::Format::R8_UINT,
        TextureFormat::R8Sint => vk::Format::R8_SINT,

        // 16-bit formats
        TextureFormat::R16Unorm => vk::Format::R16_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,

        // 32-bit formats
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,

        // 64-bit formats
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,

        // 128-bit formats
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        // Depth/stencil formats
        TextureFormat::Stencil8 => vk::Format::S8_UINT,
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24Plus => vk::Format::X8_D24_UNORM_PACK32,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Convert TextureUsage flags to Vulkan image usage flags.
///
/// The format is needed to determine whether RENDER_ATTACHMENT should map to
/// COLOR_ATTACHMENT or DEPTH_STENCIL_ATTACHMENT.
pub fn convert_texture_usage(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format.is_depth_stencil() {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }

    result
}

/// Image type plus creation flags for a texture type.
pub fn convert_image_type(
    texture_type: TextureType,
    usage: TextureUsage,
) -> (vk::ImageType, vk::ImageCreateFlags) {
    match texture_type {
        TextureType::D1 | TextureType::D1Array => {
            (vk::ImageType::TYPE_1D, vk::ImageCreateFlags::empty())
        }
        TextureType::D2 | TextureType::D2Array => {
            (vk::ImageType::TYPE_2D, vk::ImageCreateFlags::empty())
        }
        TextureType::Cube | TextureType::CubeArray => {
            (vk::ImageType::TYPE_2D, vk::ImageCreateFlags::CUBE_COMPATIBLE)
        }
        TextureType::D3 => {
            // Depth slices are bound as 2D views when rendering into a volume.
            let flags = if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
                vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            };
            (vk::ImageType::TYPE_3D, flags)
        }
    }
}

/// Full-resource view type for a texture type.
pub fn convert_view_type(texture_type: TextureType) -> vk::ImageViewType {
    match texture_type {
        TextureType::D1 => vk::ImageViewType::TYPE_1D,
        TextureType::D1Array => vk::ImageViewType::TYPE_1D_ARRAY,
        TextureType::D2 => vk::ImageViewType::TYPE_2D,
        TextureType::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureType::D3 => vk::ImageViewType::TYPE_3D,
        TextureType::Cube => vk::ImageViewType::CUBE,
        TextureType::CubeArray => vk::ImageViewType::CUBE_ARRAY,
    }
}

/// Convert a sample count to Vulkan sample count flags.
pub fn convert_sample_count(samples: u32) -> vk::SampleCountFlags {
    match samples {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

/// Image aspects covered by a format.
pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    let mut mask = vk::ImageAspectFlags::empty();
    if format.has_depth() {
        mask |= vk::ImageAspectFlags::DEPTH;
    }
    if format.has_stencil() {
        mask |= vk::ImageAspectFlags::STENCIL;
    }
    if mask.is_empty() {
        vk::ImageAspectFlags::COLOR
    } else {
        mask
    }
}

pub fn convert_load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn convert_store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

fn is_uint(format: TextureFormat) -> bool {
    matches!(format, TextureFormat::R8Uint | TextureFormat::R32Uint)
}

fn is_sint(format: TextureFormat) -> bool {
    matches!(format, TextureFormat::R8Sint)
}

/// Clear value for a color attachment, typed to match the format.
pub fn clear_color_value(format: TextureFormat, color: Color) -> vk::ClearValue {
    let color = if is_uint(format) {
        vk::ClearColorValue {
            uint32: color.to_array().map(|c| c.max(0.0) as u32),
        }
    } else if is_sint(format) {
        vk::ClearColorValue {
            int32: color.to_array().map(|c| c as i32),
        }
    } else {
        vk::ClearColorValue {
            float32: color.to_array(),
        }
    };
    vk::ClearValue { color }
}

pub fn clear_depth_stencil_value(depth: f32, stencil: u32) -> vk::ClearValue {
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
    }
}

/// Multisample resolve mode for a color format. Integer formats cannot be
/// averaged.
pub fn resolve_mode(format: TextureFormat) -> vk::ResolveModeFlags {
    if is_uint(format) || is_sint(format) {
        vk::ResolveModeFlags::SAMPLE_ZERO
    } else {
        vk::ResolveModeFlags::AVERAGE
    }
}
