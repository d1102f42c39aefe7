//! Type conversions between RedLilium types and wgpu types.

use crate::types::{Color, LoadOp, StoreOp, TextureFormat, TextureType, TextureUsage};

/// Convert TextureFormat to wgpu format.
pub fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::R8Snorm => wgpu::TextureFormat::R8Snorm,
        TextureFormat::R8Uint => wgpu::TextureFormat::R8Uint,
        TextureFormat::R8Sint => wgpu::TextureFormat::R8Sint,
        TextureFormat::R16Unorm => wgpu::TextureFormat::R16Unorm,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Stencil8 => wgpu::TextureFormat::Stencil8,
        TextureFormat::Depth16Unorm => wgpu::TextureFormat::Depth16Unorm,
        TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth32FloatStencil8 => wgpu::TextureFormat::Depth32FloatStencil8,
    }
}

/// Convert TextureUsage flags to wgpu texture usages.
pub fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut result = wgpu::TextureUsages::empty();

    if usage.contains(TextureUsage::COPY_SRC) {
        result |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }

    result
}

/// wgpu dimension and `depth_or_array_layers` for a texture.
///
/// Cube faces are stored as array layers. 1D textures are stored as Nx1 2D
/// textures so they can be rendered to and layered.
pub fn convert_texture_dimension(
    texture_type: TextureType,
    depth: u32,
    array_layers: u32,
) -> (wgpu::TextureDimension, u32) {
    match texture_type {
        TextureType::D1 => (wgpu::TextureDimension::D2, 1),
        TextureType::D1Array => (wgpu::TextureDimension::D2, array_layers),
        TextureType::D2 => (wgpu::TextureDimension::D2, 1),
        TextureType::D2Array => (wgpu::TextureDimension::D2, array_layers),
        TextureType::D3 => (wgpu::TextureDimension::D3, depth),
        TextureType::Cube => (wgpu::TextureDimension::D2, 6),
        TextureType::CubeArray => (wgpu::TextureDimension::D2, array_layers * 6),
    }
}

/// View dimension of the view covering the whole texture.
pub fn convert_view_dimension(texture_type: TextureType) -> wgpu::TextureViewDimension {
    match texture_type {
        TextureType::D1 => wgpu::TextureViewDimension::D2,
        TextureType::D1Array => wgpu::TextureViewDimension::D2Array,
        TextureType::D2 => wgpu::TextureViewDimension::D2,
        TextureType::D2Array => wgpu::TextureViewDimension::D2Array,
        TextureType::D3 => wgpu::TextureViewDimension::D3,
        TextureType::Cube => wgpu::TextureViewDimension::Cube,
        TextureType::CubeArray => wgpu::TextureViewDimension::CubeArray,
    }
}

/// Aspect used for copies. Combined depth-stencil formats cannot be copied
/// as a whole.
pub fn copy_aspect(format: TextureFormat) -> Option<wgpu::TextureAspect> {
    match (format.has_depth(), format.has_stencil()) {
        (true, true) => None,
        (true, false) => Some(wgpu::TextureAspect::DepthOnly),
        (false, true) => Some(wgpu::TextureAspect::StencilOnly),
        (false, false) => Some(wgpu::TextureAspect::All),
    }
}

pub fn convert_color(color: Color) -> wgpu::Color {
    wgpu::Color {
        r: color.r as f64,
        g: color.g as f64,
        b: color.b as f64,
        a: color.a as f64,
    }
}

/// wgpu has no "don't care" load; clearing is the cheapest equivalent.
pub fn convert_load_op<V>(load_op: LoadOp, clear_value: V) -> wgpu::LoadOp<V> {
    match load_op {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear | LoadOp::DontCare => wgpu::LoadOp::Clear(clear_value),
    }
}

pub fn convert_store_op(store_op: StoreOp) -> wgpu::StoreOp {
    match store_op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::DontCare => wgpu::StoreOp::Discard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_dimensions() {
        assert_eq!(
            convert_texture_dimension(TextureType::Cube, 1, 1),
            (wgpu::TextureDimension::D2, 6)
        );
        assert_eq!(
            convert_texture_dimension(TextureType::CubeArray, 1, 3),
            (wgpu::TextureDimension::D2, 18)
        );
        assert_eq!(
            convert_texture_dimension(TextureType::D3, 16, 1),
            (wgpu::TextureDimension::D3, 16)
        );
    }

    #[test]
    fn test_copy_aspect() {
        assert_eq!(
            copy_aspect(TextureFormat::Depth32Float),
            Some(wgpu::TextureAspect::DepthOnly)
        );
        assert_eq!(
            copy_aspect(TextureFormat::Stencil8),
            Some(wgpu::TextureAspect::StencilOnly)
        );
        assert_eq!(copy_aspect(TextureFormat::Depth24PlusStencil8), None);
        assert_eq!(
            copy_aspect(TextureFormat::Rgba8Unorm),
            Some(wgpu::TextureAspect::All)
        );
    }

    #[test]
    fn test_usage_conversion() {
        let usage = convert_texture_usage(TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC);
        assert!(usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(usage.contains(wgpu::TextureUsages::COPY_SRC));
        assert!(!usage.contains(wgpu::TextureUsages::COPY_DST));
    }

    #[test]
    fn test_dont_care_load_clears() {
        assert_eq!(
            convert_load_op(LoadOp::DontCare, 1.0f32),
            wgpu::LoadOp::Clear(1.0)
        );
        assert_eq!(convert_load_op(LoadOp::Load, 1.0f32), wgpu::LoadOp::Load);
    }
}
