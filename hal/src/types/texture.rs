//! Texture types and descriptors.

use super::Extent3d;
use crate::error::GraphicsError;
use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit red channel, signed normalized.
    R8Snorm,
    /// 8-bit red channel, unsigned integer.
    R8Uint,
    /// 8-bit red channel, signed integer.
    R8Sint,

    // 16-bit formats
    /// 16-bit red channel, unsigned normalized.
    R16Unorm,
    /// 16-bit red channel, float.
    R16Float,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,

    // Depth/stencil formats
    /// 8-bit stencil only.
    Stencil8,
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth.
    Depth24Plus,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth, float.
    Depth32Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Stencil8
                | Self::Depth16Unorm
                | Self::Depth24Plus
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a depth component.
    pub fn has_depth(&self) -> bool {
        self.is_depth_stencil() && *self != Self::Stencil8
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            Self::Stencil8 | Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8
        )
    }

    /// Returns true for sRGB-encoded color formats.
    pub fn is_srgb(&self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    /// Returns the size in bytes per pixel/block.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint | Self::R8Sint | Self::Stencil8 => 1,
            Self::R16Unorm | Self::R16Float | Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24Plus
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Formats to try, in order of preference, when this depth/stencil format
    /// is requested.
    ///
    /// The first entry is always the format itself. The substitutes keep every
    /// aspect of the request (a stencil request never falls back to a
    /// depth-only format). Color formats have no substitutes.
    pub fn depth_stencil_candidates(&self) -> &'static [TextureFormat] {
        use TextureFormat::*;
        match self {
            Stencil8 => &[Stencil8, Depth24PlusStencil8, Depth32FloatStencil8],
            Depth16Unorm => &[
                Depth16Unorm,
                Depth24Plus,
                Depth32Float,
                Depth24PlusStencil8,
                Depth32FloatStencil8,
            ],
            Depth24Plus => &[
                Depth24Plus,
                Depth32Float,
                Depth24PlusStencil8,
                Depth32FloatStencil8,
                Depth16Unorm,
            ],
            Depth24PlusStencil8 => &[Depth24PlusStencil8, Depth32FloatStencil8],
            Depth32Float => &[
                Depth32Float,
                Depth32FloatStencil8,
                Depth24Plus,
                Depth24PlusStencil8,
                Depth16Unorm,
            ],
            Depth32FloatStencil8 => &[Depth32FloatStencil8, Depth24PlusStencil8],
            _ => &[],
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from (readback, mip generation source).
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to. Required for uploads.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be used as a storage texture.
        const STORAGE_BINDING = 1 << 3;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Dimensionality and layering of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    /// One-dimensional texture.
    D1,
    /// Array of one-dimensional textures.
    D1Array,
    /// Two-dimensional texture.
    #[default]
    D2,
    /// Array of two-dimensional textures.
    D2Array,
    /// Three-dimensional (volumetric) texture.
    D3,
    /// Cube map (six 2D layers).
    Cube,
    /// Array of cube maps.
    CubeArray,
}

impl TextureType {
    /// Returns true for array types (including cube arrays).
    pub fn is_array(&self) -> bool {
        matches!(self, Self::D1Array | Self::D2Array | Self::CubeArray)
    }

    /// Returns true for cube and cube array types.
    pub fn is_cube(&self) -> bool {
        matches!(self, Self::Cube | Self::CubeArray)
    }
}

/// Selects which framebuffer view cache a view is created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FramebufferMode {
    /// Single-layer 2D view.
    #[default]
    Mono,
    /// Two-layer array view rendered with a multiview mask (one layer per eye).
    Stereo,
}

impl FramebufferMode {
    /// Number of consecutive layers a view in this mode covers.
    pub fn layer_count(&self) -> u32 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Texture type.
    pub texture_type: TextureType,
    /// Size of the texture at mip 0.
    pub size: Extent3d,
    /// Number of array elements (cubes for cube arrays). 1 for non-arrays.
    pub array_layers: u32,
    /// Mip level count.
    pub mip_level_count: u32,
    /// Sample count for multisampling.
    pub sample_count: u32,
    /// Requested texture format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a new 1D texture descriptor.
    pub fn new_1d(width: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::D1,
            size: Extent3d::new_1d(width),
            format,
            usage,
            ..Self::default()
        }
    }

    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::D2,
            size: Extent3d::new_2d(width, height),
            format,
            usage,
            ..Self::default()
        }
    }

    /// Create a new 2D array texture descriptor.
    pub fn new_2d_array(
        width: u32,
        height: u32,
        layers: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            texture_type: TextureType::D2Array,
            size: Extent3d::new_2d(width, height),
            array_layers: layers,
            format,
            usage,
            ..Self::default()
        }
    }

    /// Create a new cube map descriptor.
    pub fn new_cube(size: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::Cube,
            size: Extent3d::new_2d(size, size),
            format,
            usage,
            ..Self::default()
        }
    }

    /// Create a new 3D texture descriptor.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            texture_type: TextureType::D3,
            size: Extent3d::new_3d(width, height, depth),
            format,
            usage,
            ..Self::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Request the full mip chain down to 1x1(x1).
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_level_count = self.max_mip_levels();
        self
    }

    /// Set the sample count for multisampling.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Set the number of array elements.
    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    /// Length of the full mip chain for this size.
    pub fn max_mip_levels(&self) -> u32 {
        let largest = match self.texture_type {
            TextureType::D3 => self.size.max_dimension(),
            _ => self.size.width.max(self.size.height),
        };
        32 - largest.max(1).leading_zeros()
    }

    /// Number of native array layers (6 per cube).
    pub fn num_layers(&self) -> u32 {
        match self.texture_type {
            TextureType::D1 | TextureType::D2 | TextureType::D3 => 1,
            TextureType::D1Array | TextureType::D2Array => self.array_layers,
            TextureType::Cube => 6,
            TextureType::CubeArray => 6 * self.array_layers,
        }
    }

    /// Extent of the given mip level.
    pub fn mip_level_size(&self, mip_level: u32) -> Extent3d {
        self.size.mip_level_size(mip_level)
    }

    /// Check the descriptor for internal consistency.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let size = self.size;
        if size.width == 0 || size.height == 0 || size.depth == 0 {
            return Err(GraphicsError::InvalidParameter(
                "texture dimensions cannot be zero".to_string(),
            ));
        }
        match self.texture_type {
            TextureType::D1 | TextureType::D1Array if size.height != 1 || size.depth != 1 => {
                return Err(GraphicsError::InvalidParameter(
                    "1D textures must have height and depth of 1".to_string(),
                ));
            }
            TextureType::D2 | TextureType::D2Array if size.depth != 1 => {
                return Err(GraphicsError::InvalidParameter(
                    "2D textures must have a depth of 1".to_string(),
                ));
            }
            TextureType::Cube | TextureType::CubeArray
                if size.width != size.height || size.depth != 1 =>
            {
                return Err(GraphicsError::InvalidParameter(
                    "cube faces must be square with a depth of 1".to_string(),
                ));
            }
            _ => {}
        }
        if self.array_layers == 0 {
            return Err(GraphicsError::InvalidParameter(
                "array layer count cannot be zero".to_string(),
            ));
        }
        if !self.texture_type.is_array() && self.array_layers != 1 {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} textures cannot have {} array layers",
                self.texture_type, self.array_layers
            )));
        }
        if self.mip_level_count == 0 || self.mip_level_count > self.max_mip_levels() {
            return Err(GraphicsError::InvalidParameter(format!(
                "mip level count {} outside 1..={}",
                self.mip_level_count,
                self.max_mip_levels()
            )));
        }
        if !matches!(self.sample_count, 1 | 2 | 4 | 8) {
            return Err(GraphicsError::InvalidParameter(format!(
                "unsupported sample count {}",
                self.sample_count
            )));
        }
        if self.sample_count > 1
            && (!matches!(self.texture_type, TextureType::D2 | TextureType::D2Array)
                || self.mip_level_count != 1)
        {
            return Err(GraphicsError::InvalidParameter(
                "multisampled textures must be single-mip 2D textures".to_string(),
            ));
        }
        if self.usage.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "texture usage cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            texture_type: TextureType::D2,
            size: Extent3d::new_2d(1, 1),
            array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            format: TextureFormat::default(),
            usage: TextureUsage::empty(),
        }
    }
}

/// A sub-region of a texture used by uploads and readbacks.
///
/// Offsets and extents are in texels at `mip_level`. When a range spans
/// several mip levels it must cover each of them completely; the extents of
/// the following levels are derived by halving.
///
/// Data passed alongside a range is ordered mip-major: every layer of
/// `mip_level`, then every layer of `mip_level + 1`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRange {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// First array layer (cube faces count as layers).
    pub layer: u32,
    pub num_layers: u32,
    pub mip_level: u32,
    pub num_mip_levels: u32,
}

impl TextureRange {
    /// A 2D region of mip 0, layer 0.
    pub fn new_2d(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new_3d(x, y, 0, width, height, 1)
    }

    /// A 3D region of mip 0.
    pub fn new_3d(x: u32, y: u32, z: u32, width: u32, height: u32, depth: u32) -> Self {
        Self {
            x,
            y,
            z,
            width,
            height,
            depth,
            layer: 0,
            num_layers: 1,
            mip_level: 0,
            num_mip_levels: 1,
        }
    }

    /// The whole of one mip level, all layers.
    pub fn full_mip(descriptor: &TextureDescriptor, mip_level: u32) -> Self {
        let size = descriptor.mip_level_size(mip_level);
        Self {
            x: 0,
            y: 0,
            z: 0,
            width: size.width,
            height: size.height,
            depth: size.depth,
            layer: 0,
            num_layers: descriptor.num_layers(),
            mip_level,
            num_mip_levels: 1,
        }
    }

    /// Every texel of every mip level and layer.
    pub fn full(descriptor: &TextureDescriptor) -> Self {
        Self {
            num_mip_levels: descriptor.mip_level_count,
            ..Self::full_mip(descriptor, 0)
        }
    }

    /// Select the array layers.
    pub fn with_layers(mut self, layer: u32, num_layers: u32) -> Self {
        self.layer = layer;
        self.num_layers = num_layers;
        self
    }

    /// Select the mip levels.
    pub fn with_mip_levels(mut self, mip_level: u32, num_mip_levels: u32) -> Self {
        self.mip_level = mip_level;
        self.num_mip_levels = num_mip_levels;
        self
    }

    /// Extent of the region at `mip_level`.
    pub fn extent(&self) -> Extent3d {
        Extent3d::new_3d(self.width, self.height, self.depth)
    }

    /// Extent covered at `mip_level + offset`.
    pub fn extent_at(&self, offset: u32) -> Extent3d {
        self.extent().mip_level_size(offset)
    }

    /// Returns true if the region starts at mip 0 and covers the whole chain.
    pub fn covers_all_mips(&self, descriptor: &TextureDescriptor) -> bool {
        self.mip_level == 0 && self.num_mip_levels >= descriptor.mip_level_count
    }

    /// Check that the region lies inside the texture.
    pub fn validate_within(&self, descriptor: &TextureDescriptor) -> Result<(), GraphicsError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(GraphicsError::validation("range has an empty extent"));
        }
        if self.num_layers == 0 || self.num_mip_levels == 0 {
            return Err(GraphicsError::validation(
                "range must cover at least one layer and one mip level",
            ));
        }
        let mip_end = self.mip_level.saturating_add(self.num_mip_levels);
        if mip_end > descriptor.mip_level_count {
            return Err(GraphicsError::validation(format!(
                "mip levels {}..{} exceed texture mip count {}",
                self.mip_level, mip_end, descriptor.mip_level_count
            )));
        }
        let layer_end = self.layer.saturating_add(self.num_layers);
        if layer_end > descriptor.num_layers() {
            return Err(GraphicsError::validation(format!(
                "layers {}..{} exceed texture layer count {}",
                self.layer,
                layer_end,
                descriptor.num_layers()
            )));
        }
        let mip_size = descriptor.mip_level_size(self.mip_level);
        let fits = |offset: u32, len: u32, max: u32| {
            offset.checked_add(len).is_some_and(|end| end <= max)
        };
        if !fits(self.x, self.width, mip_size.width)
            || !fits(self.y, self.height, mip_size.height)
            || !fits(self.z, self.depth, mip_size.depth)
        {
            return Err(GraphicsError::validation(format!(
                "region {}x{}x{} at ({}, {}, {}) exceeds mip {} extent {}x{}x{}",
                self.width,
                self.height,
                self.depth,
                self.x,
                self.y,
                self.z,
                self.mip_level,
                mip_size.width,
                mip_size.height,
                mip_size.depth
            )));
        }
        if self.num_mip_levels > 1 && (self.x, self.y, self.z) != (0, 0, 0)
            || self.num_mip_levels > 1 && self.extent() != mip_size
        {
            return Err(GraphicsError::validation(
                "multi-mip ranges must cover each mip level completely",
            ));
        }
        Ok(())
    }

    /// Row pitch actually used for `mip_offset` given the caller's
    /// `bytes_per_row` (0 means tightly packed).
    pub fn row_pitch(&self, format: TextureFormat, bytes_per_row: u32, mip_offset: u32) -> u32 {
        let packed = self.extent_at(mip_offset).width * format.block_size();
        if bytes_per_row == 0 || mip_offset > 0 {
            packed
        } else {
            bytes_per_row
        }
    }

    /// Number of bytes a caller must provide for this region.
    pub fn byte_size(&self, format: TextureFormat, bytes_per_row: u32) -> u64 {
        (0..self.num_mip_levels)
            .map(|mip| {
                let extent = self.extent_at(mip);
                let pitch = self.row_pitch(format, bytes_per_row, mip) as u64;
                pitch * extent.height as u64 * extent.depth as u64 * self.num_layers as u64
            })
            .sum()
    }
}
