//! Staging layout for texture transfers.
//!
//! Callers hand over data ordered by mip, layer, depth slice and row, with a
//! caller-chosen row pitch for the first mip. GPU copies want every mip in a
//! separate, aligned block with a fixed row pitch. [`PackedLayout`] describes
//! that staging layout and [`PackedLayout::for_each_row`] maps rows between
//! the two.

use crate::types::{Extent3d, TextureFormat, TextureRange};

/// One mip level of a packed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackedMip {
    /// Offset relative to `range.mip_level`.
    pub mip_offset: u32,
    /// Byte offset of the mip block in the staging buffer.
    pub offset: u64,
    pub extent: Extent3d,
    /// Row pitch in the staging buffer.
    pub row_pitch: u32,
    /// Bytes of texel data per row.
    pub row_len: u32,
}

impl PackedMip {
    /// Rows in one layer of this mip.
    pub fn rows_per_image(&self) -> u32 {
        self.extent.height
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PackedLayout {
    pub mips: Vec<PackedMip>,
    /// Total staging buffer size.
    pub size: u64,
    layers: u32,
}

impl PackedLayout {
    /// Lay out `range` with row pitches aligned to `row_alignment` and mip
    /// blocks aligned to `offset_alignment` (both powers of two).
    pub fn new(
        range: &TextureRange,
        format: TextureFormat,
        row_alignment: u32,
        offset_alignment: u64,
    ) -> Self {
        let block_size = format.block_size();
        let mut mips = Vec::with_capacity(range.num_mip_levels as usize);
        let mut offset = 0u64;

        for mip_offset in 0..range.num_mip_levels {
            let extent = range.extent_at(mip_offset);
            let row_len = extent.width * block_size;
            let row_pitch = align_up(row_len as u64, row_alignment as u64) as u32;
            offset = align_up(offset, offset_alignment);
            mips.push(PackedMip {
                mip_offset,
                offset,
                extent,
                row_pitch,
                row_len,
            });
            offset += row_pitch as u64
                * extent.height as u64
                * extent.depth as u64
                * range.num_layers as u64;
        }

        Self {
            mips,
            size: offset.max(4),
            layers: range.num_layers,
        }
    }

    /// Visit every row as `(caller_offset, staging_offset, row_len)`.
    ///
    /// `bytes_per_row` is the caller's pitch for the first mip, 0 for tightly
    /// packed.
    pub fn for_each_row(
        &self,
        range: &TextureRange,
        format: TextureFormat,
        bytes_per_row: u32,
        mut f: impl FnMut(usize, usize, usize),
    ) {
        let mut cursor = 0usize;
        for mip in &self.mips {
            let caller_pitch = range.row_pitch(format, bytes_per_row, mip.mip_offset) as usize;
            let rows = mip.extent.height as usize * mip.extent.depth as usize * self.layers as usize;
            for row in 0..rows {
                let staging = mip.offset as usize + row * mip.row_pitch as usize;
                f(cursor, staging, mip.row_len as usize);
                cursor += caller_pitch;
            }
        }
    }
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TextureDescriptor, TextureUsage};

    #[test]
    fn test_single_mip_rows_are_realigned() {
        let range = TextureRange::new_2d(0, 0, 3, 2);
        let layout = PackedLayout::new(&range, TextureFormat::Rgba8Unorm, 256, 4);
        assert_eq!(layout.mips.len(), 1);
        assert_eq!(layout.mips[0].row_pitch, 256);
        assert_eq!(layout.mips[0].row_len, 12);
        assert_eq!(layout.size, 512);

        let mut rows = Vec::new();
        layout.for_each_row(&range, TextureFormat::Rgba8Unorm, 16, |src, dst, len| {
            rows.push((src, dst, len))
        });
        assert_eq!(rows, vec![(0, 0, 12), (16, 256, 12)]);
    }

    #[test]
    fn test_full_mip_chain_blocks_are_aligned() {
        let desc = TextureDescriptor::new_2d(
            4,
            4,
            TextureFormat::R8Unorm,
            TextureUsage::COPY_DST,
        )
        .with_full_mip_chain();
        let range = TextureRange::full(&desc);
        let layout = PackedLayout::new(&range, TextureFormat::R8Unorm, 1, 4);

        let offsets: Vec<u64> = layout.mips.iter().map(|m| m.offset).collect();
        // 4x4 = 16 bytes, 2x2 = 4 bytes, 1x1 = 1 byte
        assert_eq!(offsets, vec![0, 16, 20]);
        assert_eq!(layout.size, 21);

        let mut count = 0;
        let mut last_src = 0;
        layout.for_each_row(&range, TextureFormat::R8Unorm, 0, |src, _, _| {
            count += 1;
            last_src = src;
        });
        assert_eq!(count, 4 + 2 + 1);
        assert_eq!(last_src, 20);
    }

    #[test]
    fn test_layers_follow_each_other() {
        let range = TextureRange::new_2d(0, 0, 2, 2).with_layers(1, 2);
        let layout = PackedLayout::new(&range, TextureFormat::R32Float, 1, 4);
        assert_eq!(layout.size, 2 * 2 * 4 * 2);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(7, 1), 7);
    }
}
