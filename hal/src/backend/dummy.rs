//! Dummy GPU backend for testing and development.
//!
//! Textures live in CPU memory and submissions execute on a worker thread in
//! submission order. Render passes apply their clear load ops and resolves,
//! mip generation box-filters, and uploads and readbacks copy texels, so the
//! whole API can be exercised and checked without GPU hardware. Draws and
//! dispatches are only logged.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::command::SubmissionStatus;
use crate::command::recording::{
    AttachmentTarget, ComputeCommand, RecordedCommand, RecordedRenderPass, RenderCommand,
    Submission, TextureCopy,
};
use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, AdapterType, InstanceParameters};
use crate::resources::TextureStorage;
use crate::types::{
    Color, Extent3d, FramebufferMode, LoadOp, TextureDescriptor, TextureFormat, TextureRange,
    TextureType, TextureUsage,
};

use super::{GpuTexture, GpuTextureView};

/// CPU-side storage of one texture: one tightly packed byte buffer per
/// (mip level, layer). Depth slices of a volume share their mip's buffer.
pub(crate) struct DummyImage {
    format: TextureFormat,
    texture_type: TextureType,
    layers: u32,
    extents: Vec<Extent3d>,
    subresources: Mutex<Vec<Vec<u8>>>,
}

/// Texels addressed by one framebuffer view.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Region {
    mip_level: u32,
    layers: Range<u32>,
    slices: Range<u32>,
}

impl DummyImage {
    fn new(descriptor: &TextureDescriptor, format: TextureFormat) -> Self {
        let layers = descriptor.num_layers();
        let extents: Vec<Extent3d> = (0..descriptor.mip_level_count)
            .map(|mip| descriptor.mip_level_size(mip))
            .collect();
        let block_size = format.block_size() as usize;

        let mut subresources = Vec::with_capacity(extents.len() * layers as usize);
        for extent in &extents {
            for _ in 0..layers {
                subresources.push(vec![0u8; extent.texel_count() as usize * block_size]);
            }
        }

        Self {
            format,
            texture_type: descriptor.texture_type,
            layers,
            extents,
            subresources: Mutex::new(subresources),
        }
    }

    fn index(&self, mip_level: u32, layer: u32) -> usize {
        (mip_level * self.layers + layer) as usize
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        match self.subresources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn texel_offset(&self, mip_level: u32, x: u32, y: u32, z: u32) -> usize {
        let extent = self.extents[mip_level as usize];
        let texel = (z as usize * extent.height as usize + y as usize) * extent.width as usize
            + x as usize;
        texel * self.format.block_size() as usize
    }

    /// Region covered by a framebuffer view. For volumes the view's layers
    /// are depth slices.
    fn view_region(&self, mip_level: u32, base_layer: u32, layer_count: u32) -> Region {
        let end = base_layer + layer_count;
        if self.texture_type == TextureType::D3 {
            Region {
                mip_level,
                layers: 0..1,
                slices: base_layer..end,
            }
        } else {
            Region {
                mip_level,
                layers: base_layer..end,
                slices: 0..1,
            }
        }
    }

    /// Apply `f` to every texel of `region`.
    fn for_each_texel(&self, region: &Region, mut f: impl FnMut(&mut [u8])) {
        let block_size = self.format.block_size() as usize;
        let extent = self.extents[region.mip_level as usize];
        let slice_len = (extent.width * extent.height) as usize * block_size;
        let mut subresources = self.lock();

        for layer in region.layers.clone() {
            let data = &mut subresources[self.index(region.mip_level, layer)];
            for slice in region.slices.clone() {
                let start = slice as usize * slice_len;
                for texel in data[start..start + slice_len].chunks_exact_mut(block_size) {
                    f(texel);
                }
            }
        }
    }

    fn read_region(&self, region: &Region) -> Vec<u8> {
        let mut out = Vec::new();
        let extent = self.extents[region.mip_level as usize];
        let slice_len = (extent.width * extent.height) as usize * self.format.block_size() as usize;
        let subresources = self.lock();
        for layer in region.layers.clone() {
            let data = &subresources[self.index(region.mip_level, layer)];
            for slice in region.slices.clone() {
                let start = slice as usize * slice_len;
                out.extend_from_slice(&data[start..start + slice_len]);
            }
        }
        out
    }

    fn write_region(&self, region: &Region, bytes: &[u8]) {
        let extent = self.extents[region.mip_level as usize];
        let slice_len = (extent.width * extent.height) as usize * self.format.block_size() as usize;
        let mut chunks = bytes.chunks_exact(slice_len);
        let mut subresources = self.lock();
        for layer in region.layers.clone() {
            let index = self.index(region.mip_level, layer);
            for slice in region.slices.clone() {
                let Some(chunk) = chunks.next() else {
                    return;
                };
                let start = slice as usize * slice_len;
                subresources[index][start..start + slice_len].copy_from_slice(chunk);
            }
        }
    }

    /// Visit every row of a transfer region in the order of the caller's
    /// buffer: mip, layer, depth slice, row.
    fn for_each_row(
        &self,
        range: &TextureRange,
        bytes_per_row: u32,
        mut f: impl FnMut(&mut Vec<u8>, usize, usize, usize),
    ) {
        let block_size = self.format.block_size() as usize;
        let mut subresources = self.lock();
        let mut cursor = 0usize;

        for mip_offset in 0..range.num_mip_levels {
            let mip_level = range.mip_level + mip_offset;
            let extent = range.extent_at(mip_offset);
            let pitch = range.row_pitch(self.format, bytes_per_row, mip_offset) as usize;
            let row_len = extent.width as usize * block_size;
            let (ox, oy, oz) = if mip_offset == 0 {
                (range.x, range.y, range.z)
            } else {
                (0, 0, 0)
            };

            for layer in range.layer..range.layer + range.num_layers {
                let index = self.index(mip_level, layer);
                for z in 0..extent.depth {
                    for y in 0..extent.height {
                        let texel = self.texel_offset(mip_level, ox, oy + y, oz + z);
                        f(&mut subresources[index], texel, cursor, row_len);
                        cursor += pitch;
                    }
                }
            }
        }
    }

    /// Rebuild every mip level below the first from its parent.
    fn generate_mips(&self) {
        let mut subresources = self.lock();
        for mip_level in 1..self.extents.len() as u32 {
            let src_extent = self.extents[mip_level as usize - 1];
            let dst_extent = self.extents[mip_level as usize];
            for layer in 0..self.layers {
                let dst = downsample(
                    &subresources[self.index(mip_level - 1, layer)],
                    src_extent,
                    dst_extent,
                    self.format,
                );
                subresources[self.index(mip_level, layer)] = dst;
            }
        }
    }
}

impl std::fmt::Debug for DummyImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyImage")
            .field("format", &self.format)
            .field("texture_type", &self.texture_type)
            .field("layers", &self.layers)
            .field("mips", &self.extents.len())
            .finish()
    }
}

/// How texels of a format are averaged during mip generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelKind {
    U8,
    I8,
    U16,
    U32,
    F32,
    /// Packed or half-float data: the first texel of the footprint is kept.
    Nearest,
}

impl ChannelKind {
    fn of(format: TextureFormat) -> Self {
        use TextureFormat::*;
        match format {
            R8Unorm | R8Uint | Rg8Unorm | Rgba8Unorm | Rgba8UnormSrgb | Bgra8Unorm
            | Bgra8UnormSrgb | Stencil8 => Self::U8,
            R8Snorm | R8Sint => Self::I8,
            R16Unorm | Depth16Unorm => Self::U16,
            R32Uint => Self::U32,
            R32Float | Rg32Float | Rgba32Float | Depth32Float => Self::F32,
            _ => Self::Nearest,
        }
    }

    fn average(self, src: &[u8], offsets: &[usize], out: &mut [u8]) {
        let n = offsets.len().max(1);
        match self {
            Self::U8 => {
                for (c, byte) in out.iter_mut().enumerate() {
                    let sum: usize = offsets.iter().map(|&o| src[o + c] as usize).sum();
                    *byte = ((sum + n / 2) / n) as u8;
                }
            }
            Self::I8 => {
                for (c, byte) in out.iter_mut().enumerate() {
                    let sum: i32 = offsets.iter().map(|&o| src[o + c] as i8 as i32).sum();
                    *byte = (sum as f32 / n as f32).round() as i8 as u8;
                }
            }
            Self::U16 => {
                for c in (0..out.len()).step_by(2) {
                    let sum: u32 = offsets
                        .iter()
                        .map(|&o| bytemuck::pod_read_unaligned::<u16>(&src[o + c..o + c + 2]) as u32)
                        .sum();
                    let avg = ((sum + n as u32 / 2) / n as u32) as u16;
                    out[c..c + 2].copy_from_slice(bytemuck::bytes_of(&avg));
                }
            }
            Self::U32 => {
                for c in (0..out.len()).step_by(4) {
                    let sum: u64 = offsets
                        .iter()
                        .map(|&o| bytemuck::pod_read_unaligned::<u32>(&src[o + c..o + c + 4]) as u64)
                        .sum();
                    let avg = ((sum + n as u64 / 2) / n as u64) as u32;
                    out[c..c + 4].copy_from_slice(bytemuck::bytes_of(&avg));
                }
            }
            Self::F32 => {
                for c in (0..out.len()).step_by(4) {
                    let sum: f32 = offsets
                        .iter()
                        .map(|&o| bytemuck::pod_read_unaligned::<f32>(&src[o + c..o + c + 4]))
                        .sum();
                    let avg = sum / n as f32;
                    out[c..c + 4].copy_from_slice(bytemuck::bytes_of(&avg));
                }
            }
            Self::Nearest => {
                if let Some(&first) = offsets.first() {
                    out.copy_from_slice(&src[first..first + out.len()]);
                }
            }
        }
    }
}

/// Box-filter `src` down to `dst_extent`. Odd edges clamp to the last texel.
fn downsample(
    src: &[u8],
    src_extent: Extent3d,
    dst_extent: Extent3d,
    format: TextureFormat,
) -> Vec<u8> {
    let block_size = format.block_size() as usize;
    let kind = ChannelKind::of(format);
    let mut dst = vec![0u8; dst_extent.texel_count() as usize * block_size];
    let mut offsets = Vec::with_capacity(8);

    let footprint = |d: u32, len: u32| (d * 2).min(len - 1)..=(d * 2 + 1).min(len - 1);
    let offset = |e: Extent3d, x: u32, y: u32, z: u32| {
        ((z as usize * e.height as usize + y as usize) * e.width as usize + x as usize)
            * block_size
    };

    for z in 0..dst_extent.depth {
        for y in 0..dst_extent.height {
            for x in 0..dst_extent.width {
                offsets.clear();
                for sz in footprint(z, src_extent.depth) {
                    for sy in footprint(y, src_extent.height) {
                        for sx in footprint(x, src_extent.width) {
                            offsets.push(offset(src_extent, sx, sy, sz));
                        }
                    }
                }
                let out = offset(dst_extent, x, y, z);
                kind.average(src, &offsets, &mut dst[out..out + block_size]);
            }
        }
    }
    dst
}

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// IEEE 754 half-precision bits of `value`, rounded to nearest.
fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x7f_ffff;

    if exp == 0xff {
        let nan = if mantissa != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | nan;
    }
    let exp16 = exp - 127 + 15;
    if exp16 >= 0x1f {
        return sign | 0x7c00;
    }
    if exp16 <= 0 {
        if exp16 < -10 {
            return sign;
        }
        let shift = (14 - exp16) as u32;
        return sign | ((mantissa | 0x80_0000) >> shift) as u16;
    }
    // A carry out of the mantissa correctly bumps the exponent.
    sign | (((exp16 as u32) << 10) + ((mantissa + 0x1000) >> 13)) as u16
}

/// Texel bytes of `color` in `format`. Depth/stencil formats encode zero.
fn encode_color(format: TextureFormat, color: Color) -> Vec<u8> {
    use TextureFormat::*;
    let [r, g, b, a] = color.to_array();
    match format {
        R8Unorm => vec![unorm8(r)],
        R8Snorm => vec![(r.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8],
        R8Uint => vec![r as u8],
        R8Sint => vec![r as i8 as u8],
        R16Unorm => bytemuck::bytes_of(&((r.clamp(0.0, 1.0) * 65535.0).round() as u16)).to_vec(),
        R16Float => bytemuck::bytes_of(&f32_to_f16(r)).to_vec(),
        Rg8Unorm => vec![unorm8(r), unorm8(g)],
        R32Float => bytemuck::bytes_of(&r).to_vec(),
        R32Uint => bytemuck::bytes_of(&(r as u32)).to_vec(),
        Rg16Float => bytemuck::cast_slice(&[f32_to_f16(r), f32_to_f16(g)]).to_vec(),
        Rgba8Unorm => [r, g, b, a].map(unorm8).to_vec(),
        Rgba8UnormSrgb => [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b), a]
            .map(unorm8)
            .to_vec(),
        Bgra8Unorm => [b, g, r, a].map(unorm8).to_vec(),
        Bgra8UnormSrgb => [linear_to_srgb(b), linear_to_srgb(g), linear_to_srgb(r), a]
            .map(unorm8)
            .to_vec(),
        Rgba16Float => bytemuck::cast_slice(&[r, g, b, a].map(f32_to_f16)).to_vec(),
        Rg32Float => bytemuck::cast_slice(&[r, g]).to_vec(),
        Rgba32Float => bytemuck::cast_slice(&[r, g, b, a]).to_vec(),
        _ => vec![0; format.block_size() as usize],
    }
}

/// Write the depth part of a depth/stencil texel.
fn write_depth(format: TextureFormat, depth: f32, texel: &mut [u8]) {
    let depth = depth.clamp(0.0, 1.0);
    match format {
        TextureFormat::Depth16Unorm => {
            let value = (depth * 65535.0).round() as u16;
            texel[..2].copy_from_slice(bytemuck::bytes_of(&value));
        }
        TextureFormat::Depth24Plus | TextureFormat::Depth24PlusStencil8 => {
            let value = (depth * 16_777_215.0).round() as u32;
            texel[..3].copy_from_slice(&bytemuck::bytes_of(&value)[..3]);
        }
        TextureFormat::Depth32Float | TextureFormat::Depth32FloatStencil8 => {
            texel[..4].copy_from_slice(bytemuck::bytes_of(&depth));
        }
        _ => {}
    }
}

/// Write the stencil part of a depth/stencil texel.
fn write_stencil(format: TextureFormat, stencil: u32, texel: &mut [u8]) {
    let offset = match format {
        TextureFormat::Stencil8 => 0,
        TextureFormat::Depth24PlusStencil8 => 3,
        TextureFormat::Depth32FloatStencil8 => 4,
        _ => return,
    };
    texel[offset] = stencil as u8;
}

/// Count of submissions not yet retired, for `wait_idle`.
#[derive(Default)]
struct PendingWork {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingWork {
    fn lock(&self) -> MutexGuard<'_, usize> {
        match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn begin(&self) {
        *self.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = match self.idle.wait(count) {
                Ok(count) => count,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn count(&self) -> usize {
        *self.lock()
    }
}

/// Dummy GPU backend.
pub struct DummyBackend {
    unsupported_formats: Vec<TextureFormat>,
    sender: Option<mpsc::Sender<Submission>>,
    worker: Option<JoinHandle<()>>,
    pending: Arc<PendingWork>,
    /// Once set, every submission fails with [`GraphicsError::DeviceLost`].
    lost: AtomicBool,
}

impl DummyBackend {
    /// Create a dummy backend with a worker thread.
    pub fn new() -> Self {
        Self::with_unsupported_formats(Vec::new())
    }

    pub(crate) fn with_params(params: &InstanceParameters) -> Self {
        Self::with_unsupported_formats(params.dummy_unsupported_formats.clone())
    }

    fn with_unsupported_formats(unsupported_formats: Vec<TextureFormat>) -> Self {
        let pending = Arc::new(PendingWork::default());
        let (sender, receiver) = mpsc::channel::<Submission>();

        let worker_pending = Arc::clone(&pending);
        let spawned = std::thread::Builder::new()
            .name("redlilium-hal-dummy".to_string())
            .spawn(move || {
                while let Ok(submission) = receiver.recv() {
                    run_submission(submission, &worker_pending);
                }
                log::trace!("DummyBackend: worker thread exiting");
            });

        let (sender, worker) = match spawned {
            Ok(worker) => (Some(sender), Some(worker)),
            Err(err) => {
                log::warn!("DummyBackend: no worker thread ({err}), executing inline");
                (None, None)
            }
        };

        log::info!("DummyBackend created");
        Self {
            unsupported_formats,
            sender,
            worker,
            pending,
            lost: AtomicBool::new(false),
        }
    }

    pub(crate) fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: "Dummy Adapter".to_string(),
            vendor: "RedLilium".to_string(),
            device_type: AdapterType::Software,
        }
    }

    pub(crate) fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    pub(crate) fn supports_format(
        &self,
        format: TextureFormat,
        _usage: TextureUsage,
        sample_count: u32,
        _texture_type: TextureType,
    ) -> bool {
        !self.unsupported_formats.contains(&format) && matches!(sample_count, 1 | 2 | 4 | 8)
    }

    pub(crate) fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        format: TextureFormat,
    ) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{}, {:?})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth,
            format
        );
        Ok(GpuTexture::Dummy(DummyImage::new(descriptor, format)))
    }

    pub(crate) fn create_framebuffer_view(
        &self,
        mip_level: u32,
        layer: u32,
        mode: FramebufferMode,
    ) -> GpuTextureView {
        GpuTextureView::Dummy {
            mip_level,
            base_layer: layer,
            layer_count: mode.layer_count(),
        }
    }

    pub(crate) fn upload_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        let image = dummy_image(texture)?;
        // Transfers are ordered after earlier submissions.
        self.wait_idle();
        image.for_each_row(range, bytes_per_row, |subresource, texel, cursor, row_len| {
            subresource[texel..texel + row_len].copy_from_slice(&data[cursor..cursor + row_len]);
        });
        Ok(())
    }

    pub(crate) fn read_texture(
        &self,
        texture: &TextureStorage,
        range: &TextureRange,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        let image = dummy_image(texture)?;
        self.wait_idle();
        image.for_each_row(range, bytes_per_row, |subresource, texel, cursor, row_len| {
            out[cursor..cursor + row_len].copy_from_slice(&subresource[texel..texel + row_len]);
        });
        Ok(())
    }

    pub(crate) fn submit(&self, submission: Submission) -> Result<(), GraphicsError> {
        if self.lost.load(Ordering::Acquire) {
            log::error!("DummyBackend: {} rejected, device lost", submission.id);
            return Err(GraphicsError::DeviceLost);
        }
        self.pending.begin();
        let Some(sender) = &self.sender else {
            run_submission(submission, &self.pending);
            return Ok(());
        };
        if let Err(mpsc::SendError(submission)) = sender.send(submission) {
            log::warn!("DummyBackend: worker thread gone, executing inline");
            run_submission(submission, &self.pending);
        }
        Ok(())
    }

    pub(crate) fn wait_idle(&self) {
        self.pending.wait_idle();
    }

    /// Simulate a lost device: later submissions are rejected.
    #[cfg(test)]
    pub(crate) fn lose_device(&self) {
        self.lost.store(true, Ordering::Release);
    }

    /// Number of submissions not yet completed.
    pub fn pending_submissions(&self) -> usize {
        self.pending.count()
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DummyBackend {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            // The last reference can be released by the worker itself when it
            // retires a submission; it exits on its own once the channel closes.
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                log::error!("DummyBackend: worker thread panicked");
            }
        }
        log::info!("DummyBackend destroyed");
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("unsupported_formats", &self.unsupported_formats)
            .field("pending", &self.pending.count())
            .finish()
    }
}

fn dummy_image(texture: &TextureStorage) -> Result<&DummyImage, GraphicsError> {
    texture.gpu().dummy_image().ok_or_else(|| {
        GraphicsError::Internal(format!(
            "texture {} is not a dummy texture",
            texture.id()
        ))
    })
}

fn run_submission(submission: Submission, pending: &PendingWork) {
    crate::profile_scope!("dummy_execute");
    let id = submission.id;
    submission.state.advance(SubmissionStatus::Scheduled);
    execute(&submission);
    submission.state.advance(SubmissionStatus::Completed);
    // Release the textures before reporting idle.
    drop(submission);
    pending.finish();
    log::trace!("DummyBackend: {id} completed");
}

fn execute(submission: &Submission) {
    log::trace!(
        "DummyBackend: executing {} ({:?}, {} commands)",
        submission.id,
        submission.label,
        submission.commands.len()
    );
    for command in &submission.commands {
        match command {
            RecordedCommand::RenderPass(pass) => execute_render_pass(pass),
            RecordedCommand::ComputePass(pass) => {
                let dispatches = pass
                    .commands
                    .iter()
                    .filter(|c| matches!(c, ComputeCommand::Dispatch { .. }))
                    .count();
                log::trace!(
                    "DummyBackend: compute pass {:?} with {dispatches} dispatches",
                    pass.label
                );
            }
            RecordedCommand::PushDebugGroup { label, .. } => {
                log::trace!("DummyBackend: push debug group {label:?}");
            }
            RecordedCommand::PopDebugGroup => log::trace!("DummyBackend: pop debug group"),
            RecordedCommand::GenerateMipmaps(texture) => {
                if let Some(image) = texture.gpu().dummy_image() {
                    image.generate_mips();
                }
            }
            RecordedCommand::CopyTexture(copy) => execute_copy(copy),
        }
    }
    if let Some(texture) = &submission.present {
        log::trace!("DummyBackend: presented texture {}", texture.id());
    }
}

fn execute_copy(copy: &TextureCopy) {
    let (Some(source), Some(destination)) = (
        copy.source.gpu().dummy_image(),
        copy.destination.gpu().dummy_image(),
    ) else {
        return;
    };
    let mut texels = vec![0u8; copy.range.byte_size(copy.source.format(), 0) as usize];
    source.for_each_row(&copy.range, 0, |subresource, texel, cursor, row_len| {
        texels[cursor..cursor + row_len].copy_from_slice(&subresource[texel..texel + row_len]);
    });
    destination.for_each_row(&copy.range, 0, |subresource, texel, cursor, row_len| {
        subresource[texel..texel + row_len].copy_from_slice(&texels[cursor..cursor + row_len]);
    });
}

/// Image and view region of a resolved attachment.
fn target_region(target: &AttachmentTarget) -> Option<(&DummyImage, Region)> {
    let image = target.texture.gpu().dummy_image()?;
    let region = target
        .view
        .with_native(|native| match native {
            GpuTextureView::Dummy {
                mip_level,
                base_layer,
                layer_count,
            } => Some(image.view_region(*mip_level, *base_layer, *layer_count)),
            #[allow(unreachable_patterns)]
            _ => None,
        })
        .flatten()?;
    Some((image, region))
}

fn execute_render_pass(pass: &RecordedRenderPass) {
    crate::profile_scope!("dummy_render_pass");

    for (index, target) in pass.color_targets.iter().enumerate() {
        let Some(target) = target else { continue };
        let Some(attachment) = pass.descriptor.color_attachments.get(index) else {
            continue;
        };
        let Some((image, region)) = target_region(target) else {
            continue;
        };

        if attachment.load_op == LoadOp::Clear {
            let texel = encode_color(target.texture.format(), attachment.clear_color);
            image.for_each_texel(&region, |t| t.copy_from_slice(&texel));
        }

        if let Some(Some(resolve)) = pass.resolve_targets.get(index)
            && let Some((resolve_image, resolve_region)) = target_region(resolve)
        {
            resolve_image.write_region(&resolve_region, &image.read_region(&region));
        }
    }

    let depth = &pass.descriptor.depth_attachment;
    if let Some(target) = &pass.depth_target
        && depth.load_op == LoadOp::Clear
        && let Some((image, region)) = target_region(target)
    {
        let format = target.texture.format();
        image.for_each_texel(&region, |t| write_depth(format, depth.clear_depth, t));
    }
    if let Some(target) = &pass.depth_target
        && let Some(resolve) = &pass.depth_resolve_target
        && let Some((image, region)) = target_region(target)
        && let Some((resolve_image, resolve_region)) = target_region(resolve)
    {
        resolve_image.write_region(&resolve_region, &image.read_region(&region));
    }

    let stencil = &pass.descriptor.stencil_attachment;
    if let Some(target) = &pass.stencil_target
        && stencil.load_op == LoadOp::Clear
        && let Some((image, region)) = target_region(target)
    {
        let format = target.texture.format();
        image.for_each_texel(&region, |t| write_stencil(format, stencil.clear_stencil, t));
    }

    let draws = pass
        .commands
        .iter()
        .filter(|c| matches!(c, RenderCommand::Draw { .. }))
        .count();
    log::trace!(
        "DummyBackend: render pass {:?} {}x{} with {draws} draws",
        pass.descriptor.label,
        pass.width,
        pass.height
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{SubmissionId, SubmissionState};

    fn image(desc: &TextureDescriptor) -> DummyImage {
        DummyImage::new(desc, desc.format)
    }

    #[test]
    fn test_f16_conversion() {
        assert_eq!(f32_to_f16(0.0), 0x0000);
        assert_eq!(f32_to_f16(1.0), 0x3c00);
        assert_eq!(f32_to_f16(-2.0), 0xc000);
        assert_eq!(f32_to_f16(0.5), 0x3800);
        assert_eq!(f32_to_f16(f32::INFINITY), 0x7c00);
        assert_eq!(f32_to_f16(1.0e6), 0x7c00);
    }

    #[test]
    fn test_encode_color() {
        assert_eq!(encode_color(TextureFormat::Rgba8Unorm, Color::RED), vec![255, 0, 0, 255]);
        assert_eq!(encode_color(TextureFormat::Bgra8Unorm, Color::RED), vec![0, 0, 255, 255]);
        assert_eq!(encode_color(TextureFormat::R8Unorm, Color::new(0.5, 0.0, 0.0, 1.0)), vec![128]);
        assert_eq!(
            encode_color(TextureFormat::R32Float, Color::new(0.25, 0.0, 0.0, 0.0)),
            0.25f32.to_ne_bytes().to_vec()
        );
        assert_eq!(
            encode_color(TextureFormat::Rgba16Float, Color::WHITE).len(),
            TextureFormat::Rgba16Float.block_size() as usize
        );
    }

    #[test]
    fn test_box_filter_u8() {
        let src = [0u8, 100, 200, 100];
        let dst = downsample(
            &src,
            Extent3d::new_2d(2, 2),
            Extent3d::new_2d(1, 1),
            TextureFormat::R8Unorm,
        );
        assert_eq!(dst, vec![100]);
    }

    #[test]
    fn test_box_filter_f32_odd_width() {
        let src: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 3.0, 100.0]).to_vec();
        let dst = downsample(
            &src,
            Extent3d::new_2d(3, 1),
            Extent3d::new_2d(1, 1),
            TextureFormat::R32Float,
        );
        assert_eq!(bytemuck::pod_read_unaligned::<f32>(&dst), 2.0);
    }

    #[test]
    fn test_box_filter_volume_averages_slices() {
        let src = [10u8, 10, 10, 10, 30, 30, 30, 30];
        let dst = downsample(
            &src,
            Extent3d::new_3d(2, 2, 2),
            Extent3d::new_3d(1, 1, 1),
            TextureFormat::R8Unorm,
        );
        assert_eq!(dst, vec![20]);
    }

    #[test]
    fn test_depth_stencil_texels() {
        let mut texel = [0u8; 4];
        write_depth(TextureFormat::Depth24PlusStencil8, 1.0, &mut texel);
        write_stencil(TextureFormat::Depth24PlusStencil8, 7, &mut texel);
        assert_eq!(texel, [0xff, 0xff, 0xff, 7]);

        let mut texel = [0u8; 4];
        write_depth(TextureFormat::Depth32Float, 0.5, &mut texel);
        assert_eq!(bytemuck::pod_read_unaligned::<f32>(&texel), 0.5);
    }

    #[test]
    fn test_view_region_of_volume_is_slices() {
        let desc = TextureDescriptor::new_3d(
            4,
            4,
            4,
            TextureFormat::R8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        );
        let volume = image(&desc);
        let region = volume.view_region(0, 2, 2);
        assert_eq!(region.layers, 0..1);
        assert_eq!(region.slices, 2..4);

        volume.for_each_texel(&region, |t| t[0] = 9);
        let bytes = volume.read_region(&volume.view_region(0, 0, 4));
        assert_eq!(&bytes[..32], &[0u8; 32]);
        assert_eq!(&bytes[32..], &[9u8; 32]);
    }

    #[test]
    fn test_generate_mips_per_layer() {
        let desc = TextureDescriptor::new_2d_array(
            2,
            2,
            2,
            TextureFormat::R8Unorm,
            TextureUsage::COPY_DST,
        )
        .with_mip_levels(2);
        let img = image(&desc);
        img.write_region(&img.view_region(0, 0, 1), &[4, 4, 4, 4]);
        img.write_region(&img.view_region(0, 1, 1), &[8, 8, 8, 8]);
        img.generate_mips();
        assert_eq!(img.read_region(&img.view_region(1, 0, 1)), vec![4]);
        assert_eq!(img.read_region(&img.view_region(1, 1, 1)), vec![8]);
    }

    #[test]
    fn test_submissions_complete_in_order() {
        let backend = DummyBackend::new();
        let states: Vec<Arc<SubmissionState>> =
            (0..4).map(|_| Arc::new(SubmissionState::new())).collect();
        for (i, state) in states.iter().enumerate() {
            backend
                .submit(Submission {
                    id: SubmissionId(i as u64 + 1),
                    label: None,
                    commands: Vec::new(),
                    present: None,
                    state: Arc::clone(state),
                })
                .unwrap();
        }
        backend.wait_idle();
        assert_eq!(backend.pending_submissions(), 0);
        for state in &states {
            assert_eq!(state.status(), SubmissionStatus::Completed);
        }
    }

    #[test]
    fn test_lost_device_rejects_submissions() {
        let backend = DummyBackend::new();
        backend.lose_device();
        let state = Arc::new(SubmissionState::new());
        let result = backend.submit(Submission {
            id: SubmissionId(1),
            label: None,
            commands: Vec::new(),
            present: None,
            state: Arc::clone(&state),
        });
        assert!(matches!(result, Err(GraphicsError::DeviceLost)));
        assert_eq!(backend.pending_submissions(), 0);
    }

    #[test]
    fn test_unsupported_formats() {
        let params = InstanceParameters::new().with_dummy_unsupported_format(TextureFormat::Depth24Plus);
        let backend = DummyBackend::with_params(&params);
        assert!(!backend.supports_format(
            TextureFormat::Depth24Plus,
            TextureUsage::RENDER_ATTACHMENT,
            1,
            TextureType::D2
        ));
        assert!(backend.supports_format(
            TextureFormat::Depth32Float,
            TextureUsage::RENDER_ATTACHMENT,
            1,
            TextureType::D2
        ));
        assert!(!backend.supports_format(
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
            3,
            TextureType::D2
        ));
    }
}
