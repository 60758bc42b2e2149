use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc;

use crate::device::Gpu;
use crate::interop::{
    FilterMode, GraphicsDevice, InteropError, InternalFormat, Result, TextureDescription,
};

/// Usages every g-buffer attachment carries: render target, sampled, and both
/// copy directions for pixel transfers.
const TEXTURE_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

const BUFFER_USAGES: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Maps a description onto a wgpu texture format.
///
/// WebGPU has no three-channel formats, so `Rgb*` descriptions are refused.
pub fn texture_format(desc: &TextureDescription) -> Result<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    let format = match desc.internal_format() {
        InternalFormat::R8 => F::R8Unorm,
        InternalFormat::Rg8 => F::Rg8Unorm,
        InternalFormat::Rgba8 => F::Rgba8Unorm,
        InternalFormat::R32I => F::R32Sint,
        InternalFormat::Rg32I => F::Rg32Sint,
        InternalFormat::Rgba32I => F::Rgba32Sint,
        InternalFormat::R32F => F::R32Float,
        InternalFormat::Rg32F => F::Rg32Float,
        InternalFormat::Rgba32F => F::Rgba32Float,
        other @ (InternalFormat::Rgb8 | InternalFormat::Rgb32I | InternalFormat::Rgb32F) => {
            return Err(InteropError::UnsupportedFormat(format!(
                "{other:?} has no wgpu texture format"
            )));
        }
    };
    Ok(format)
}

/// Refuses formats the adapter cannot use with every g-buffer usage.
///
/// Downlevel adapters (GL, WebGL) cannot render to some float formats.
pub(crate) fn check_usages(
    format: wgpu::TextureFormat,
    allowed: wgpu::TextureUsages,
    label: &str,
) -> Result<()> {
    let missing = TEXTURE_USAGES.difference(allowed);
    if !missing.is_empty() {
        return Err(InteropError::UnsupportedFormat(format!(
            "texture '{label}': {format:?} does not allow {missing:?} on this adapter"
        )));
    }
    Ok(())
}

fn filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

/// Sampler for a texture, following the description's filters.
pub(crate) fn sampler_descriptor<'a>(
    desc: &TextureDescription,
    label: &'a str,
) -> wgpu::SamplerDescriptor<'a> {
    wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter(desc.mag_filter()),
        min_filter: filter(desc.min_filter()),
        ..Default::default()
    }
}

/// How a texture↔buffer copy is split into commands.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum CopyPlan {
    /// One command; rows are already 256-byte aligned.
    Whole { bytes_per_row: u32 },
    /// One command per row keeps the buffer tightly packed. Single-row copies
    /// need no pitch at all.
    PerRow { row_bytes: u32 },
}

pub(crate) fn copy_plan(desc: &TextureDescription) -> CopyPlan {
    let row_bytes = desc.row_bytes() as u32;
    if row_bytes % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT == 0 && desc.height() > 1 {
        CopyPlan::Whole {
            bytes_per_row: row_bytes,
        }
    } else {
        CopyPlan::PerRow { row_bytes }
    }
}

/// One texture↔buffer copy command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct CopyRegion {
    /// First texture row.
    pub y: u32,
    pub rows: u32,
    /// Byte offset of row `y` in the buffer.
    pub offset: u64,
    pub bytes_per_row: Option<u32>,
}

/// Expands [`copy_plan`] into commands. Rows land at `y × row_bytes` either way.
pub(crate) fn copy_regions(desc: &TextureDescription) -> Vec<CopyRegion> {
    match copy_plan(desc) {
        CopyPlan::Whole { bytes_per_row } => vec![CopyRegion {
            y: 0,
            rows: desc.height(),
            offset: 0,
            bytes_per_row: Some(bytes_per_row),
        }],
        CopyPlan::PerRow { row_bytes } => (0..desc.height())
            .map(|y| CopyRegion {
                y,
                rows: 1,
                offset: y as u64 * row_bytes as u64,
                bytes_per_row: None,
            })
            .collect(),
    }
}

/// Align number to WebGPU's copy row alignment (256 bytes).
fn align_bpr(value: u32) -> u32 {
    value.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Buffer copies and mapped ranges work in 4-byte units.
fn align4(value: u64) -> u64 {
    value.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    format: wgpu::TextureFormat,
}

impl WgpuTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

/// Storage buffer backing a transfer buffer.
///
/// `id` is unique per allocation; the physical size is rounded up to 4 bytes.
pub struct WgpuBuffer {
    buffer: Rc<wgpu::Buffer>,
    id: u64,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub(crate) fn shared(&self) -> &Rc<wgpu::Buffer> {
        &self.buffer
    }

    pub fn allocated_size(&self) -> u64 {
        self.buffer.size()
    }
}

/// wgpu graphics device. Clones share the adapter, device, queue and id counter.
#[derive(Clone)]
pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_buffer_id: Rc<Cell<u64>>,
}

impl WgpuDevice {
    pub fn new(gpu: &Gpu) -> Self {
        Self::from_parts(
            gpu.adapter().clone(),
            gpu.device().clone(),
            gpu.queue().clone(),
        )
    }

    /// `device` must have been requested from `adapter`.
    pub fn from_parts(adapter: wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            adapter,
            device,
            queue,
            next_buffer_id: Rc::new(Cell::new(0)),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Blocks until all submitted work has completed.
    pub fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| InteropError::Device(format!("device poll failed: {e}")))
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn staging(&self, size: u64, label: &str) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }

    /// Maps a MAP_READ staging buffer and copies `len` bytes out.
    fn map_read(&self, staging: &wgpu::Buffer, len: usize) -> Result<Vec<u8>> {
        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait()?;

        receiver
            .recv()
            .map_err(|_| InteropError::Device("map_async callback dropped".into()))?
            .map_err(|e| InteropError::Device(format!("buffer map failed: {e}")))?;

        let bytes = slice.get_mapped_range()[..len].to_vec();
        staging.unmap();
        Ok(bytes)
    }

    /// Blocking readback of `size` bytes at `offset` of any COPY_SRC buffer.
    pub(crate) fn read_raw(&self, buffer: &wgpu::Buffer, offset: u64, size: u64) -> Result<Vec<u8>> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || offset + align4(size) > buffer.size() {
            return Err(InteropError::Device(format!(
                "read of {size} bytes at {offset} outside buffer of {} bytes",
                buffer.size()
            )));
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let staging = self.staging(align4(size), "rasterlab buffer readback");
        let mut encoder = self.encoder("rasterlab buffer readback encoder");
        encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, align4(size));
        self.queue.submit(std::iter::once(encoder.finish()));
        self.map_read(&staging, size as usize)
    }

    fn texture_copy<'a>(texture: &'a WgpuTexture, y: u32) -> wgpu::TexelCopyTextureInfo<'a> {
        wgpu::TexelCopyTextureInfo {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: 0, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        }
    }

    fn check_fits(buffer: &WgpuBuffer, desc: &TextureDescription) -> Result<()> {
        if buffer.allocated_size() < desc.byte_size() {
            return Err(InteropError::Device(format!(
                "buffer of {} bytes cannot hold {} bytes of pixels",
                buffer.allocated_size(),
                desc.byte_size()
            )));
        }
        Ok(())
    }

    /// Records texture↔buffer copies following [`copy_plan`].
    fn encode_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &WgpuTexture,
        buffer: &wgpu::Buffer,
        desc: &TextureDescription,
        to_buffer: bool,
    ) {
        for region in copy_regions(desc) {
            let buffer_info = wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: region.offset,
                    bytes_per_row: region.bytes_per_row,
                    rows_per_image: Some(region.rows),
                },
            };
            let extent = wgpu::Extent3d {
                width: desc.width(),
                height: region.rows,
                depth_or_array_layers: 1,
            };
            let texture_info = Self::texture_copy(texture, region.y);
            if to_buffer {
                encoder.copy_texture_to_buffer(texture_info, buffer_info, extent);
            } else {
                encoder.copy_buffer_to_texture(buffer_info, texture_info, extent);
            }
        }
    }
}

impl GraphicsDevice for WgpuDevice {
    type Texture = WgpuTexture;
    type Buffer = WgpuBuffer;

    fn create_texture(&self, desc: &TextureDescription, label: &str) -> Result<WgpuTexture> {
        let format = texture_format(desc)?;
        check_usages(
            format,
            self.adapter.get_texture_format_features(format).allowed_usages,
            label,
        )?;
        let limit = self.device.limits().max_texture_dimension_2d;
        if desc.width() > limit || desc.height() > limit {
            return Err(InteropError::Device(format!(
                "texture '{label}' {}x{} exceeds the {limit}px limit",
                desc.width(),
                desc.height()
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width(),
                height: desc.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: TEXTURE_USAGES,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&sampler_descriptor(desc, label));
        Ok(WgpuTexture {
            texture,
            view,
            sampler,
            format,
        })
    }

    fn write_texture(
        &self,
        texture: &WgpuTexture,
        desc: &TextureDescription,
        data: &[u8],
    ) -> Result<()> {
        if data.len() as u64 != desc.byte_size() {
            return Err(InteropError::Device(format!(
                "upload of {} bytes, texture needs {}",
                data.len(),
                desc.byte_size()
            )));
        }
        self.queue.write_texture(
            Self::texture_copy(texture, 0),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.row_bytes() as u32),
                rows_per_image: Some(desc.height()),
            },
            wgpu::Extent3d {
                width: desc.width(),
                height: desc.height(),
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(&self, texture: &WgpuTexture, desc: &TextureDescription) -> Result<Vec<u8>> {
        let tight_bpr = desc.row_bytes() as u32;
        let padded_bpr = align_bpr(tight_bpr);
        let height = desc.height();

        let staging = self.staging(
            padded_bpr as u64 * height as u64,
            "rasterlab texture readback",
        );
        let mut encoder = self.encoder("rasterlab texture readback encoder");
        encoder.copy_texture_to_buffer(
            Self::texture_copy(texture, 0),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width: desc.width(),
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let padded = self.map_read(&staging, staging.size() as usize)?;

        // Depad rows: copy tight_bpr bytes from each padded row
        let (tight_bpr, padded_bpr) = (tight_bpr as usize, padded_bpr as usize);
        let mut tight = vec![0u8; tight_bpr * height as usize];
        for (dst, src) in tight
            .chunks_exact_mut(tight_bpr)
            .zip(padded.chunks_exact(padded_bpr))
        {
            dst.copy_from_slice(&src[..tight_bpr]);
        }
        Ok(tight)
    }

    fn create_buffer(&self, size: u64, label: &str) -> Result<WgpuBuffer> {
        let physical = align4(size.max(1));
        let limits = self.device.limits();
        let max = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);
        if physical > max {
            return Err(InteropError::Device(format!(
                "out of memory: '{label}' needs {size} bytes, device allows {max}"
            )));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: physical,
            usage: BUFFER_USAGES,
            mapped_at_creation: false,
        });
        let id = self.next_buffer_id.get() + 1;
        self.next_buffer_id.set(id);
        Ok(WgpuBuffer {
            buffer: Rc::new(buffer),
            id,
        })
    }

    fn buffer_id(buffer: &WgpuBuffer) -> u64 {
        buffer.id
    }

    fn copy_texture_to_buffer(
        &self,
        texture: &WgpuTexture,
        buffer: &WgpuBuffer,
        desc: &TextureDescription,
    ) -> Result<()> {
        Self::check_fits(buffer, desc)?;
        let mut encoder = self.encoder("rasterlab pack encoder");
        self.encode_copy(&mut encoder, texture, buffer.raw(), desc, true);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn copy_buffer_to_texture(
        &self,
        buffer: &WgpuBuffer,
        texture: &WgpuTexture,
        desc: &TextureDescription,
    ) -> Result<()> {
        Self::check_fits(buffer, desc)?;
        let mut encoder = self.encoder("rasterlab unpack encoder");
        self.encode_copy(&mut encoder, texture, buffer.raw(), desc, false);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_buffer(&self, buffer: &WgpuBuffer, size: u64) -> Result<Vec<u8>> {
        self.read_raw(buffer.raw(), 0, size)
    }

    fn write_buffer(&self, buffer: &WgpuBuffer, data: &[u8]) -> Result<()> {
        if align4(data.len() as u64) > buffer.allocated_size() {
            return Err(InteropError::Device(format!(
                "write of {} bytes into buffer of {}",
                data.len(),
                buffer.allocated_size()
            )));
        }
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(buffer.raw(), 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(align4(data.len() as u64) as usize, 0);
            self.queue.write_buffer(buffer.raw(), 0, &padded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_formats_are_refused() {
        for desc in [
            TextureDescription::rgb8(4, 4),
            TextureDescription::rgb32f(4, 4),
        ] {
            assert!(matches!(
                texture_format(&desc),
                Err(InteropError::UnsupportedFormat(_))
            ));
        }
    }

    #[test]
    fn g_buffer_formats_map() {
        assert_eq!(
            texture_format(&TextureDescription::rgba32f(1, 1)).unwrap(),
            wgpu::TextureFormat::Rgba32Float
        );
        assert_eq!(
            texture_format(&TextureDescription::r32i(1, 1)).unwrap(),
            wgpu::TextureFormat::R32Sint
        );
        assert_eq!(
            texture_format(&TextureDescription::rgba8(1, 1)).unwrap(),
            wgpu::TextureFormat::Rgba8Unorm
        );
    }

    #[test]
    fn aligned_rows_copy_in_one_command() {
        // 64 px × 4 B = 256 B per row.
        assert_eq!(
            copy_plan(&TextureDescription::rgba8(64, 10)),
            CopyPlan::Whole { bytes_per_row: 256 }
        );
    }

    #[test]
    fn unaligned_rows_copy_per_row() {
        assert_eq!(
            copy_plan(&TextureDescription::rgba32f(5, 3)),
            CopyPlan::PerRow { row_bytes: 80 }
        );
        assert_eq!(
            copy_plan(&TextureDescription::rgba8(64, 1)),
            CopyPlan::PerRow { row_bytes: 256 }
        );
    }

    #[test]
    fn per_row_regions_stay_tightly_packed() {
        use crate::interop::{DeviceArrayView, DevicePointer, ElementType};

        let desc = TextureDescription::rgba32f(5, 3);
        let regions = copy_regions(&desc);
        assert_eq!(regions.len(), 3);

        // Same row offsets as the (h, w, c) view over the packed buffer.
        let view = DeviceArrayView::from_pointer(
            DevicePointer::new(1, desc.byte_size()),
            3,
            5,
            4,
            ElementType::F32,
        )
        .unwrap();
        for (y, region) in regions.iter().enumerate() {
            assert_eq!(region.y, y as u32);
            assert_eq!(region.rows, 1);
            assert_eq!(region.bytes_per_row, None);
            assert_eq!(region.offset, view.offset_of(y as u32, 0, 0));
            assert_eq!(region.offset, y as u64 * 80);
        }
        let last = regions[2];
        assert_eq!(last.offset + desc.row_bytes(), desc.byte_size());
    }

    #[test]
    fn aligned_rows_are_one_region() {
        assert_eq!(
            copy_regions(&TextureDescription::rgba8(64, 10)),
            vec![CopyRegion {
                y: 0,
                rows: 10,
                offset: 0,
                bytes_per_row: Some(256),
            }]
        );
    }

    #[test]
    fn unrenderable_formats_are_refused() {
        let downlevel = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        let err = check_usages(wgpu::TextureFormat::Rgba32Float, downlevel, "world_position")
            .unwrap_err();
        assert!(matches!(err, InteropError::UnsupportedFormat(ref m) if m.contains("world_position")));
        assert!(!err.is_recoverable());

        check_usages(wgpu::TextureFormat::Rgba32Float, wgpu::TextureUsages::all(), "p").unwrap();
    }

    #[test]
    fn samplers_follow_description_filters() {
        let nearest = sampler_descriptor(&TextureDescription::rgba8(2, 2), "s");
        assert_eq!(nearest.min_filter, wgpu::FilterMode::Nearest);
        assert_eq!(nearest.mag_filter, wgpu::FilterMode::Nearest);

        let desc = TextureDescription::rgba8(2, 2).with_filters(FilterMode::Linear, FilterMode::Nearest);
        let mixed = sampler_descriptor(&desc, "s");
        assert_eq!(mixed.min_filter, wgpu::FilterMode::Linear);
        assert_eq!(mixed.mag_filter, wgpu::FilterMode::Nearest);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_bpr(1), 256);
        assert_eq!(align_bpr(256), 256);
        assert_eq!(align_bpr(257), 512);
        assert_eq!(align4(0), 0);
        assert_eq!(align4(5), 8);
    }
}
