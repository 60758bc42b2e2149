use bytemuck::Pod;

use super::error::{InteropError, PreconditionError, Result};
use super::format::{ElementType, TextureDescription};
use super::graphics::GraphicsDevice;
use super::texture::{DeviceTexture, ensure_extent};

/// Linear GPU buffer staging pixel data to and from a 2D texture.
///
/// Invariant: once allocated, `byte_size() == width × height × channels × element size`.
///
/// Lifecycle:
/// - constructed with zero bytes allocated
/// - the first `read_tex` or `resize_if_needed` allocates
/// - `write_tex` requires allocated storage
pub struct PixelTransferBuffer<G: GraphicsDevice> {
    device: G,
    label: String,
    width: u32,
    height: u32,
    channels: u32,
    element: ElementType,

    buffer: Option<G::Buffer>,
    byte_size: u64,
    has_data: bool,

    host_mapped: bool,
    compute_mapped: bool,
}

impl<G: GraphicsDevice> PixelTransferBuffer<G> {
    /// Creates an unallocated buffer shaped after `desc`.
    pub fn new(device: G, desc: &TextureDescription, label: impl Into<String>) -> Self {
        Self {
            device,
            label: label.into(),
            width: desc.width(),
            height: desc.height(),
            channels: desc.channels(),
            element: desc.element(),
            buffer: None,
            byte_size: 0,
            has_data: false,
            host_mapped: false,
            compute_mapped: false,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> u32 {
        self.channels
    }

    #[inline]
    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Allocated size in bytes; 0 until the first allocation.
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// True after a successful `read_tex` and until the next reallocation.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn buffer(&self) -> Option<&G::Buffer> {
        self.buffer.as_ref()
    }

    /// Identity of the current allocation, if any.
    pub fn buffer_id(&self) -> Option<u64> {
        self.buffer.as_ref().map(G::buffer_id)
    }

    pub fn is_compute_mapped(&self) -> bool {
        self.compute_mapped
    }

    fn size_for(&self, width: u32, height: u32) -> u64 {
        width as u64 * height as u64 * self.channels as u64 * self.element.size() as u64
    }

    /// Reallocates when either dimension changed or nothing is allocated yet.
    ///
    /// Returns whether a reallocation happened. Contents are invalidated when it did.
    /// On failure the old storage is gone and the previous extent is kept.
    pub fn resize_if_needed(&mut self, width: u32, height: u32) -> Result<bool> {
        if self.host_mapped || self.compute_mapped {
            return Err(PreconditionError::ResizeWhileMapped.into());
        }
        if self.buffer.is_some() && (self.width, self.height) == (width, height) {
            return Ok(false);
        }
        ensure_extent(width, height)?;

        self.allocate(width, height)?;
        Ok(true)
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<()> {
        let size = self.size_for(width, height);
        // Release the old allocation before asking for the new one.
        self.buffer = None;
        self.byte_size = 0;
        self.has_data = false;

        let buffer = self.device.create_buffer(size, &self.label)?;
        self.buffer = Some(buffer);
        self.byte_size = size;
        self.width = width;
        self.height = height;
        log::debug!(
            "transfer buffer '{}' allocated: {}x{}x{} {:?} ({size} bytes)",
            self.label,
            self.width,
            self.height,
            self.channels,
            self.element
        );
        Ok(())
    }

    fn check_format(&self, desc: &TextureDescription) -> Result<()> {
        if desc.channels() != self.channels || desc.element() != self.element {
            return Err(PreconditionError::FormatMismatch {
                expected_channels: self.channels,
                expected_element: self.element,
                actual_channels: desc.channels(),
                actual_element: desc.element(),
            }
            .into());
        }
        if desc.size() != (self.width, self.height) {
            return Err(PreconditionError::SizeMismatch {
                expected: (self.width, self.height),
                actual: desc.size(),
            }
            .into());
        }
        Ok(())
    }

    fn check_unmapped(&self) -> Result<()> {
        if self.host_mapped || self.compute_mapped {
            return Err(PreconditionError::AlreadyMapped.into());
        }
        Ok(())
    }

    /// Snapshots `texture` into the buffer (pack direction).
    pub fn read_tex(&mut self, texture: &DeviceTexture<G>) -> Result<()> {
        self.check_format(texture.description())?;
        self.check_unmapped()?;
        if self.buffer.is_none() {
            self.allocate(self.width, self.height)?;
        }

        let buffer = self.buffer.as_ref().ok_or(PreconditionError::WriteBeforeRead)?;
        self.device
            .copy_texture_to_buffer(texture.raw(), buffer, texture.description())?;
        self.has_data = true;
        Ok(())
    }

    /// Replaces the full image of `texture` with the buffer (unpack direction).
    pub fn write_tex(&self, texture: &DeviceTexture<G>) -> Result<()> {
        let buffer = match self.buffer.as_ref() {
            Some(b) if self.byte_size > 0 => b,
            _ => return Err(PreconditionError::WriteBeforeRead.into()),
        };
        self.check_format(texture.description())?;
        self.check_unmapped()?;

        self.device
            .copy_buffer_to_texture(buffer, texture.raw(), texture.description())
    }

    /// Maps the buffer for direct host access.
    ///
    /// Changes made to the returned array are written back by [`unmap`](Self::unmap).
    pub fn map_as_array(&mut self) -> Result<HostArray> {
        self.check_unmapped()?;
        let buffer = self.buffer.as_ref().ok_or(PreconditionError::WriteBeforeRead)?;

        let bytes = self.device.read_buffer(buffer, self.byte_size)?;
        self.host_mapped = true;
        Ok(HostArray {
            bytes,
            shape: (self.height, self.width, self.channels),
            element: self.element,
            buffer_id: G::buffer_id(buffer),
        })
    }

    /// Ends a host mapping, uploading the array's contents.
    pub fn unmap(&mut self, array: HostArray) -> Result<()> {
        if !self.host_mapped {
            return Err(PreconditionError::NotMapped.into());
        }
        let buffer = self.buffer.as_ref().ok_or(PreconditionError::NotMapped)?;
        if array.buffer_id != G::buffer_id(buffer) {
            return Err(InteropError::Mapping(format!(
                "array belongs to allocation {}, buffer '{}' is now {}",
                array.buffer_id,
                self.label,
                G::buffer_id(buffer)
            )));
        }

        let written = self.device.write_buffer(buffer, &array.bytes);
        self.host_mapped = false;
        written
    }

    pub(crate) fn set_compute_mapped(&mut self, mapped: bool) {
        self.compute_mapped = mapped;
    }
}

/// Host copy of a mapped transfer buffer, shaped `(height, width, channels)`.
#[derive(Debug, Clone)]
pub struct HostArray {
    bytes: Vec<u8>,
    shape: (u32, u32, u32),
    element: ElementType,
    buffer_id: u64,
}

impl HostArray {
    pub fn shape(&self) -> (u32, u32, u32) {
        self.shape
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Decodes the elements as `T`, which must have the element's size.
    pub fn to_vec<T: Pod>(&self) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>();
        if size != self.element.size() as usize {
            return Err(InteropError::Mapping(format!(
                "cannot decode {:?} elements as a {size}-byte type",
                self.element
            )));
        }
        Ok(self
            .bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostDevice;
    use crate::interop::format::InternalFormat;

    const FORMATS: [InternalFormat; 12] = [
        InternalFormat::R8,
        InternalFormat::Rg8,
        InternalFormat::Rgb8,
        InternalFormat::Rgba8,
        InternalFormat::R32I,
        InternalFormat::Rg32I,
        InternalFormat::Rgb32I,
        InternalFormat::Rgba32I,
        InternalFormat::R32F,
        InternalFormat::Rg32F,
        InternalFormat::Rgb32F,
        InternalFormat::Rgba32F,
    ];

    fn r8(w: u32, h: u32) -> TextureDescription {
        TextureDescription::from_internal(w, h, InternalFormat::R8)
    }

    #[test]
    fn byte_size_matches_shape_for_every_format() {
        let dev = HostDevice::new();
        for format in FORMATS {
            for (w, h) in [(1, 1), (3, 5), (17, 2)] {
                let desc = TextureDescription::from_internal(1, 1, format);
                let mut ptb = PixelTransferBuffer::new(dev.clone(), &desc, "ptb");
                assert_eq!(ptb.byte_size(), 0);
                ptb.resize_if_needed(w, h).unwrap();
                let (c, e) = format.components();
                assert_eq!(
                    ptb.byte_size(),
                    w as u64 * h as u64 * c as u64 * e.size() as u64
                );
                assert_eq!(dev.buffer_len(ptb.buffer().unwrap()), ptb.byte_size());
            }
        }
    }

    #[test]
    fn resize_is_idempotent() {
        let dev = HostDevice::new();
        let desc = TextureDescription::rgba8(4, 4);
        let tex = DeviceTexture::with_data(dev.clone(), desc, "t", &[9u8; 64]).unwrap();
        let mut ptb = PixelTransferBuffer::new(dev, &desc, "ptb");

        assert!(ptb.resize_if_needed(4, 4).unwrap());
        ptb.read_tex(&tex).unwrap();
        let id = ptb.buffer_id();

        assert!(!ptb.resize_if_needed(4, 4).unwrap());
        assert_eq!(ptb.buffer_id(), id);
        assert!(ptb.has_data());
        let arr = ptb.map_as_array().unwrap();
        assert_eq!(arr.as_bytes(), &[9u8; 64][..]);
        ptb.unmap(arr).unwrap();
    }

    #[test]
    fn read_tex_rejects_format_mismatch() {
        let dev = HostDevice::new();
        let tex = DeviceTexture::new(dev.clone(), TextureDescription::rgb32f(4, 4), "t").unwrap();
        let mut ptb =
            PixelTransferBuffer::new(dev, &TextureDescription::rgba32f(4, 4), "ptb");

        let err = ptb.read_tex(&tex).unwrap_err();
        assert!(matches!(
            err.precondition(),
            Some(PreconditionError::FormatMismatch { .. })
        ));
        assert!(!ptb.has_data());
    }

    #[test]
    fn read_tex_rejects_size_mismatch() {
        let dev = HostDevice::new();
        let tex = DeviceTexture::new(dev.clone(), TextureDescription::r32f(8, 4), "t").unwrap();
        let mut ptb = PixelTransferBuffer::new(dev, &TextureDescription::r32f(4, 8), "ptb");
        let err = ptb.read_tex(&tex).unwrap_err();
        assert_eq!(
            err.precondition(),
            Some(&PreconditionError::SizeMismatch {
                expected: (4, 8),
                actual: (8, 4)
            })
        );
    }

    #[test]
    fn write_before_read_is_rejected() {
        let dev = HostDevice::new();
        let desc = TextureDescription::r32i(2, 2);
        let tex = DeviceTexture::new(dev.clone(), desc, "t").unwrap();
        let ptb = PixelTransferBuffer::new(dev, &desc, "ptb");
        let err = ptb.write_tex(&tex).unwrap_err();
        assert_eq!(err.precondition(), Some(&PreconditionError::WriteBeforeRead));
    }

    #[test]
    fn host_map_round_trips_through_texture() {
        let dev = HostDevice::new();
        let desc = TextureDescription::rg32f(3, 2);
        let values: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
        let src = DeviceTexture::with_data(dev.clone(), desc, "src", bytemuck::cast_slice(&values))
            .unwrap();
        let dst = DeviceTexture::new(dev.clone(), desc, "dst").unwrap();

        let mut ptb = PixelTransferBuffer::new(dev, &desc, "ptb");
        ptb.read_tex(&src).unwrap();

        let mut arr = ptb.map_as_array().unwrap();
        assert_eq!(arr.shape(), (2, 3, 2));
        assert_eq!(arr.to_vec::<f32>().unwrap(), values);
        assert!(matches!(arr.to_vec::<u8>(), Err(InteropError::Mapping(_))));
        for chunk in arr.as_bytes_mut().chunks_exact_mut(4) {
            let v: f32 = bytemuck::pod_read_unaligned(chunk);
            chunk.copy_from_slice(&(v + 1.0).to_ne_bytes());
        }
        assert!(ptb.map_as_array().is_err());
        ptb.unmap(arr).unwrap();

        ptb.write_tex(&dst).unwrap();
        let out = dst.download().unwrap();
        let out: Vec<f32> = out.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
        let expected: Vec<f32> = values.iter().map(|v| v + 1.0).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn unmap_without_map_is_rejected() {
        let dev = HostDevice::new();
        let desc = r8(2, 2);
        let mut ptb = PixelTransferBuffer::new(dev, &desc, "ptb");
        ptb.resize_if_needed(2, 2).unwrap();
        let arr = ptb.map_as_array().unwrap();
        ptb.unmap(arr.clone()).unwrap();
        assert_eq!(
            ptb.unmap(arr).unwrap_err().precondition(),
            Some(&PreconditionError::NotMapped)
        );
    }

    #[test]
    fn failed_allocation_keeps_previous_extent() {
        // 4×4 r8 takes 16 bytes; 8×8 would need 64.
        let dev = HostDevice::with_memory_limit(32);
        let mut ptb = PixelTransferBuffer::new(dev.clone(), &r8(4, 4), "ptb");
        ptb.resize_if_needed(4, 4).unwrap();

        let err = ptb.resize_if_needed(8, 8).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!((ptb.width(), ptb.height()), (4, 4));
        assert_eq!(ptb.byte_size(), 0);
        assert!(ptb.buffer().is_none());
        assert!(!ptb.has_data());
        assert_eq!(dev.live_buffers(), 0);

        // The next request allocates again, even at the kept extent.
        assert!(ptb.resize_if_needed(4, 4).unwrap());
        assert_eq!(ptb.byte_size(), 16);
    }

    #[test]
    fn resize_while_host_mapped_is_rejected() {
        let dev = HostDevice::new();
        let desc = r8(2, 2);
        let mut ptb = PixelTransferBuffer::new(dev, &desc, "ptb");
        ptb.resize_if_needed(2, 2).unwrap();
        let arr = ptb.map_as_array().unwrap();
        assert_eq!(
            ptb.resize_if_needed(4, 4).unwrap_err().precondition(),
            Some(&PreconditionError::ResizeWhileMapped)
        );
        ptb.unmap(arr).unwrap();
        assert!(ptb.resize_if_needed(4, 4).unwrap());
    }
}
