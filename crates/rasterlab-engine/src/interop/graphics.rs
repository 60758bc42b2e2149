use super::error::Result;
use super::format::TextureDescription;

/// Graphics API primitives used by [`DeviceTexture`](super::DeviceTexture) and
/// [`PixelTransferBuffer`](super::PixelTransferBuffer).
///
/// Implementors are cheap-to-clone handles onto one device context; every
/// component receives its own clone at construction instead of relying on an
/// implicitly current context.
///
/// All transfers are tightly packed: a texture's image is `height` rows of
/// `desc.row_bytes()` bytes, no padding, row 0 first.
pub trait GraphicsDevice: Clone {
    type Texture;
    type Buffer;

    /// Allocates a 2D image matching `desc`. Contents are undefined.
    fn create_texture(&self, desc: &TextureDescription, label: &str) -> Result<Self::Texture>;

    /// Replaces the full image with `data` (`desc.byte_size()` bytes).
    fn write_texture(
        &self,
        texture: &Self::Texture,
        desc: &TextureDescription,
        data: &[u8],
    ) -> Result<()>;

    /// Blocking readback of the full image.
    fn read_texture(&self, texture: &Self::Texture, desc: &TextureDescription) -> Result<Vec<u8>>;

    /// Allocates a linear buffer of `size` bytes usable for pixel transfers and
    /// as a compute storage resource.
    fn create_buffer(&self, size: u64, label: &str) -> Result<Self::Buffer>;

    /// Stable identity of a buffer allocation.
    fn buffer_id(buffer: &Self::Buffer) -> u64;

    /// Pack-direction transfer: texture image → buffer.
    fn copy_texture_to_buffer(
        &self,
        texture: &Self::Texture,
        buffer: &Self::Buffer,
        desc: &TextureDescription,
    ) -> Result<()>;

    /// Unpack-direction transfer: buffer → full texture image.
    fn copy_buffer_to_texture(
        &self,
        buffer: &Self::Buffer,
        texture: &Self::Texture,
        desc: &TextureDescription,
    ) -> Result<()>;

    /// Blocking host readback of the first `size` bytes.
    fn read_buffer(&self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>>;

    /// Host upload to the start of the buffer.
    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]) -> Result<()>;
}
