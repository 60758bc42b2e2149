use super::error::{PreconditionError, Result};
use super::format::TextureDescription;
use super::graphics::GraphicsDevice;

/// One GPU-resident 2D image with a fixed format.
///
/// Resizing reallocates the backing store; contents are lost.
pub struct DeviceTexture<G: GraphicsDevice> {
    device: G,
    label: String,
    desc: TextureDescription,
    raw: G::Texture,
}

impl<G: GraphicsDevice> DeviceTexture<G> {
    pub fn new(device: G, desc: TextureDescription, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        ensure_extent(desc.width(), desc.height())?;
        let raw = device.create_texture(&desc, &label)?;
        log::debug!(
            "texture '{label}' created: {}x{} {:?}",
            desc.width(),
            desc.height(),
            desc.internal_format()
        );
        Ok(Self {
            device,
            label,
            desc,
            raw,
        })
    }

    /// Creates the texture and uploads `data` as its initial image.
    pub fn with_data(
        device: G,
        desc: TextureDescription,
        label: impl Into<String>,
        data: &[u8],
    ) -> Result<Self> {
        let texture = Self::new(device, desc, label)?;
        texture.upload(data)?;
        Ok(texture)
    }

    #[inline]
    pub fn description(&self) -> &TextureDescription {
        &self.desc
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.desc.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.desc.height()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Backend texture object, for collaborators that render into or sample it.
    pub fn raw(&self) -> &G::Texture {
        &self.raw
    }

    /// Replaces the whole image. `data` must be exactly `byte_size()` bytes.
    pub fn upload(&self, data: &[u8]) -> Result<()> {
        let expected = self.desc.byte_size() as usize;
        if data.len() != expected {
            return Err(PreconditionError::DataLength {
                expected,
                actual: data.len(),
            }
            .into());
        }
        self.device.write_texture(&self.raw, &self.desc, data)
    }

    /// Blocking readback of the whole image.
    pub fn download(&self) -> Result<Vec<u8>> {
        self.device.read_texture(&self.raw, &self.desc)
    }

    /// Reallocates when the extent changes. Returns whether it did.
    pub fn resize_if_needed(&mut self, width: u32, height: u32) -> Result<bool> {
        if self.desc.size() == (width, height) {
            return Ok(false);
        }
        ensure_extent(width, height)?;

        let desc = self.desc.with_size(width, height);
        self.raw = self.device.create_texture(&desc, &self.label)?;
        self.desc = desc;
        log::debug!("texture '{}' resized to {width}x{height}", self.label);
        Ok(true)
    }
}

pub(crate) fn ensure_extent(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(PreconditionError::ZeroExtent { width, height }.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostDevice;

    #[test]
    fn upload_rejects_wrong_length() {
        let dev = HostDevice::new();
        let tex = DeviceTexture::new(dev, TextureDescription::rgba8(2, 2), "t").unwrap();
        let err = tex.upload(&[0u8; 15]).unwrap_err();
        assert_eq!(
            err.precondition(),
            Some(&PreconditionError::DataLength {
                expected: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn resize_reallocates_only_on_change() {
        let dev = HostDevice::new();
        let mut tex = DeviceTexture::new(dev, TextureDescription::r32f(4, 4), "t").unwrap();
        assert!(!tex.resize_if_needed(4, 4).unwrap());
        assert!(tex.resize_if_needed(8, 2).unwrap());
        assert_eq!(tex.description().size(), (8, 2));
        assert_eq!(tex.download().unwrap().len(), 8 * 2 * 4);
    }

    #[test]
    fn zero_extent_is_rejected() {
        let dev = HostDevice::new();
        assert!(DeviceTexture::new(dev.clone(), TextureDescription::r32f(0, 4), "t").is_err());
        let mut tex = DeviceTexture::new(dev, TextureDescription::r32f(1, 1), "t").unwrap();
        assert!(tex.resize_if_needed(0, 0).is_err());
        assert_eq!(tex.description().size(), (1, 1));
    }
}
