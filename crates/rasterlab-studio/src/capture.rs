use std::path::Path;

use anyhow::{Context, Result};
use rasterlab_engine::backend::gpu::WgpuDevice;
use rasterlab_engine::interop::{DeviceTexture, InteropError, InternalFormat};
use rasterlab_engine::lighting::DisplayPass;

/// Display pass that reads back every presented texture and keeps the last one.
#[derive(Default)]
pub struct PngCapture {
    last: Option<(u32, u32, Vec<u8>)>,
    lit_frames: u32,
    unlit_frames: u32,
}

impl PngCapture {
    pub fn lit_frames(&self) -> u32 {
        self.lit_frames
    }

    pub fn unlit_frames(&self) -> u32 {
        self.unlit_frames
    }

    /// Writes the last presented frame. The format follows the extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        let (width, height, pixels) = self.last.clone().context("no frame was presented")?;
        let image = image::RgbaImage::from_raw(width, height, pixels)
            .context("presented frame has an unexpected size")?;
        image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl DisplayPass<WgpuDevice> for PngCapture {
    fn present(
        &mut self,
        texture: &DeviceTexture<WgpuDevice>,
        lit: bool,
    ) -> rasterlab_engine::interop::Result<()> {
        let desc = texture.description();
        if desc.internal_format() != InternalFormat::Rgba8 {
            return Err(InteropError::UnsupportedFormat(format!(
                "capture expects rgba8, '{}' is {:?}",
                texture.label(),
                desc.internal_format()
            )));
        }

        let pixels = texture.download()?;
        self.last = Some((desc.width(), desc.height(), pixels));
        if lit {
            self.lit_frames += 1;
        } else {
            self.unlit_frames += 1;
        }
        Ok(())
    }
}
