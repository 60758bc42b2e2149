use std::path::PathBuf;

use glam::Vec3;
use rasterlab_engine::lighting::TileShape;

/// Studio run parameters.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// Frames to render before writing the capture.
    pub frames: u32,

    /// `(first_frame, (width, height))`, sorted by frame. Each entry holds
    /// until the next one takes over.
    pub viewports: Vec<(u32, (u32, u32))>,

    /// The light orbits the y axis at this radius and height, one turn per run.
    pub light_radius: f32,
    pub light_height: f32,

    pub camera_eye: Vec3,
    pub vertical_fov_degrees: f32,

    pub tile: TileShape,

    /// PNG written with the last presented frame.
    pub output: PathBuf,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            frames: 6,
            viewports: vec![(0, (256, 256)), (2, (512, 512)), (4, (256, 256))],
            light_radius: 3.0,
            light_height: 4.0,
            camera_eye: Vec3::new(0.0, 1.5, 4.5),
            vertical_fov_degrees: 45.0,
            tile: TileShape::DEFAULT,
            output: PathBuf::from("rasterlab.png"),
        }
    }
}

impl StudioConfig {
    /// Defaults, with the output path taken from the first argument if present.
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = args.next() {
            config.output = PathBuf::from(path);
        }
        config
    }

    pub fn viewport_at(&self, frame: u32) -> (u32, u32) {
        self.viewports
            .iter()
            .take_while(|(start, _)| *start <= frame)
            .last()
            .or(self.viewports.first())
            .map_or((256, 256), |(_, size)| *size)
    }

    pub fn light_at(&self, frame: u32) -> Vec3 {
        let turn = frame as f32 / self.frames.max(1) as f32;
        let angle = turn * std::f32::consts::TAU;
        Vec3::new(
            self.light_radius * angle.cos(),
            self.light_height,
            self.light_radius * angle.sin(),
        )
    }
}
