use glam::Vec3;

use crate::interop::{DeviceArrayView, ElementType, PreconditionError, Result};

/// Scale applied to the Lambert term to reach the displayable range.
pub const DISPLAY_SCALE: f32 = 255.0;

/// Output channel that carries opacity instead of the shaded value.
pub const ALPHA_CHANNEL: u32 = 3;

/// Threads per block along x (columns) and y (rows).
///
/// The kernel has no cross-pixel dependency, so this is a tuning knob only.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TileShape {
    x: u32,
    y: u32,
}

impl TileShape {
    pub const DEFAULT: TileShape = TileShape { x: 16, y: 16 };

    pub fn new(x: u32, y: u32) -> Result<Self> {
        if x == 0 || y == 0 {
            return Err(PreconditionError::ZeroExtent {
                width: x,
                height: y,
            }
            .into());
        }
        Ok(Self { x, y })
    }

    #[inline]
    pub fn x(&self) -> u32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> u32 {
        self.y
    }
}

impl Default for TileShape {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 2D grid of 2D blocks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LaunchConfig {
    pub grid: (u32, u32),
    pub block: TileShape,
}

impl LaunchConfig {
    /// Smallest grid whose threads cover a `width × height` image.
    ///
    /// Threads beyond the image edge exist when the tile does not divide the
    /// extent; the kernel skips them.
    pub fn covering(width: u32, height: u32, block: TileShape) -> Self {
        Self {
            grid: (width.div_ceil(block.x), height.div_ceil(block.y)),
            block,
        }
    }

    /// Total threads along x and y.
    pub fn threads(&self) -> (u32, u32) {
        (self.grid.0 * self.block.x, self.grid.1 * self.block.y)
    }
}

/// Kernel arguments: three mapped arrays plus the point light.
#[derive(Debug, Copy, Clone)]
pub struct LightingArgs {
    pub position: DeviceArrayView,
    pub normal: DeviceArrayView,
    pub output: DeviceArrayView,
    pub light_position: Vec3,
}

impl LightingArgs {
    /// Checks the shapes and element types the kernel relies on.
    pub fn validate(&self) -> Result<()> {
        for (name, view) in [("position", &self.position), ("normal", &self.normal)] {
            if view.element() != ElementType::F32 {
                return Err(PreconditionError::ViewShape(format!(
                    "{name} array must be f32, got {:?}",
                    view.element()
                ))
                .into());
            }
        }

        let (h, w, _) = self.output.shape();
        for (name, view) in [("position", &self.position), ("normal", &self.normal)] {
            if (view.height(), view.width()) != (h, w) {
                return Err(PreconditionError::ViewShape(format!(
                    "{name} array is {}x{}, output is {h}x{w}",
                    view.height(),
                    view.width()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// `(width, height)` of the shaded image.
    pub fn extent(&self) -> (u32, u32) {
        (self.output.width(), self.output.height())
    }
}

/// `clamp(dot(n, normalize(light − p)), 0, 1)`; 0 when the light sits on the point.
#[inline]
pub fn lambert(position: Vec3, normal: Vec3, light_position: Vec3) -> f32 {
    let to_light = (light_position - position).normalize_or_zero();
    normal.dot(to_light).clamp(0.0, 1.0)
}

/// Value written to `channel` of an output pixel.
#[inline]
pub fn output_value(lambert: f32, channel: u32) -> f32 {
    if channel == ALPHA_CHANNEL {
        DISPLAY_SCALE
    } else {
        lambert * DISPLAY_SCALE
    }
}

/// Builds a vector from up to three channel values; missing components are 0.
#[inline]
pub fn vec3_from_channels(values: &[f32]) -> Vec3 {
    let get = |i: usize| values.get(i).copied().unwrap_or(0.0);
    Vec3::new(get(0), get(1), get(2))
}

/// Stores `value` as one element of type `element`. Integer types round.
pub fn encode_element(value: f32, element: ElementType, out: &mut [u8]) {
    match element {
        ElementType::F32 => out.copy_from_slice(&value.to_ne_bytes()),
        ElementType::I32 => out.copy_from_slice(&(value.round() as i32).to_ne_bytes()),
        ElementType::U8 => out[0] = value.round().clamp(0.0, 255.0) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_covers_uneven_extent() {
        let l = LaunchConfig::covering(33, 16, TileShape::DEFAULT);
        assert_eq!(l.grid, (3, 1));
        assert_eq!(l.threads(), (48, 16));

        let l = LaunchConfig::covering(4, 4, TileShape::DEFAULT);
        assert_eq!(l.grid, (1, 1));
    }

    #[test]
    fn zero_tile_is_rejected() {
        assert!(TileShape::new(0, 16).is_err());
        assert_eq!(TileShape::new(8, 4).unwrap().x(), 8);
    }

    #[test]
    fn lambert_facing_light() {
        let v = lambert(Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 5.0, 0.0));
        assert!((v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn lambert_clamps_back_facing() {
        assert_eq!(lambert(Vec3::ZERO, -Vec3::Y, Vec3::new(0.0, 5.0, 0.0)), 0.0);
    }

    #[test]
    fn lambert_light_on_surface_is_dark() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(lambert(p, Vec3::Y, p), 0.0);
    }

    #[test]
    fn missing_channels_read_as_zero() {
        assert_eq!(vec3_from_channels(&[1.0]), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(vec3_from_channels(&[1.0, 2.0, 3.0, 4.0]), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn encode_rounds_integers() {
        let mut b = [0u8; 1];
        encode_element(250.6, ElementType::U8, &mut b);
        assert_eq!(b[0], 251);
        let mut b = [0u8; 4];
        encode_element(-2.4, ElementType::I32, &mut b);
        assert_eq!(i32::from_ne_bytes(b), -2);
    }

    #[test]
    fn alpha_channel_is_opaque() {
        assert_eq!(output_value(0.0, ALPHA_CHANNEL), 255.0);
        assert_eq!(output_value(0.5, 0), 127.5);
    }
}
