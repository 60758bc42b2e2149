//! wgpu backend: textures and storage buffers on a real adapter, the lighting
//! kernel as a compute shader.

mod compute;
mod device;

pub use compute::WgpuCompute;
pub use device::{WgpuBuffer, WgpuDevice, WgpuTexture, texture_format};
