//! Graphics/compute interop core.
//!
//! A pixel buffer written by the rasterizer is staged into a
//! [`PixelTransferBuffer`], registered with a [`ComputeRuntime`] through an
//! [`InteropHandle`], mapped as a [`DeviceArrayView`] for a kernel, then
//! unmapped and written back into a texture.
//!
//! Both collaborating runtimes sit behind traits ([`GraphicsDevice`],
//! [`ComputeRuntime`]) so the same state machine drives the wgpu backend and
//! the host backend used by headless tests.

mod error;
mod format;
mod graphics;
mod handle;
mod runtime;
mod texture;
mod transfer;
mod view;

pub use error::{InteropError, PreconditionError, Result};
pub use format::{ChannelLayout, ElementType, FilterMode, InternalFormat, TextureDescription};
pub use graphics::GraphicsDevice;
pub use handle::{HandleState, InteropHandle};
pub use runtime::{ComputeRuntime, DevicePointer, RegistrationToken};
pub use texture::DeviceTexture;
pub use transfer::{HostArray, PixelTransferBuffer};
pub use view::DeviceArrayView;
