//! Rasterlab engine crate.
//!
//! Moves rasterizer output between graphics textures and a compute runtime
//! without leaving the device, and runs a per-pixel lighting pass over the
//! g-buffer every frame.

pub mod backend;
pub mod device;
pub mod interop;
pub mod lighting;
pub mod logging;
