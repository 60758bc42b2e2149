//! GPU device management.
//!
//! Creates the wgpu Adapter/Device/Queue for offscreen rendering and compute.

mod gpu;
mod init;

pub use gpu::Gpu;
pub use init::GpuInit;
