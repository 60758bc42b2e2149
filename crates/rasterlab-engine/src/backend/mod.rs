//! Implementations of [`GraphicsDevice`](crate::interop::GraphicsDevice) and
//! [`ComputeRuntime`](crate::interop::ComputeRuntime).

pub mod host;
pub mod gpu;
