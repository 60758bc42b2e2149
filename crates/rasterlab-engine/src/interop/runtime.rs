use std::fmt;

use crate::lighting::{LaunchConfig, LightingArgs};

use super::error::Result;
use super::graphics::GraphicsDevice;
use super::view::DeviceArrayView;

/// Opaque registration issued by a [`ComputeRuntime`].
///
/// Tokens are never reused by a runtime, so a token kept past its
/// `unregister_resource` call is rejected instead of aliasing a newer resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegistrationToken(u64);

impl RegistrationToken {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address in a compute runtime's device address space.
///
/// The high 32 bits select a resource slot, the low 32 bits are a byte offset
/// inside it. `size` is the number of addressable bytes from `address`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DevicePointer {
    address: u64,
    size: u64,
}

impl DevicePointer {
    #[inline]
    pub const fn new(slot: u32, size: u64) -> Self {
        Self {
            address: (slot as u64) << 32,
            size,
        }
    }

    #[inline]
    pub const fn address(self) -> u64 {
        self.address
    }

    #[inline]
    pub const fn slot(self) -> u32 {
        (self.address >> 32) as u32
    }

    #[inline]
    pub const fn offset(self) -> u64 {
        self.address & 0xFFFF_FFFF
    }

    #[inline]
    pub const fn size(self) -> u64 {
        self.size
    }
}

/// The general-purpose compute runtime that shares memory with the graphics device.
///
/// The four registration primitives mirror the classic graphics-interop API
/// shape: register a graphics buffer once, then map/unmap it around every
/// kernel launch. Runtimes enforce their own bookkeeping (double
/// registration, stale tokens, map nesting) and report violations as
/// [`PreconditionError`](super::PreconditionError)s.
pub trait ComputeRuntime: Clone {
    type Device: GraphicsDevice;

    /// Graphics device whose buffers this runtime can register.
    fn device(&self) -> &Self::Device;

    /// Makes `buffer` addressable by kernels. `size` is the logical byte size.
    fn register_buffer(
        &self,
        buffer: &<Self::Device as GraphicsDevice>::Buffer,
        size: u64,
    ) -> Result<RegistrationToken>;

    fn unregister_resource(&self, token: RegistrationToken) -> Result<()>;

    /// Hands ownership of the memory to the compute side and returns its address.
    fn map_resources(&self, token: RegistrationToken) -> Result<DevicePointer>;

    /// Returns ownership to the graphics side. Kernel writes are complete and
    /// visible once this returns.
    fn unmap_resources(&self, token: RegistrationToken) -> Result<()>;

    /// Dispatches the lighting kernel over `launch`. All views must be mapped.
    fn launch_lighting(&self, launch: LaunchConfig, args: &LightingArgs) -> Result<()>;

    /// Copies the bytes a mapped view covers into host memory.
    fn copy_to_host(&self, view: &DeviceArrayView) -> Result<Vec<u8>>;
}
