use super::error::{InteropError, PreconditionError, Result};
use super::runtime::{ComputeRuntime, RegistrationToken};
use super::texture::DeviceTexture;
use super::transfer::PixelTransferBuffer;
use super::view::DeviceArrayView;

type Transfer<C> = PixelTransferBuffer<<C as ComputeRuntime>::Device>;
type Texture<C> = DeviceTexture<<C as ComputeRuntime>::Device>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Registration {
    token: RegistrationToken,
    size: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Binding {
    Unregistered,
    Registered(Registration),
    Mapped(Registration),
}

/// Observable state of an [`InteropHandle`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandleState {
    Unregistered,
    Registered,
    Mapped,
}

/// Shares one [`PixelTransferBuffer`] between the graphics device and a
/// compute runtime.
///
/// State machine: `Unregistered → Registered → Mapped → Registered → … → Unregistered`.
///
/// Exactly one side owns the memory at a time: while `Mapped`, the compute
/// runtime does, and the buffer refuses graphics transfers, host mapping and
/// resizing. The registration stays valid only while the buffer keeps the size
/// it had when registered.
pub struct InteropHandle<C: ComputeRuntime> {
    runtime: C,
    transfer: Transfer<C>,
    binding: Binding,
}

impl<C: ComputeRuntime> InteropHandle<C> {
    /// Wraps `transfer` in the `Unregistered` state.
    pub fn new(runtime: C, transfer: Transfer<C>) -> Self {
        Self {
            runtime,
            transfer,
            binding: Binding::Unregistered,
        }
    }

    pub fn state(&self) -> HandleState {
        match self.binding {
            Binding::Unregistered => HandleState::Unregistered,
            Binding::Registered(_) => HandleState::Registered,
            Binding::Mapped(_) => HandleState::Mapped,
        }
    }

    /// Token of the live registration, if any.
    pub fn token(&self) -> Option<RegistrationToken> {
        match self.binding {
            Binding::Unregistered => None,
            Binding::Registered(r) | Binding::Mapped(r) => Some(r.token),
        }
    }

    /// Byte size recorded at registration time.
    pub fn registered_size(&self) -> Option<u64> {
        match self.binding {
            Binding::Unregistered => None,
            Binding::Registered(r) | Binding::Mapped(r) => Some(r.size),
        }
    }

    pub fn transfer(&self) -> &Transfer<C> {
        &self.transfer
    }

    /// `Unregistered → Registered`.
    pub fn register(&mut self) -> Result<()> {
        if self.binding != Binding::Unregistered {
            return Err(PreconditionError::AlreadyRegistered.into());
        }

        let size = self.transfer.byte_size();
        let Some(buffer) = self.transfer.buffer().filter(|_| size > 0) else {
            return Err(InteropError::Registration(format!(
                "transfer buffer '{}' has no storage",
                self.transfer.label()
            )));
        };

        let token = self.runtime.register_buffer(buffer, size)?;
        log::debug!(
            "registered '{}' as {token} ({size} bytes)",
            self.transfer.label()
        );
        self.binding = Binding::Registered(Registration { token, size });
        Ok(())
    }

    /// `Registered → Mapped`. The view aliases device memory; nothing is copied.
    pub fn map(&mut self) -> Result<DeviceArrayView> {
        let reg = match self.binding {
            Binding::Registered(r) => r,
            Binding::Mapped(_) => return Err(PreconditionError::AlreadyMapped.into()),
            Binding::Unregistered => return Err(PreconditionError::NotRegistered.into()),
        };
        if reg.size != self.transfer.byte_size() {
            return Err(PreconditionError::StaleRegistration {
                registered: reg.size,
                current: self.transfer.byte_size(),
            }
            .into());
        }

        let pointer = self.runtime.map_resources(reg.token)?;
        let view = DeviceArrayView::from_pointer(
            pointer,
            self.transfer.height(),
            self.transfer.width(),
            self.transfer.channels(),
            self.transfer.element(),
        );
        let view = match view {
            Ok(v) => v,
            Err(err) => {
                // Hand the memory back before reporting.
                if let Err(unmap_err) = self.runtime.unmap_resources(reg.token) {
                    log::warn!(
                        "unmap of '{}' after a bad view failed: {unmap_err}",
                        self.transfer.label()
                    );
                }
                return Err(err);
            }
        };

        self.binding = Binding::Mapped(reg);
        self.transfer.set_compute_mapped(true);
        Ok(view)
    }

    /// `Mapped → Registered`. Kernel writes are visible to the graphics side afterwards.
    pub fn unmap(&mut self) -> Result<()> {
        let Binding::Mapped(reg) = self.binding else {
            return Err(PreconditionError::NotMapped.into());
        };

        self.runtime.unmap_resources(reg.token)?;
        self.binding = Binding::Registered(reg);
        self.transfer.set_compute_mapped(false);
        Ok(())
    }

    /// Resizes the wrapped buffer and, if it reallocated while registered,
    /// swaps the stale registration for a fresh one.
    ///
    /// Returns whether the buffer reallocated. If the reallocation fails after
    /// the old storage was released, the handle ends up `Unregistered`.
    pub fn resize_if_needed(&mut self, width: u32, height: u32) -> Result<bool> {
        if let Binding::Mapped(_) = self.binding {
            return Err(PreconditionError::ResizeWhileMapped.into());
        }

        let reallocated = match self.transfer.resize_if_needed(width, height) {
            Ok(reallocated) => reallocated,
            Err(err) => {
                if self.transfer.buffer().is_none() {
                    self.drop_registration();
                }
                return Err(err);
            }
        };
        if !reallocated {
            return Ok(false);
        }

        if let Binding::Registered(old) = self.binding {
            self.binding = Binding::Unregistered;
            self.runtime.unregister_resource(old.token)?;
            self.register()?;
        }
        Ok(true)
    }

    /// Forgets a registration whose storage is gone.
    fn drop_registration(&mut self) {
        if let Binding::Registered(old) = self.binding {
            self.binding = Binding::Unregistered;
            if let Err(err) = self.runtime.unregister_resource(old.token) {
                log::warn!(
                    "unregister of '{}' after a failed resize failed: {err}",
                    self.transfer.label()
                );
            }
        }
    }

    /// Snapshots `texture` into the wrapped buffer.
    pub fn read_tex(&mut self, texture: &Texture<C>) -> Result<()> {
        self.transfer.read_tex(texture)
    }

    /// Publishes the wrapped buffer into `texture`. Must be called after `unmap`.
    pub fn write_tex(&self, texture: &Texture<C>) -> Result<()> {
        self.transfer.write_tex(texture)
    }

    /// Copies the bytes behind a view obtained from this handle's `map`.
    pub fn copy_to_host(&self, view: &DeviceArrayView) -> Result<Vec<u8>> {
        if !matches!(self.binding, Binding::Mapped(_)) {
            return Err(PreconditionError::NotMapped.into());
        }
        self.runtime.copy_to_host(view)
    }

    /// Drops the registration. A no-op when unregistered; rejected while mapped.
    pub fn deinit(&mut self) -> Result<()> {
        match self.binding {
            Binding::Unregistered => Ok(()),
            Binding::Mapped(_) => Err(PreconditionError::AlreadyMapped.into()),
            Binding::Registered(reg) => {
                self.binding = Binding::Unregistered;
                self.runtime.unregister_resource(reg.token)?;
                log::debug!("unregistered '{}' ({})", self.transfer.label(), reg.token);
                Ok(())
            }
        }
    }
}

impl<C: ComputeRuntime> Drop for InteropHandle<C> {
    fn drop(&mut self) {
        if let Binding::Mapped(_) = self.binding {
            log::warn!(
                "interop handle '{}' dropped while mapped",
                self.transfer.label()
            );
            if let Err(err) = self.unmap() {
                log::warn!("unmap on drop failed: {err}");
                return;
            }
        }
        if let Err(err) = self.deinit() {
            log::warn!("unregister on drop failed: {err}");
        }
    }
}
