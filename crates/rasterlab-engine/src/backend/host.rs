//! Software device and compute runtime backed by host memory.
//!
//! Textures and buffers are byte vectors; the compute runtime maps registered
//! buffers into a fake device address space (slot in the high 32 bits) and
//! runs kernels by walking a grid of blocks on the calling thread.
//!
//! Intended for headless tests: registration refusal and allocation
//! exhaustion can be injected, and bookkeeping (live buffers, live
//! registrations, launch statistics) is observable.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::interop::{
    ComputeRuntime, DeviceArrayView, DevicePointer, GraphicsDevice, InteropError,
    PreconditionError, RegistrationToken, Result, TextureDescription,
};
use crate::lighting::{LaunchConfig, LightingArgs, encode_element, lambert, output_value, vec3_from_channels};

#[derive(Default)]
struct HostMemory {
    buffers: HashMap<u32, Vec<u8>>,
    textures: HashMap<u32, Vec<u8>>,
    next_id: u32,
    buffer_bytes: u64,
    limit: Option<u64>,
}

impl HostMemory {
    fn next_id(&mut self) -> u32 {
        // Slot 0 is never handed out so a zero address is always invalid.
        self.next_id += 1;
        self.next_id
    }
}

/// Host-memory graphics device. Clones share the same memory.
#[derive(Clone, Default)]
pub struct HostDevice {
    memory: Rc<RefCell<HostMemory>>,
}

pub struct HostTexture {
    id: u32,
    memory: Rc<RefCell<HostMemory>>,
}

impl Drop for HostTexture {
    fn drop(&mut self) {
        self.memory.borrow_mut().textures.remove(&self.id);
    }
}

pub struct HostBuffer {
    slot: u32,
    memory: Rc<RefCell<HostMemory>>,
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        let mut mem = self.memory.borrow_mut();
        if let Some(bytes) = mem.buffers.remove(&self.slot) {
            mem.buffer_bytes -= bytes.len() as u64;
        }
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device whose buffer allocations fail once `bytes` would be exceeded.
    pub fn with_memory_limit(bytes: u64) -> Self {
        let device = Self::default();
        device.memory.borrow_mut().limit = Some(bytes);
        device
    }

    pub fn live_buffers(&self) -> usize {
        self.memory.borrow().buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.memory.borrow().textures.len()
    }

    /// Bytes currently held by buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.memory.borrow().buffer_bytes
    }

    pub fn buffer_len(&self, buffer: &HostBuffer) -> u64 {
        self.memory
            .borrow()
            .buffers
            .get(&buffer.slot)
            .map_or(0, |b| b.len() as u64)
    }
}

fn pixel_len(desc: &TextureDescription, len: usize, what: &str) -> Result<usize> {
    let expected = desc.byte_size() as usize;
    if len != expected {
        return Err(InteropError::Device(format!(
            "{what} holds {len} bytes, description needs {expected}"
        )));
    }
    Ok(expected)
}

impl GraphicsDevice for HostDevice {
    type Texture = HostTexture;
    type Buffer = HostBuffer;

    fn create_texture(&self, desc: &TextureDescription, _label: &str) -> Result<HostTexture> {
        let mut mem = self.memory.borrow_mut();
        let id = mem.next_id();
        mem.textures.insert(id, vec![0; desc.byte_size() as usize]);
        Ok(HostTexture {
            id,
            memory: Rc::clone(&self.memory),
        })
    }

    fn write_texture(
        &self,
        texture: &HostTexture,
        desc: &TextureDescription,
        data: &[u8],
    ) -> Result<()> {
        let mut mem = self.memory.borrow_mut();
        let image = mem
            .textures
            .get_mut(&texture.id)
            .ok_or_else(|| InteropError::Device("texture was released".into()))?;
        pixel_len(desc, image.len(), "texture")?;
        pixel_len(desc, data.len(), "upload")?;
        image.copy_from_slice(data);
        Ok(())
    }

    fn read_texture(&self, texture: &HostTexture, desc: &TextureDescription) -> Result<Vec<u8>> {
        let mem = self.memory.borrow();
        let image = mem
            .textures
            .get(&texture.id)
            .ok_or_else(|| InteropError::Device("texture was released".into()))?;
        pixel_len(desc, image.len(), "texture")?;
        Ok(image.clone())
    }

    fn create_buffer(&self, size: u64, label: &str) -> Result<HostBuffer> {
        let mut mem = self.memory.borrow_mut();
        if let Some(limit) = mem.limit {
            if mem.buffer_bytes + size > limit {
                return Err(InteropError::Device(format!(
                    "out of memory allocating {size} bytes for '{label}' \
                     ({} of {limit} in use)",
                    mem.buffer_bytes
                )));
            }
        }
        let slot = mem.next_id();
        mem.buffers.insert(slot, vec![0; size as usize]);
        mem.buffer_bytes += size;
        Ok(HostBuffer {
            slot,
            memory: Rc::clone(&self.memory),
        })
    }

    fn buffer_id(buffer: &HostBuffer) -> u64 {
        buffer.slot as u64
    }

    fn copy_texture_to_buffer(
        &self,
        texture: &HostTexture,
        buffer: &HostBuffer,
        desc: &TextureDescription,
    ) -> Result<()> {
        let mut mem = self.memory.borrow_mut();
        let HostMemory {
            buffers, textures, ..
        } = &mut *mem;
        let image = textures
            .get(&texture.id)
            .ok_or_else(|| InteropError::Device("texture was released".into()))?;
        let linear = buffers
            .get_mut(&buffer.slot)
            .ok_or_else(|| InteropError::Device("buffer was released".into()))?;

        let n = pixel_len(desc, image.len(), "texture")?;
        if linear.len() < n {
            return Err(InteropError::Device(format!(
                "buffer of {} bytes cannot hold {n} bytes of pixels",
                linear.len()
            )));
        }
        linear[..n].copy_from_slice(image);
        Ok(())
    }

    fn copy_buffer_to_texture(
        &self,
        buffer: &HostBuffer,
        texture: &HostTexture,
        desc: &TextureDescription,
    ) -> Result<()> {
        let mut mem = self.memory.borrow_mut();
        let HostMemory {
            buffers, textures, ..
        } = &mut *mem;
        let linear = buffers
            .get(&buffer.slot)
            .ok_or_else(|| InteropError::Device("buffer was released".into()))?;
        let image = textures
            .get_mut(&texture.id)
            .ok_or_else(|| InteropError::Device("texture was released".into()))?;

        let n = pixel_len(desc, image.len(), "texture")?;
        if linear.len() < n {
            return Err(InteropError::Device(format!(
                "buffer of {} bytes cannot fill {n} bytes of pixels",
                linear.len()
            )));
        }
        image.copy_from_slice(&linear[..n]);
        Ok(())
    }

    fn read_buffer(&self, buffer: &HostBuffer, size: u64) -> Result<Vec<u8>> {
        let mem = self.memory.borrow();
        let linear = mem
            .buffers
            .get(&buffer.slot)
            .ok_or_else(|| InteropError::Device("buffer was released".into()))?;
        linear
            .get(..size as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| InteropError::Device(format!("read of {size} bytes out of range")))
    }

    fn write_buffer(&self, buffer: &HostBuffer, data: &[u8]) -> Result<()> {
        let mut mem = self.memory.borrow_mut();
        let linear = mem
            .buffers
            .get_mut(&buffer.slot)
            .ok_or_else(|| InteropError::Device("buffer was released".into()))?;
        let dst = linear.get_mut(..data.len()).ok_or_else(|| {
            InteropError::Device(format!("write of {} bytes out of range", data.len()))
        })?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

/// Thread accounting of the most recent kernel launch.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct LaunchStats {
    pub threads_run: u64,
    pub threads_skipped: u64,
}

struct HostRegistration {
    slot: u32,
    size: u64,
    mapped: bool,
}

#[derive(Default)]
struct ComputeState {
    next_token: u64,
    registrations: HashMap<u64, HostRegistration>,
    refuse: Option<String>,
    last_launch: Option<LaunchStats>,
}

/// Compute runtime sharing a [`HostDevice`]'s memory.
#[derive(Clone)]
pub struct HostCompute {
    device: HostDevice,
    state: Rc<RefCell<ComputeState>>,
}

impl HostCompute {
    pub fn new(device: HostDevice) -> Self {
        Self {
            device,
            state: Rc::default(),
        }
    }

    /// Makes every following `register_buffer` fail with `reason` (or succeed again with `None`).
    pub fn refuse_registrations(&self, reason: Option<&str>) {
        self.state.borrow_mut().refuse = reason.map(str::to_owned);
    }

    pub fn live_registrations(&self) -> usize {
        self.state.borrow().registrations.len()
    }

    pub fn mapped_count(&self) -> usize {
        self.state
            .borrow()
            .registrations
            .values()
            .filter(|r| r.mapped)
            .count()
    }

    pub fn last_launch(&self) -> Option<LaunchStats> {
        self.state.borrow().last_launch
    }

    fn mapped_slot(&self, view: &DeviceArrayView) -> Result<u32> {
        let slot = view.pointer().slot();
        let state = self.state.borrow();
        let reg = state
            .registrations
            .values()
            .find(|r| r.slot == slot)
            .ok_or(PreconditionError::NotRegistered)?;
        if !reg.mapped {
            return Err(PreconditionError::NotMapped.into());
        }
        if view.pointer().offset() + view.byte_len() > reg.size {
            return Err(PreconditionError::ViewShape(format!(
                "view of {} bytes exceeds registration of {} bytes",
                view.byte_len(),
                reg.size
            ))
            .into());
        }
        Ok(slot)
    }
}

fn read_f32(bytes: &[u8], at: u64) -> f32 {
    let at = at as usize;
    bytemuck::pod_read_unaligned(&bytes[at..at + 4])
}

fn fetch_vec3(bytes: &[u8], view: &DeviceArrayView, row: u32, column: u32) -> glam::Vec3 {
    let base = view.pointer().offset() + view.offset_of(row, column, 0);
    let (_, _, channel_stride) = view.strides();
    let mut values = [0.0f32; 3];
    let n = view.channels().min(3) as usize;
    for (c, v) in values.iter_mut().enumerate().take(n) {
        *v = read_f32(bytes, base + c as u64 * channel_stride);
    }
    vec3_from_channels(&values[..n])
}

impl ComputeRuntime for HostCompute {
    type Device = HostDevice;

    fn device(&self) -> &HostDevice {
        &self.device
    }

    fn register_buffer(&self, buffer: &HostBuffer, size: u64) -> Result<RegistrationToken> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.refuse {
            return Err(InteropError::Registration(reason.clone()));
        }
        if size == 0 {
            return Err(InteropError::Registration("zero-sized buffer".into()));
        }
        if self.device.buffer_len(buffer) < size {
            return Err(InteropError::Registration(format!(
                "buffer {} is smaller than {size} bytes",
                buffer.slot
            )));
        }
        if state.registrations.values().any(|r| r.slot == buffer.slot) {
            return Err(PreconditionError::AlreadyRegistered.into());
        }

        state.next_token += 1;
        let token = state.next_token;
        state.registrations.insert(
            token,
            HostRegistration {
                slot: buffer.slot,
                size,
                mapped: false,
            },
        );
        Ok(RegistrationToken::from_raw(token))
    }

    fn unregister_resource(&self, token: RegistrationToken) -> Result<()> {
        let mut state = self.state.borrow_mut();
        match state.registrations.get(&token.raw()) {
            None => Err(PreconditionError::StaleToken(token.raw()).into()),
            Some(r) if r.mapped => Err(PreconditionError::AlreadyMapped.into()),
            Some(_) => {
                state.registrations.remove(&token.raw());
                Ok(())
            }
        }
    }

    fn map_resources(&self, token: RegistrationToken) -> Result<DevicePointer> {
        let mut state = self.state.borrow_mut();
        let reg = state
            .registrations
            .get_mut(&token.raw())
            .ok_or(PreconditionError::StaleToken(token.raw()))?;
        if reg.mapped {
            return Err(PreconditionError::AlreadyMapped.into());
        }
        if !self.device.memory.borrow().buffers.contains_key(&reg.slot) {
            return Err(InteropError::Mapping(format!(
                "registered buffer {} was released",
                reg.slot
            )));
        }
        reg.mapped = true;
        Ok(DevicePointer::new(reg.slot, reg.size))
    }

    fn unmap_resources(&self, token: RegistrationToken) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let reg = state
            .registrations
            .get_mut(&token.raw())
            .ok_or(PreconditionError::StaleToken(token.raw()))?;
        if !reg.mapped {
            return Err(PreconditionError::NotMapped.into());
        }
        reg.mapped = false;
        Ok(())
    }

    fn launch_lighting(&self, launch: LaunchConfig, args: &LightingArgs) -> Result<()> {
        args.validate()?;
        let pos_slot = self.mapped_slot(&args.position)?;
        let normal_slot = self.mapped_slot(&args.normal)?;
        let out_slot = self.mapped_slot(&args.output)?;
        if out_slot == pos_slot || out_slot == normal_slot {
            return Err(PreconditionError::ViewShape(
                "output array aliases an input array".into(),
            )
            .into());
        }

        let (width, height) = args.extent();
        let out = args.output;
        let elem = out.element().size() as usize;
        let mut stats = LaunchStats::default();

        let mut mem = self.device.memory.borrow_mut();
        let buffers = &mut mem.buffers;
        let missing = || InteropError::Launch("mapped buffer vanished".into());

        for by in 0..launch.grid.1 {
            for bx in 0..launch.grid.0 {
                for ty in 0..launch.block.y() {
                    for tx in 0..launch.block.x() {
                        let x = bx * launch.block.x() + tx;
                        let y = by * launch.block.y() + ty;
                        if x >= width || y >= height {
                            stats.threads_skipped += 1;
                            continue;
                        }

                        let p = fetch_vec3(
                            buffers.get(&pos_slot).ok_or_else(missing)?,
                            &args.position,
                            y,
                            x,
                        );
                        let n = fetch_vec3(
                            buffers.get(&normal_slot).ok_or_else(missing)?,
                            &args.normal,
                            y,
                            x,
                        );
                        let shade = lambert(p, n, args.light_position);

                        let dst = buffers.get_mut(&out_slot).ok_or_else(missing)?;
                        for c in 0..out.channels() {
                            let at = (out.pointer().offset() + out.offset_of(y, x, c)) as usize;
                            encode_element(
                                output_value(shade, c),
                                out.element(),
                                &mut dst[at..at + elem],
                            );
                        }
                        stats.threads_run += 1;
                    }
                }
            }
        }

        drop(mem);
        self.state.borrow_mut().last_launch = Some(stats);
        Ok(())
    }

    fn copy_to_host(&self, view: &DeviceArrayView) -> Result<Vec<u8>> {
        let slot = self.mapped_slot(view)?;
        let mem = self.device.memory.borrow();
        let bytes = mem
            .buffers
            .get(&slot)
            .ok_or_else(|| InteropError::Mapping("mapped buffer vanished".into()))?;
        let start = view.pointer().offset() as usize;
        Ok(bytes[start..start + view.byte_len() as usize].to_vec())
    }
}
