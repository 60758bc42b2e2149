use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::interop::{
    ComputeRuntime, DeviceArrayView, DevicePointer, ElementType, InteropError, PreconditionError,
    RegistrationToken, Result,
};
use crate::lighting::{LaunchConfig, LightingArgs, TileShape};

use super::device::{WgpuBuffer, WgpuDevice};

const SHADER_SRC: &str = include_str!("shaders/lighting.wgsl");

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct LightingParams {
    light_position: [f32; 3],
    width: u32,
    height: u32,
    position_channels: u32,
    normal_channels: u32,
    output_channels: u32,
    output_kind: u32,
    _pad: [u32; 3],
}

/// How the kernel stores output elements.
fn output_kind(view: &DeviceArrayView) -> Result<u32> {
    match (view.element(), view.channels()) {
        (ElementType::F32, _) => Ok(0),
        (ElementType::I32, _) => Ok(1),
        // Bytes are written a packed pixel at a time.
        (ElementType::U8, 4) => Ok(2),
        (ElementType::U8, c) => Err(InteropError::UnsupportedFormat(format!(
            "u8 lighting output needs 4 channels, got {c}"
        ))),
    }
}

struct Registration {
    buffer: Weak<wgpu::Buffer>,
    size: u64,
    mapped: bool,
}

#[derive(Default)]
struct RuntimeState {
    next_token: u32,
    registrations: HashMap<u32, Registration>,
}

struct LightingPipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// Compute runtime running the lighting kernel as a WGSL compute shader.
///
/// Registration keeps a weak reference to the storage buffer; mapping hands
/// out an address whose slot is the registration token. Unmap fences the
/// queue so kernel writes are complete before graphics copies read them.
#[derive(Clone)]
pub struct WgpuCompute {
    device: WgpuDevice,
    state: Rc<RefCell<RuntimeState>>,
    pipelines: Rc<RefCell<HashMap<TileShape, Rc<LightingPipeline>>>>,
}

impl WgpuCompute {
    pub fn new(device: WgpuDevice) -> Self {
        Self {
            device,
            state: Rc::default(),
            pipelines: Rc::default(),
        }
    }

    pub fn live_registrations(&self) -> usize {
        self.state.borrow().registrations.len()
    }

    /// Buffer behind a mapped view, checked against the registered size.
    fn mapped_buffer(&self, view: &DeviceArrayView) -> Result<Rc<wgpu::Buffer>> {
        let state = self.state.borrow();
        let slot = view.pointer().slot();
        let reg = state
            .registrations
            .get(&slot)
            .ok_or(PreconditionError::StaleToken(slot as u64))?;
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
        reg.buffer
            .upgrade()
            .ok_or_else(|| InteropError::Mapping(format!("registered buffer #{slot} was released")))
    }

    fn ensure_pipeline(&self, tile: TileShape) -> Result<Rc<LightingPipeline>> {
        if let Some(p) = self.pipelines.borrow().get(&tile) {
            return Ok(Rc::clone(p));
        }

        let limits = self.device.device().limits();
        let invocations = tile.x() as u64 * tile.y() as u64;
        if tile.x() > limits.max_compute_workgroup_size_x
            || tile.y() > limits.max_compute_workgroup_size_y
            || invocations > limits.max_compute_invocations_per_workgroup as u64
        {
            return Err(InteropError::Launch(format!(
                "tile {}x{} exceeds workgroup limits",
                tile.x(),
                tile.y()
            )));
        }

        let device = self.device.device();
        let source = SHADER_SRC
            .replace("TILE_X", &tile.x().to_string())
            .replace("TILE_Y", &tile.y().to_string());
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("rasterlab lighting shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rasterlab lighting bgl"),
            entries: &[
                storage(0, true),
                storage(1, true),
                storage(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<LightingParams>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rasterlab lighting pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("rasterlab lighting pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("cs_main"),
            compilation_options: Default::default(),
            cache: None,
        });
        log::debug!("lighting pipeline built for {}x{} tiles", tile.x(), tile.y());

        let built = Rc::new(LightingPipeline {
            bind_group_layout,
            pipeline,
        });
        self.pipelines.borrow_mut().insert(tile, Rc::clone(&built));
        Ok(built)
    }
}

impl ComputeRuntime for WgpuCompute {
    type Device = WgpuDevice;

    fn device(&self) -> &WgpuDevice {
        &self.device
    }

    fn register_buffer(&self, buffer: &WgpuBuffer, size: u64) -> Result<RegistrationToken> {
        if size == 0 || size > buffer.allocated_size() {
            return Err(InteropError::Registration(format!(
                "cannot register {size} bytes of a {}-byte buffer",
                buffer.allocated_size()
            )));
        }

        let mut state = self.state.borrow_mut();
        let already = state
            .registrations
            .values()
            .any(|r| std::ptr::eq(r.buffer.as_ptr(), Rc::as_ptr(buffer.shared())));
        if already {
            return Err(PreconditionError::AlreadyRegistered.into());
        }

        state.next_token = state
            .next_token
            .checked_add(1)
            .ok_or_else(|| InteropError::Registration("registration tokens exhausted".into()))?;
        let slot = state.next_token;
        state.registrations.insert(
            slot,
            Registration {
                buffer: Rc::downgrade(buffer.shared()),
                size,
                mapped: false,
            },
        );
        Ok(RegistrationToken::from_raw(slot as u64))
    }

    fn unregister_resource(&self, token: RegistrationToken) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let slot = token.raw() as u32;
        match state.registrations.get(&slot) {
            None => Err(PreconditionError::StaleToken(token.raw()).into()),
            Some(r) if r.mapped => Err(PreconditionError::AlreadyMapped.into()),
            Some(_) => {
                state.registrations.remove(&slot);
                Ok(())
            }
        }
    }

    fn map_resources(&self, token: RegistrationToken) -> Result<DevicePointer> {
        let mut state = self.state.borrow_mut();
        let slot = token.raw() as u32;
        let reg = state
            .registrations
            .get_mut(&slot)
            .ok_or(PreconditionError::StaleToken(token.raw()))?;
        if reg.mapped {
            return Err(PreconditionError::AlreadyMapped.into());
        }
        if reg.buffer.strong_count() == 0 {
            return Err(InteropError::Mapping(format!(
                "registered buffer {token} was released"
            )));
        }
        reg.mapped = true;
        Ok(DevicePointer::new(slot, reg.size))
    }

    fn unmap_resources(&self, token: RegistrationToken) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            let reg = state
                .registrations
                .get_mut(&(token.raw() as u32))
                .ok_or(PreconditionError::StaleToken(token.raw()))?;
            if !reg.mapped {
                return Err(PreconditionError::NotMapped.into());
            }
            reg.mapped = false;
        }
        self.device
            .wait()
            .map_err(|e| InteropError::Mapping(format!("unmap fence failed: {e}")))
    }

    fn launch_lighting(&self, launch: LaunchConfig, args: &LightingArgs) -> Result<()> {
        args.validate()?;
        let kind = output_kind(&args.output)?;
        let position = self.mapped_buffer(&args.position)?;
        let normal = self.mapped_buffer(&args.normal)?;
        let output = self.mapped_buffer(&args.output)?;
        if Rc::ptr_eq(&output, &position) || Rc::ptr_eq(&output, &normal) {
            return Err(PreconditionError::ViewShape(
                "output array aliases an input array".into(),
            )
            .into());
        }

        let max_groups = self.device.device().limits().max_compute_workgroups_per_dimension;
        if launch.grid.0 > max_groups || launch.grid.1 > max_groups {
            return Err(InteropError::Launch(format!(
                "grid {:?} exceeds {max_groups} workgroups per dimension",
                launch.grid
            )));
        }

        let pipeline = self.ensure_pipeline(launch.block)?;
        let (width, height) = args.extent();
        let params = LightingParams {
            light_position: args.light_position.to_array(),
            width,
            height,
            position_channels: args.position.channels(),
            normal_channels: args.normal.channels(),
            output_channels: args.output.channels(),
            output_kind: kind,
            _pad: [0; 3],
        };

        let device = self.device.device();
        let params_ubo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("rasterlab lighting params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rasterlab lighting bind group"),
            layout: &pipeline.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: position.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: normal.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_ubo.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("rasterlab lighting encoder"),
        });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rasterlab lighting pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipeline.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(launch.grid.0, launch.grid.1, 1);
        }
        self.device.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn copy_to_host(&self, view: &DeviceArrayView) -> Result<Vec<u8>> {
        let buffer = self.mapped_buffer(view)?;
        self.device
            .read_raw(&buffer, view.pointer().offset(), view.byte_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_uniform_layout() {
        assert_eq!(std::mem::size_of::<LightingParams>(), 48);
    }

    #[test]
    fn output_kinds() {
        let view = |channels, element| {
            DeviceArrayView::from_pointer(DevicePointer::new(1, 1 << 20), 4, 4, channels, element)
                .unwrap()
        };
        assert_eq!(output_kind(&view(3, ElementType::F32)).unwrap(), 0);
        assert_eq!(output_kind(&view(1, ElementType::I32)).unwrap(), 1);
        assert_eq!(output_kind(&view(4, ElementType::U8)).unwrap(), 2);
        assert!(output_kind(&view(1, ElementType::U8)).is_err());
    }

    #[test]
    fn shader_tile_is_substituted() {
        let src = SHADER_SRC.replace("TILE_X", "8").replace("TILE_Y", "4");
        assert!(src.contains("@workgroup_size(8, 4, 1)"));
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn lights_a_floor_on_the_gpu() {
        use crate::device::{Gpu, GpuInit};
        use crate::interop::{InteropHandle, PixelTransferBuffer, TextureDescription};
        use glam::Vec3;

        let gpu = pollster::block_on(Gpu::headless(GpuInit::default())).unwrap();
        let compute = WgpuCompute::new(WgpuDevice::new(&gpu));
        let desc = TextureDescription::rgba32f(4, 4);
        let dev = compute.device().clone();

        let mut handles: Vec<_> = ["p", "n", "o"]
            .into_iter()
            .map(|l| InteropHandle::new(compute.clone(), PixelTransferBuffer::new(dev.clone(), &desc, l)))
            .collect();
        for h in &mut handles {
            h.resize_if_needed(4, 4).unwrap();
            h.register().unwrap();
        }
        let normals: Vec<f32> = (0..16).flat_map(|_| [0.0, 1.0, 0.0, 0.0]).collect();
        let tex = crate::interop::DeviceTexture::with_data(dev.clone(), desc, "n", bytemuck::cast_slice(&normals)).unwrap();
        handles[1].read_tex(&tex).unwrap();
        let zero = crate::interop::DeviceTexture::new(dev.clone(), desc, "z").unwrap();
        zero.upload(&vec![0; desc.byte_size() as usize]).unwrap();
        handles[0].read_tex(&zero).unwrap();
        handles[2].read_tex(&zero).unwrap();

        let views: Vec<_> = handles.iter_mut().map(|h| h.map().unwrap()).collect();
        let args = LightingArgs {
            position: views[0],
            normal: views[1],
            output: views[2],
            light_position: Vec3::new(0.0, 5.0, 0.0),
        };
        compute
            .launch_lighting(LaunchConfig::covering(4, 4, TileShape::DEFAULT), &args)
            .unwrap();
        let out: Vec<f32> = handles[2]
            .copy_to_host(&views[2])
            .unwrap()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert!(out.iter().all(|v| (*v - 255.0).abs() < 1e-3));
        for h in &mut handles {
            h.unmap().unwrap();
        }
    }
}
