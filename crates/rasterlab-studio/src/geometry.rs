use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rasterlab_engine::backend::gpu::{WgpuDevice, WgpuTexture};
use rasterlab_engine::interop::Result;
use rasterlab_engine::lighting::{Attachment, GBuffer, GeometryPass};

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct SceneUniform {
    eye: [f32; 3],
    tan_half_fov: f32,
    resolution: [f32; 2],
    _pad: [f32; 2],
}

struct Pipelines {
    formats: Vec<wgpu::TextureFormat>,
    surface: wgpu::RenderPipeline,
    material: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    scene_ubo: wgpu::Buffer,
}

/// Procedural rasterizer: a sphere on a checkered floor, ray-cast per pixel.
///
/// Renders position and normal in one pass and color, uv and mesh id in a
/// second, since all five targets exceed the default 32 bytes per sample.
pub struct SphereScene {
    device: WgpuDevice,
    eye: Vec3,
    vertical_fov: f32,
    pipelines: Option<Pipelines>,
}

const SURFACE_TARGETS: [Attachment; 2] = [Attachment::WorldPosition, Attachment::WorldNormal];
const MATERIAL_TARGETS: [Attachment; 3] = [Attachment::Color, Attachment::Uv, Attachment::MeshId];

fn raw(gbuffer: &GBuffer<WgpuDevice>, attachment: Attachment) -> Result<&WgpuTexture> {
    gbuffer.get(attachment).map(|t| t.raw())
}

impl SphereScene {
    pub fn new(device: WgpuDevice, eye: Vec3, vertical_fov: f32) -> Self {
        Self {
            device,
            eye,
            vertical_fov,
            pipelines: None,
        }
    }

    fn ensure_pipelines(&mut self, gbuffer: &GBuffer<WgpuDevice>) -> Result<()> {
        let mut formats = Vec::new();
        for attachment in SURFACE_TARGETS.iter().chain(&MATERIAL_TARGETS) {
            formats.push(raw(gbuffer, *attachment)?.format());
        }
        if self.pipelines.as_ref().is_some_and(|p| p.formats == formats) {
            return Ok(());
        }

        let device = self.device.device();
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("rasterlab gbuffer shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/gbuffer.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rasterlab gbuffer bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<SceneUniform>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rasterlab gbuffer pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = |label: &str, entry: &str, targets: &[wgpu::TextureFormat]| {
            let targets: Vec<_> = targets
                .iter()
                .map(|format| {
                    Some(wgpu::ColorTargetState {
                        format: *format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                })
                .collect();
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        };
        let surface = pipeline("rasterlab surface pipeline", "fs_surface", &formats[..2]);
        let material = pipeline("rasterlab material pipeline", "fs_material", &formats[2..]);

        let scene_ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rasterlab scene ubo"),
            size: std::mem::size_of::<SceneUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rasterlab gbuffer bind group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: scene_ubo.as_entire_binding(),
            }],
        });

        self.pipelines = Some(Pipelines {
            formats,
            surface,
            material,
            bind_group,
            scene_ubo,
        });
        Ok(())
    }
}

impl GeometryPass<WgpuDevice> for SphereScene {
    fn render(&mut self, gbuffer: &GBuffer<WgpuDevice>) -> Result<()> {
        self.ensure_pipelines(gbuffer)?;
        let Some(p) = self.pipelines.as_ref() else {
            return Ok(());
        };

        let (width, height) = gbuffer.size();
        let uniform = SceneUniform {
            eye: self.eye.to_array(),
            tan_half_fov: (self.vertical_fov * 0.5).tan(),
            resolution: [width as f32, height as f32],
            _pad: [0.0; 2],
        };
        self.device
            .queue()
            .write_buffer(&p.scene_ubo, 0, bytemuck::bytes_of(&uniform));

        let mut encoder =
            self.device
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("rasterlab gbuffer encoder"),
                });

        for (pipeline, targets) in [
            (&p.surface, &SURFACE_TARGETS[..]),
            (&p.material, &MATERIAL_TARGETS[..]),
        ] {
            let mut attachments = Vec::with_capacity(targets.len());
            for attachment in targets {
                attachments.push(Some(wgpu::RenderPassColorAttachment {
                    view: raw(gbuffer, *attachment)?.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                }));
            }

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("rasterlab gbuffer pass"),
                color_attachments: &attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &p.bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }

        self.device.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
