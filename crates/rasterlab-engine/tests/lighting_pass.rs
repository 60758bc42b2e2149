use glam::Vec3;

use rasterlab_engine::backend::host::{HostCompute, HostDevice};
use rasterlab_engine::interop::{
    ComputeRuntime, DeviceTexture, HandleState, InteropHandle, PixelTransferBuffer,
    PreconditionError, TextureDescription,
};
use rasterlab_engine::lighting::{
    Attachment, DisplayPass, FrameConfig, FrameOrchestrator, GBuffer, GBufferLayout,
    GeometryPass, LaunchConfig, LightingArgs, OrchestratorInit, TileShape,
};
use rasterlab_engine::logging::{LoggingConfig, init_logging};

fn setup() -> HostCompute {
    init_logging(LoggingConfig {
        is_test: true,
        ..LoggingConfig::default()
    });
    HostCompute::new(HostDevice::new())
}

fn handle(compute: &HostCompute, desc: &TextureDescription, label: &str) -> InteropHandle<HostCompute> {
    let ptb = PixelTransferBuffer::new(compute.device().clone(), desc, label);
    let mut h = InteropHandle::new(compute.clone(), ptb);
    h.resize_if_needed(desc.width(), desc.height()).unwrap();
    h.register().unwrap();
    h
}

fn filled(compute: &HostCompute, desc: TextureDescription, texel: &[f32]) -> DeviceTexture<HostDevice> {
    let pixels = (desc.width() * desc.height()) as usize;
    let data: Vec<f32> = texel.iter().copied().cycle().take(pixels * texel.len()).collect();
    DeviceTexture::with_data(compute.device().clone(), desc, "input", bytemuck::cast_slice(&data))
        .unwrap()
}

fn as_f32(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect()
}

// ── transfer laws ───────────────────────────────────────────────────────

#[test]
fn mapped_view_reproduces_texture_bytes() {
    let compute = setup();
    let desc = TextureDescription::rgba32f(5, 3);
    let values: Vec<f32> = (0..5 * 3 * 4).map(|i| i as f32 * 0.25 - 3.0).collect();
    let tex = DeviceTexture::with_data(
        compute.device().clone(),
        desc,
        "src",
        bytemuck::cast_slice(&values),
    )
    .unwrap();

    let mut h = handle(&compute, &desc, "ptb");
    h.read_tex(&tex).unwrap();
    let view = h.map().unwrap();
    let bytes = h.copy_to_host(&view).unwrap();
    h.unmap().unwrap();

    assert_eq!(bytes, bytemuck::cast_slice::<f32, u8>(&values));
}

#[test]
fn mapped_view_is_row_major() {
    let compute = setup();
    // 3 wide, 2 tall: value = 10 * row + column.
    let desc = TextureDescription::r32f(3, 2);
    let values = [0.0f32, 1.0, 2.0, 10.0, 11.0, 12.0];
    let tex = DeviceTexture::with_data(
        compute.device().clone(),
        desc,
        "src",
        bytemuck::cast_slice(&values),
    )
    .unwrap();

    let mut h = handle(&compute, &desc, "ptb");
    h.read_tex(&tex).unwrap();
    let view = h.map().unwrap();
    assert_eq!(view.shape(), (2, 3, 1));

    let bytes = h.copy_to_host(&view).unwrap();
    let at = view.offset_of(1, 2, 0) as usize;
    assert_eq!(bytemuck::pod_read_unaligned::<f32>(&bytes[at..at + 4]), 12.0);
    h.unmap().unwrap();
}

#[test]
fn resize_round_trip_leaks_nothing() {
    let compute = setup();
    let desc = TextureDescription::rgba8(256, 256);
    let mut h = handle(&compute, &desc, "ptb");
    let original = h.transfer().byte_size();
    let first = h.token().unwrap();

    assert!(h.resize_if_needed(512, 512).unwrap());
    assert_eq!(h.registered_size(), Some(512 * 512 * 4));
    assert!(h.resize_if_needed(256, 256).unwrap());

    assert_eq!(h.transfer().byte_size(), original);
    assert_eq!(h.registered_size(), Some(original));
    assert_ne!(h.token(), Some(first));
    assert_eq!(compute.live_registrations(), 1);
    assert_eq!(compute.device().live_buffers(), 1);

    // The live buffer cannot be registered a second time.
    let err = compute
        .register_buffer(h.transfer().buffer().unwrap(), original)
        .unwrap_err();
    assert_eq!(err.precondition(), Some(&PreconditionError::AlreadyRegistered));

    drop(h);
    assert_eq!(compute.live_registrations(), 0);
    assert_eq!(compute.device().live_buffers(), 0);
}

// ── lighting kernel ─────────────────────────────────────────────────────

#[test]
fn four_by_four_scenario() {
    let compute = setup();
    let position_desc = TextureDescription::r32f(4, 4);
    let normal_desc = TextureDescription::rgb32f(4, 4);
    let output_desc = TextureDescription::r32f(4, 4);

    let position_tex = filled(&compute, position_desc, &[1.0]);
    let normal_tex = filled(&compute, normal_desc, &[0.0, 1.0, 0.0]);
    let output_tex = DeviceTexture::new(compute.device().clone(), output_desc, "out").unwrap();

    let mut position = handle(&compute, &position_desc, "position");
    let mut normal = handle(&compute, &normal_desc, "normal");
    let mut output = handle(&compute, &output_desc, "output");
    position.read_tex(&position_tex).unwrap();
    normal.read_tex(&normal_tex).unwrap();
    output.read_tex(&output_tex).unwrap();

    let args = LightingArgs {
        position: position.map().unwrap(),
        normal: normal.map().unwrap(),
        output: output.map().unwrap(),
        light_position: Vec3::new(0.0, 5.0, 0.0),
    };
    compute
        .launch_lighting(LaunchConfig::covering(4, 4, TileShape::DEFAULT), &args)
        .unwrap();
    for h in [&mut position, &mut normal, &mut output] {
        h.unmap().unwrap();
    }
    output.write_tex(&output_tex).unwrap();

    // p = (1, 0, 0): light direction (-1, 5, 0) / √26.
    let expected = 5.0 / 26f32.sqrt() * 255.0;
    let out = as_f32(&output_tex.download().unwrap());
    assert_eq!(out.len(), 16);
    for v in out {
        assert!((v - expected).abs() < 1e-3, "{v} != {expected}");
    }
}

#[test]
fn tile_shape_does_not_change_the_image() {
    let compute = setup();
    let (w, h) = (23, 9);
    let position_desc = TextureDescription::rgba32f(w, h);
    let output_desc = TextureDescription::rgba8(w, h);
    let positions: Vec<f32> = (0..w * h)
        .flat_map(|i| [(i % w) as f32 * 0.3, 0.0, (i / w) as f32 * 0.3, 1.0])
        .collect();
    let position_tex = DeviceTexture::with_data(
        compute.device().clone(),
        position_desc,
        "p",
        bytemuck::cast_slice(&positions),
    )
    .unwrap();
    let normal_tex = filled(&compute, position_desc, &[0.0, 1.0, 0.0, 0.0]);

    let mut images = Vec::new();
    for tile in [TileShape::DEFAULT, TileShape::new(7, 3).unwrap(), TileShape::new(1, 1).unwrap()] {
        let mut p = handle(&compute, &position_desc, "p");
        let mut n = handle(&compute, &position_desc, "n");
        let mut o = handle(&compute, &output_desc, "o");
        p.read_tex(&position_tex).unwrap();
        n.read_tex(&normal_tex).unwrap();
        let out_tex = DeviceTexture::new(compute.device().clone(), output_desc, "out").unwrap();
        o.read_tex(&out_tex).unwrap();

        let args = LightingArgs {
            position: p.map().unwrap(),
            normal: n.map().unwrap(),
            output: o.map().unwrap(),
            light_position: Vec3::new(2.0, 3.0, 1.0),
        };
        compute
            .launch_lighting(LaunchConfig::covering(w, h, tile), &args)
            .unwrap();
        images.push(o.copy_to_host(&args.output).unwrap());
        for hd in [&mut p, &mut n, &mut o] {
            hd.unmap().unwrap();
        }
    }
    assert_eq!(images[0], images[1]);
    assert_eq!(images[0], images[2]);
}

// ── frame orchestration ─────────────────────────────────────────────────

struct FlatScene;

impl GeometryPass<HostDevice> for FlatScene {
    fn render(&mut self, gb: &GBuffer<HostDevice>) -> rasterlab_engine::interop::Result<()> {
        let (w, h) = gb.size();
        let n = (w * h) as usize;
        let position: Vec<f32> = vec![1.0; n];
        let normal: Vec<f32> = [0.0f32, 1.0, 0.0].repeat(n);
        gb.get(Attachment::WorldPosition)?
            .upload(bytemuck::cast_slice(&position))?;
        gb.get(Attachment::WorldNormal)?
            .upload(bytemuck::cast_slice(&normal))?;
        gb.get(Attachment::Color)?.upload(&vec![0u8; n * 4])
    }
}

#[derive(Default)]
struct LastFrame(Vec<u8>);

impl DisplayPass<HostDevice> for LastFrame {
    fn present(
        &mut self,
        texture: &DeviceTexture<HostDevice>,
        _lit: bool,
    ) -> rasterlab_engine::interop::Result<()> {
        self.0 = texture.download()?;
        Ok(())
    }
}

#[test]
fn orchestrated_scenario_through_resizes() {
    let compute = setup();
    let layout = GBufferLayout::standard(4, 4)
        .with(Attachment::WorldPosition, TextureDescription::r32f(4, 4))
        .with(Attachment::WorldNormal, TextureDescription::rgb32f(4, 4))
        .with(Attachment::Lit, TextureDescription::r32f(4, 4));
    let mut orch =
        FrameOrchestrator::new(compute.clone(), &layout, OrchestratorInit::default()).unwrap();

    let expected = 5.0 / 26f32.sqrt() * 255.0;
    let light = FrameConfig {
        light_position: Vec3::new(0.0, 5.0, 0.0),
    };
    let mut shown = LastFrame::default();
    for viewport in [(4, 4), (256, 256), (512, 512), (256, 256)] {
        let report = orch.frame(&mut FlatScene, &mut shown, &light, viewport).unwrap();
        assert!(report.lit, "{report:?}");
        assert_eq!(orch.handle_states(), [HandleState::Registered; 3]);
        assert_eq!(compute.live_registrations(), 3);
        assert_eq!(compute.mapped_count(), 0);

        let out = as_f32(&shown.0);
        assert_eq!(out.len(), (viewport.0 * viewport.1) as usize);
        assert!(out.iter().all(|v| (v - expected).abs() < 1e-3));
    }
    assert_eq!(compute.device().live_buffers(), 3);
}
