mod capture;
mod config;
mod geometry;

use anyhow::Result;
use rasterlab_engine::backend::gpu::{WgpuCompute, WgpuDevice};
use rasterlab_engine::device::{Gpu, GpuInit};
use rasterlab_engine::lighting::{FrameConfig, FrameOrchestrator, GBufferLayout, OrchestratorInit};
use rasterlab_engine::logging::{LoggingConfig, init_logging};

use capture::PngCapture;
use config::StudioConfig;
use geometry::SphereScene;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let config = StudioConfig::from_args(std::env::args().skip(1));

    let gpu = pollster::block_on(Gpu::headless(GpuInit::default()))?;
    let device = WgpuDevice::new(&gpu);
    let compute = WgpuCompute::new(device.clone());

    let (width, height) = config.viewport_at(0);
    let mut orchestrator = FrameOrchestrator::new(
        compute,
        &GBufferLayout::full(width, height),
        OrchestratorInit {
            tile: config.tile,
            ..OrchestratorInit::default()
        },
    )?;
    let mut scene = SphereScene::new(
        device,
        config.camera_eye,
        config.vertical_fov_degrees.to_radians(),
    );
    let mut capture = PngCapture::default();

    for frame in 0..config.frames {
        let viewport = config.viewport_at(frame);
        let frame_config = FrameConfig {
            light_position: config.light_at(frame),
        };
        let report = orchestrator.frame(&mut scene, &mut capture, &frame_config, viewport)?;
        if report.resized {
            log::info!("frame {frame}: viewport {}x{}", viewport.0, viewport.1);
        }
        log::debug!("frame {frame}: {report:?}");
    }

    capture.save(&config.output)?;
    log::info!(
        "wrote {} ({} lit, {} unlit frames)",
        config.output.display(),
        capture.lit_frames(),
        capture.unlit_frames()
    );
    Ok(())
}
