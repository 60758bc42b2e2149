use glam::Vec3;

use crate::interop::{
    ComputeRuntime, DeviceTexture, GraphicsDevice, HandleState, InteropError, InteropHandle,
    PixelTransferBuffer, PreconditionError, Result,
};

use super::gbuffer::{Attachment, GBuffer, GBufferLayout};
use super::kernel::{LaunchConfig, LightingArgs, TileShape};

type Device<C> = <C as ComputeRuntime>::Device;

/// Rasterizes scene geometry into the g-buffer attachments.
pub trait GeometryPass<G: GraphicsDevice> {
    fn render(&mut self, gbuffer: &GBuffer<G>) -> Result<()>;
}

/// Samples the final texture of a frame. `lit` is false when lighting was skipped.
pub trait DisplayPass<G: GraphicsDevice> {
    fn present(&mut self, texture: &DeviceTexture<G>, lit: bool) -> Result<()>;
}

/// Orchestrator construction options.
#[derive(Debug, Copy, Clone)]
pub struct OrchestratorInit {
    pub position_source: Attachment,
    pub normal_source: Attachment,
    pub tile: TileShape,
}

impl Default for OrchestratorInit {
    fn default() -> Self {
        Self {
            position_source: Attachment::WorldPosition,
            normal_source: Attachment::WorldNormal,
            tile: TileShape::DEFAULT,
        }
    }
}

/// Per-frame scene inputs.
#[derive(Debug, Copy, Clone)]
pub struct FrameConfig {
    pub light_position: Vec3,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            light_position: Vec3::new(0.0, 5.0, 0.0),
        }
    }
}

/// Outcome of one [`FrameOrchestrator::frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub lit: bool,
    pub resized: bool,
    /// Why the lighting pass was skipped, if it was.
    pub skipped: Option<String>,
}

/// Drives render → snapshot → map → kernel → unmap → publish → present.
///
/// Owns the g-buffer and one interop handle per kernel array (position,
/// normal, output). Runtime refusals degrade the frame to the unlit color
/// attachment; contract violations are returned.
pub struct FrameOrchestrator<C: ComputeRuntime> {
    runtime: C,
    init: OrchestratorInit,
    position: InteropHandle<C>,
    normal: InteropHandle<C>,
    output: InteropHandle<C>,
    gbuffer: GBuffer<Device<C>>,
    /// Set after a registration failure; cleared on resize.
    disabled: Option<String>,
}

impl<C: ComputeRuntime> FrameOrchestrator<C> {
    pub fn new(runtime: C, layout: &GBufferLayout, init: OrchestratorInit) -> Result<Self> {
        let device = runtime.device().clone();
        let gbuffer = GBuffer::new(&device, layout)?;

        let handle = |source: Attachment, label: &str| -> Result<InteropHandle<C>> {
            let desc = gbuffer.get(source)?.description();
            let ptb = PixelTransferBuffer::new(device.clone(), desc, label);
            Ok(InteropHandle::new(runtime.clone(), ptb))
        };
        let position = handle(init.position_source, "ptb_position")?;
        let normal = handle(init.normal_source, "ptb_normal")?;
        let output = handle(Attachment::Lit, "ptb_output")?;

        let mut this = Self {
            runtime,
            init,
            position,
            normal,
            output,
            gbuffer,
            disabled: None,
        };
        this.prepare_handles()?;
        Ok(this)
    }

    pub fn gbuffer(&self) -> &GBuffer<Device<C>> {
        &self.gbuffer
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.gbuffer.size()
    }

    pub fn runtime(&self) -> &C {
        &self.runtime
    }

    /// Reason the lighting pass is off until the next resize, if it is.
    pub fn lighting_disabled(&self) -> Option<&str> {
        self.disabled.as_deref()
    }

    /// States of the position, normal and output handles.
    pub fn handle_states(&self) -> [HandleState; 3] {
        [
            self.position.state(),
            self.normal.state(),
            self.output.state(),
        ]
    }

    /// Number of kernel arrays currently mapped. Zero between frames.
    pub fn mapped_count(&self) -> usize {
        self.handle_states()
            .iter()
            .filter(|s| **s == HandleState::Mapped)
            .count()
    }

    /// Renders and presents one frame at `viewport`, resizing first if it changed.
    pub fn frame(
        &mut self,
        geometry: &mut impl GeometryPass<Device<C>>,
        display: &mut impl DisplayPass<Device<C>>,
        config: &FrameConfig,
        viewport: (u32, u32),
    ) -> Result<FrameReport> {
        let resized = self.resize_if_needed(viewport.0, viewport.1)?;

        geometry.render(&self.gbuffer)?;

        let skipped = match self.disabled.clone() {
            Some(reason) => Some(reason),
            None => {
                let outcome = self.light(config);
                let released = self.release_mapped();
                match (outcome, released) {
                    (Ok(()), Ok(())) => None,
                    (Err(err), released) if err.is_recoverable() => {
                        released?;
                        log::warn!("lighting pass skipped: {err}");
                        Some(err.to_string())
                    }
                    (Err(err), _) | (Ok(()), Err(err)) => return Err(err),
                }
            }
        };

        let lit = skipped.is_none();
        let shown = if lit { Attachment::Lit } else { Attachment::Color };
        display.present(self.gbuffer.get(shown)?, lit)?;

        Ok(FrameReport {
            lit,
            resized,
            skipped,
        })
    }

    /// Resizes the g-buffer, then every handle. Returns whether the extent changed.
    ///
    /// A resize also clears a previous registration failure and registers afresh.
    pub fn resize_if_needed(&mut self, width: u32, height: u32) -> Result<bool> {
        if !self.gbuffer.resize_if_needed(width, height)? {
            return Ok(false);
        }
        log::debug!("viewport resized to {width}x{height}");
        self.disabled = None;
        self.prepare_handles()?;
        Ok(true)
    }

    fn prepare_handles(&mut self) -> Result<()> {
        let (w, h) = self.gbuffer.size();
        for handle in [&mut self.position, &mut self.normal, &mut self.output] {
            let step = handle.resize_if_needed(w, h).and_then(|_| {
                if handle.state() == HandleState::Unregistered {
                    handle.register()
                } else {
                    Ok(())
                }
            });
            match step {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {
                    log::warn!("lighting disabled until next resize: {err}");
                    self.disabled = Some(err.to_string());
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn light(&mut self, config: &FrameConfig) -> Result<()> {
        let lit = self.gbuffer.get(Attachment::Lit)?;
        self.position
            .read_tex(self.gbuffer.get(self.init.position_source)?)?;
        self.normal.read_tex(self.gbuffer.get(self.init.normal_source)?)?;
        self.output.read_tex(lit)?;

        let args = LightingArgs {
            position: self.position.map()?,
            normal: self.normal.map()?,
            output: self.output.map()?,
            light_position: config.light_position,
        };
        let (w, h) = args.extent();
        self.runtime
            .launch_lighting(LaunchConfig::covering(w, h, self.init.tile), &args)?;

        self.position.unmap()?;
        self.normal.unmap()?;
        self.output.unmap()?;

        self.output.write_tex(lit)
    }

    /// Unmaps whatever a failed pass left mapped.
    fn release_mapped(&mut self) -> Result<()> {
        let mut stuck = 0;
        for handle in [&mut self.position, &mut self.normal, &mut self.output] {
            if handle.state() == HandleState::Mapped {
                if let Err(err) = handle.unmap() {
                    log::warn!("unmap of '{}' failed: {err}", handle.transfer().label());
                    stuck += 1;
                }
            }
        }
        if stuck > 0 {
            return Err(InteropError::from(PreconditionError::MappedAcrossFrame {
                count: stuck,
            }));
        }
        Ok(())
    }
}
