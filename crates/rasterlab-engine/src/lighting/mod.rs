//! Deferred lighting pass: g-buffer, per-pixel Lambert kernel and the frame
//! loop that moves attachments through the interop handles.

mod gbuffer;
mod kernel;
mod orchestrator;

pub use gbuffer::{Attachment, GBuffer, GBufferLayout};
pub use kernel::{
    ALPHA_CHANNEL, DISPLAY_SCALE, LaunchConfig, LightingArgs, TileShape, encode_element, lambert,
    output_value, vec3_from_channels,
};
pub use orchestrator::{
    DisplayPass, FrameConfig, FrameOrchestrator, FrameReport, GeometryPass, OrchestratorInit,
};
