/// Initialization parameters for the headless GPU context.
///
/// Add configuration flags only when a concrete platform or backend
/// requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Backends wgpu may pick an adapter from.
    ///
    /// Defaults to `WGPU_BACKEND` if set, else the primary backends. GL is
    /// left out: it cannot render to the float g-buffer formats.
    pub backends: wgpu::Backends,

    /// Adapter preference. Compute interop favors the discrete GPU.
    pub power_preference: wgpu::PowerPreference,

    /// Accept only a software (fallback) adapter.
    ///
    /// Useful on CI runners without a physical GPU.
    pub force_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// The lighting pass needs none; keep the set empty for portability.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::from_env().unwrap_or(wgpu::Backends::PRIMARY),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        }
    }
}
