use thiserror::Error;

use super::format::ElementType;

/// Result alias used throughout the interop core.
pub type Result<T> = std::result::Result<T, InteropError>;

/// Errors raised by textures, transfer buffers, interop handles and the
/// runtimes behind them.
///
/// Two classes exist:
/// - [`InteropError::Precondition`] and [`InteropError::UnsupportedFormat`]
///   are programming errors. They are reported at the component boundary and
///   are never retried.
/// - every other variant is a runtime refusal (registration, mapping, kernel
///   launch, allocation). The frame orchestrator degrades on these and keeps
///   rendering without the lighting pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteropError {
    /// A contract of the calling component was violated.
    #[error("precondition violated: {0}")]
    Precondition(#[from] PreconditionError),

    /// The format/type combination is outside the supported set.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The compute runtime refused to register a resource.
    #[error("registration failed: {0}")]
    Registration(String),

    /// The compute runtime failed to map or unmap a registered resource.
    #[error("mapping failed: {0}")]
    Mapping(String),

    /// The lighting kernel could not be launched.
    #[error("kernel launch failed: {0}")]
    Launch(String),

    /// Allocation, transfer or synchronization failure in the graphics backend.
    #[error("device error: {0}")]
    Device(String),
}

impl InteropError {
    /// True for failures the frame loop may survive by skipping the compute pass.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            InteropError::Precondition(_) | InteropError::UnsupportedFormat(_)
        )
    }

    /// Returns the precondition detail, if this is a precondition violation.
    pub fn precondition(&self) -> Option<&PreconditionError> {
        match self {
            InteropError::Precondition(p) => Some(p),
            _ => None,
        }
    }
}

/// Contract violations detected locally by a component.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error(
        "format mismatch: expected {expected_channels}x{expected_element:?}, \
         got {actual_channels}x{actual_element:?}"
    )]
    FormatMismatch {
        expected_channels: u32,
        expected_element: ElementType,
        actual_channels: u32,
        actual_element: ElementType,
    },

    #[error("size mismatch: expected {expected:?}, got {actual:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("write_tex on a transfer buffer with no allocated storage")]
    WriteBeforeRead,

    #[error("zero extent {width}x{height}")]
    ZeroExtent { width: u32, height: u32 },

    #[error("resource is already registered")]
    AlreadyRegistered,

    #[error("resource is not registered")]
    NotRegistered,

    #[error("resource is already mapped")]
    AlreadyMapped,

    #[error("resource is not mapped")]
    NotMapped,

    #[error("resize requested while mapped")]
    ResizeWhileMapped,

    #[error("registered size {registered} does not match buffer size {current}")]
    StaleRegistration { registered: u64, current: u64 },

    #[error("unknown or stale registration token {0}")]
    StaleToken(u64),

    #[error("{count} device array(s) still mapped at end of frame")]
    MappedAcrossFrame { count: usize },

    #[error("data length {actual} does not match expected {expected} bytes")]
    DataLength { expected: usize, actual: usize },

    #[error("invalid device array view: {0}")]
    ViewShape(String),

    #[error("g-buffer has no '{0}' attachment")]
    MissingAttachment(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preconditions_are_not_recoverable() {
        let err: InteropError = PreconditionError::AlreadyMapped.into();
        assert!(!err.is_recoverable());
        assert_eq!(err.precondition(), Some(&PreconditionError::AlreadyMapped));
    }

    #[test]
    fn runtime_refusals_are_recoverable() {
        assert!(InteropError::Registration("denied".into()).is_recoverable());
        assert!(InteropError::Mapping("lost".into()).is_recoverable());
        assert!(InteropError::Device("oom".into()).is_recoverable());
        assert!(!InteropError::UnsupportedFormat("rgb32i".into()).is_recoverable());
    }

    #[test]
    fn messages_are_one_line() {
        let err = InteropError::from(PreconditionError::StaleRegistration {
            registered: 16,
            current: 64,
        });
        let msg = err.to_string();
        assert!(!msg.contains('\n'));
        assert!(msg.contains("16"));
        assert!(msg.contains("64"));
    }
}
