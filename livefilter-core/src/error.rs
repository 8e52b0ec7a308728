use thiserror::Error;

/// Errors surfaced to callers of the control surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The native library or model artifact could not be loaded, or the
    /// native create call returned a null handle.
    #[error("transform creation failed: {0}")]
    CreationFailed(String),

    /// The selected devices cannot run at the fixed rate / channel layout.
    #[error("device configuration error: {0}")]
    DeviceConfig(String),

    /// The duplex stream failed to open or start.
    #[error("audio stream error: {0}")]
    Audio(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("frame length changed: stream runs at {expected} samples, model wants {actual}")]
    FrameLengthChanged { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Per-frame failures. Contained inside the audio callback and turned into
/// silence; never returned across the control surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("frame mismatch: expected {expected} samples, got {actual}")]
    Mismatch { expected: usize, actual: usize },

    #[error("transform failed: {0}")]
    Transform(&'static str),

    #[error("transform handle already destroyed")]
    Destroyed,

    #[error("transform panicked")]
    Panicked,
}
