//! # livefilter-core
//!
//! Real-time duplex noise-suppression engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone ─► AudioBackend duplex callback ─► FrameScheduler
//!                                                   │  try_lock_for(budget)
//!                                             ControlChannel (one mutex)
//!                                                   │
//!                                       TransformHandle::process_frame
//!                                                   │
//!                                    Speaker ◄──────┴──► MetricsTracker
//! ```
//!
//! The driver block size is forced to the transform's frame length, so each
//! callback carries exactly one frame. The callback never allocates and never
//! waits on the control lock longer than its budget; anything that goes wrong
//! inside it becomes a block of silence.
//!
//! Control calls (`start`, `stop`, `set_attenuation`, ...) live on
//! `DuplexEngine` and may come from any thread.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod transform;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, DeviceSelection, DuplexBlock, DuplexStream, SAMPLE_RATE};
pub use engine::callback::DiagnosticsSnapshot;
pub use engine::{DuplexEngine, EngineConfig};
pub use error::{EngineError, FrameError};
pub use events::{EngineStatus, EngineStatusEvent};
pub use metrics::{EngineMetrics, MetricsTracker};
pub use transform::{
    stub::PassthroughFactory, FrameProcessor, TransformFactory, TransformHandle, TransformRequest,
};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;

#[cfg(feature = "deepfilter")]
pub use transform::DeepFilterFactory;
