//! Audio driver abstraction.
//!
//! # Design constraints
//!
//! The driver invokes the duplex callback on an OS audio thread once per
//! block. Inside the callback we **must not**:
//! - Allocate heap memory
//! - Block on a mutex without a time bound
//! - Perform I/O
//!
//! `AudioBackend` is the seam between the engine and the platform: the engine
//! asks it to validate the selected devices and to open one duplex stream with
//! a fixed block size. `CpalBackend` is the production implementation; tests
//! drive the callback directly through an in-process backend.

pub mod device;

#[cfg(feature = "audio-cpal")]
pub mod cpal_backend;

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;

use crate::error::Result;

/// The transform's trained operating rate. Not user-selectable.
pub const SAMPLE_RATE: u32 = 48_000;

/// Non-fatal conditions the driver reports alongside a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    /// Captured samples were dropped before reaching the callback.
    pub input_overflow: bool,
    /// Fewer captured samples were available than the block needed.
    pub input_underflow: bool,
}

impl StreamStatus {
    pub fn is_clean(&self) -> bool {
        !self.input_overflow && !self.input_underflow
    }
}

/// One driver invocation: interleaved input, interleaved output, frame count.
pub struct DuplexBlock<'a> {
    pub input: &'a [f32],
    pub input_channels: usize,
    pub output: &'a mut [f32],
    pub output_channels: usize,
    /// Frames the driver says this block holds.
    pub frames: usize,
    pub status: StreamStatus,
}

/// The real-time callback handed to `AudioBackend::open_duplex`.
pub type DuplexCallback = Box<dyn FnMut(DuplexBlock<'_>) + Send + 'static>;

/// Device ids are the names the OS reports. `None` selects the default device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub input: Option<String>,
    pub output: Option<String>,
}

/// What the engine asks of the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub devices: DeviceSelection,
    pub sample_rate: u32,
    /// Block size imposed on the driver; equals the transform frame length.
    pub block_frames: usize,
}

/// Channel layout the devices accepted at the requested rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub input_channels: u16,
    pub output_channels: u16,
}

impl NegotiatedFormat {
    pub const MONO: Self = Self {
        input_channels: 1,
        output_channels: 1,
    };
}

/// Platform audio subsystem.
pub trait AudioBackend: Send + Sync {
    /// Check that the selected devices can run `request`.
    ///
    /// # Errors
    /// `EngineError::DeviceConfig` if a device is missing or cannot run at
    /// the requested rate with f32 samples.
    fn validate(&self, request: &StreamRequest) -> Result<NegotiatedFormat>;

    /// Open and start one duplex stream. `callback` runs on the driver thread
    /// once per block until the returned stream is stopped.
    ///
    /// # Errors
    /// `EngineError::Audio` if the stream cannot be built or started.
    fn open_duplex(
        &self,
        request: &StreamRequest,
        format: NegotiatedFormat,
        callback: DuplexCallback,
    ) -> Result<Box<dyn DuplexStream>>;
}

/// A live duplex stream.
pub trait DuplexStream: Send {
    /// Stop and close the stream. Returns only once the driver will not
    /// invoke the callback again.
    fn stop(&mut self) -> Result<()>;
}
