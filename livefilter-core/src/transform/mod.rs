//! Frame transform abstraction.
//!
//! The `FrameProcessor` trait is the capability interface to the external
//! noise-suppression runtime: create (via `TransformFactory`), frame length,
//! process one frame, two scalar setters, destroy. The production binding is
//! `DeepFilterRuntime`; tests and the passthrough mode plug in-process
//! implementations into the same seam.
//!
//! `TransformHandle` wraps one processor and owns everything the engine
//! relies on: the frame contract, the reusable output buffer and the
//! destroyed-exactly-once guard. Processors are not internally thread-safe;
//! every call is serialised by the engine's control mutex.

pub mod contract;
pub mod stub;

#[cfg(feature = "deepfilter")]
pub mod deepfilter;

#[cfg(feature = "deepfilter")]
pub use deepfilter::{DeepFilterFactory, DeepFilterRuntime};

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{EngineError, FrameError, Result};
use contract::FrameContract;

/// Contract for per-frame transform backends.
pub trait FrameProcessor: Send + 'static {
    /// Samples per frame. Fixed for the lifetime of the instance.
    fn frame_length(&self) -> usize;

    /// Bound on how much suppression may be applied, in dB.
    fn set_attenuation_limit(&mut self, db: f32);

    /// Post-filter strength. Write-only.
    fn set_post_filter_beta(&mut self, beta: f32);

    /// Process exactly one frame.
    ///
    /// `input` and `output` are both exactly `frame_length()` samples long;
    /// callers go through `TransformHandle`, which checks this first.
    /// Returns the transform's SNR estimate for the frame.
    fn process_frame(
        &mut self,
        input: &[f32],
        output: &mut [f32],
    ) -> std::result::Result<f32, FrameError>;

    /// Release native resources. Must tolerate being called more than once.
    fn destroy(&mut self);

    /// Hand queued native log lines to `sink`. Most backends have none.
    fn drain_log_messages(&mut self, _sink: &mut dyn FnMut(&str)) {}
}

/// Everything needed to instantiate a transform.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// Resolved path of the model artifact.
    pub model_path: PathBuf,
    /// Initial attenuation limit in dB.
    pub attenuation_db: f32,
    /// Native runtime log verbosity (`None` disables native logging).
    pub log_level: Option<String>,
}

/// Creates processors. Separate from `FrameProcessor` so the engine can build
/// a fresh instance on every start without knowing the backend.
pub trait TransformFactory: Send + Sync {
    /// # Errors
    /// Returns `EngineError::CreationFailed` when the backend or model cannot
    /// be loaded.
    fn create(&self, request: &TransformRequest) -> Result<Box<dyn FrameProcessor>>;
}

/// Exclusive owner of one live transform instance.
pub struct TransformHandle {
    inner: Option<Box<dyn FrameProcessor>>,
    contract: FrameContract,
    /// Reused across calls; sized once at creation.
    output: Vec<f32>,
    attenuation_db: f32,
}

impl TransformHandle {
    /// Create a processor through `factory` and wrap it.
    pub fn create(factory: &dyn TransformFactory, request: &TransformRequest) -> Result<Self> {
        let processor = factory.create(request)?;
        let mut handle = Self::new(processor, request.attenuation_db)?;
        handle.drain_log_messages();
        info!(
            model = %request.model_path.display(),
            frame_len = handle.frame_length(),
            attenuation_db = request.attenuation_db,
            "transform created"
        );
        Ok(handle)
    }

    /// Wrap an already created processor.
    ///
    /// # Errors
    /// `CreationFailed` if the processor reports a zero frame length; the
    /// processor is destroyed before returning.
    pub fn new(mut processor: Box<dyn FrameProcessor>, attenuation_db: f32) -> Result<Self> {
        let frame_len = processor.frame_length();
        if frame_len == 0 {
            processor.destroy();
            return Err(EngineError::CreationFailed(
                "transform reported a frame length of 0".into(),
            ));
        }

        Ok(Self {
            inner: Some(processor),
            contract: FrameContract::new(frame_len),
            output: vec![0.0; frame_len],
            attenuation_db,
        })
    }

    pub fn frame_length(&self) -> usize {
        self.contract.frame_len()
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_some()
    }

    /// Last attenuation limit written through this handle.
    pub fn attenuation_limit(&self) -> f32 {
        self.attenuation_db
    }

    pub fn set_attenuation_limit(&mut self, db: f32) {
        match self.inner.as_mut() {
            Some(inner) => {
                inner.set_attenuation_limit(db);
                self.attenuation_db = db;
            }
            None => warn!(db, "attenuation limit set on destroyed transform; ignored"),
        }
    }

    pub fn set_post_filter_beta(&mut self, beta: f32) {
        match self.inner.as_mut() {
            Some(inner) => inner.set_post_filter_beta(beta),
            None => warn!(beta, "post-filter beta set on destroyed transform; ignored"),
        }
    }

    /// Run one frame through the transform.
    ///
    /// The returned slice borrows the handle's output buffer, which the next
    /// call overwrites. Allocation-free; safe to call from the audio thread.
    ///
    /// # Errors
    /// - `FrameError::Mismatch` if `input.len()` is not the frame length. The
    ///   transform is not called.
    /// - `FrameError::Destroyed` after `destroy()`.
    /// - `FrameError::Transform` / `FrameError::Panicked` if the backend fails.
    pub fn process_frame(&mut self, input: &[f32]) -> std::result::Result<(f32, &[f32]), FrameError> {
        self.contract.check_input(input)?;
        let inner = self.inner.as_mut().ok_or(FrameError::Destroyed)?;
        let output = self.output.as_mut_slice();

        let snr = panic::catch_unwind(AssertUnwindSafe(|| inner.process_frame(input, output)))
            .map_err(|_| FrameError::Panicked)??;

        Ok((snr, self.output.as_slice()))
    }

    /// Forward queued native log lines to `tracing`.
    pub fn drain_log_messages(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.drain_log_messages(&mut |line| debug!(target: "livefilter::native", "{line}"));
        }
    }

    /// Release the processor. Later calls are no-ops.
    pub fn destroy(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.drain_log_messages(&mut |line| debug!(target: "livefilter::native", "{line}"));
            inner.destroy();
            debug!("transform destroyed");
        }
    }
}

impl Drop for TransformHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for TransformHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformHandle")
            .field("frame_len", &self.frame_length())
            .field("live", &self.is_live())
            .field("attenuation_db", &self.attenuation_db)
            .finish_non_exhaustive()
    }
}
