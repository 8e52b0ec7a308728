//! `DuplexEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! DuplexEngine::new()
//!     └─► start()   → transform created, devices validated, stream open, status = Running
//!         └─► stop()  → stream stopped, transform destroyed, status = Idle
//! ```
//!
//! `start()` in any state but `Idle` returns `AlreadyRunning`. `stop()` is
//! idempotent and always succeeds; issued during a start it waits for the
//! start to settle and then tears it down.
//!
//! ## Threading
//!
//! Control calls come from any thread and serialise on the control lock. The
//! audio callback takes the same lock for one frame at a time with a bounded
//! wait, so `stop()` can hold it across the stream shutdown: a callback that
//! races the shutdown gives up after its budget and writes silence.

pub mod callback;
pub mod control;

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        AudioBackend, DeviceSelection, DuplexBlock, DuplexCallback, StreamRequest, SAMPLE_RATE,
    },
    error::{EngineError, Result},
    events::{EngineStatus, EngineStatusEvent},
    metrics::{EngineMetrics, MetricsTracker, DEFAULT_WINDOW},
    transform::{TransformFactory, TransformHandle, TransformRequest},
};
use callback::{CallbackDiagnostics, DiagnosticsSnapshot, FrameScheduler};
use control::ControlChannel;

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Attenuation limits outside this range are clamped.
pub const ATTENUATION_RANGE_DB: (f32, f32) = (0.0, 40.0);

/// Configuration for `DuplexEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model artifact handed to the transform on every start.
    pub model_path: PathBuf,
    /// Native runtime log level. `None` disables native logging.
    pub log_level: Option<String>,
    /// Attenuation limit applied at creation. Default: 24 dB.
    pub attenuation_db: f32,
    /// Post-filter strength applied after creation. `None` keeps the
    /// runtime's own default.
    pub post_filter_beta: Option<f32>,
    /// Frames kept in the latency window. Default: 30.
    pub metrics_window: usize,
    /// Longest the audio callback waits for the control lock before giving
    /// up on the block. Default: 2 ms.
    pub callback_lock_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            log_level: Some("info".into()),
            attenuation_db: 24.0,
            post_filter_beta: None,
            metrics_window: DEFAULT_WINDOW,
            callback_lock_budget: Duration::from_millis(2),
        }
    }
}

/// The top-level engine handle.
///
/// `DuplexEngine` is `Send + Sync`; all fields use interior mutability.
/// Wrap in `Arc<DuplexEngine>` to share between a UI and a metrics poller.
pub struct DuplexEngine {
    config: EngineConfig,
    factory: Arc<dyn TransformFactory>,
    backend: Arc<dyn AudioBackend>,
    control: Arc<ControlChannel>,
    metrics: Arc<MetricsTracker>,
    diagnostics: Arc<CallbackDiagnostics>,
    /// Frame length of the current (or last) run. 0 before the first start.
    frame_len: AtomicUsize,
    status_tx: broadcast::Sender<EngineStatusEvent>,
}

impl DuplexEngine {
    /// Create an idle engine. Nothing is loaded until `start()`.
    pub fn new(
        config: EngineConfig,
        factory: Arc<dyn TransformFactory>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let attenuation_db = clamp_attenuation(config.attenuation_db);
        let post_filter_beta = config.post_filter_beta.filter(|b| valid_beta(*b));
        let control = Arc::new(ControlChannel::new(
            config.model_path.clone(),
            attenuation_db,
            post_filter_beta,
        ));

        Self {
            metrics: Arc::new(MetricsTracker::new(config.metrics_window)),
            diagnostics: Arc::new(CallbackDiagnostics::default()),
            frame_len: AtomicUsize::new(0),
            config,
            factory,
            backend,
            control,
            status_tx,
        }
    }

    /// Start the duplex stream on the given devices (`None` = default).
    ///
    /// Blocks until the stream is running or the start has been rolled back.
    ///
    /// # Errors
    /// - `AlreadyRunning` unless the engine is `Idle`.
    /// - `CreationFailed` if the transform cannot be created.
    /// - `DeviceConfig` if the devices cannot run at 48 kHz with the
    ///   transform's frame length.
    /// - `Audio` if the stream fails to open.
    ///
    /// On any error the engine is back in `Idle` with nothing held.
    pub fn start(&self, input: Option<String>, output: Option<String>) -> Result<()> {
        let devices = DeviceSelection { input, output };
        let request = {
            let mut state = self.control.lock();
            if state.status != EngineStatus::Idle {
                return Err(EngineError::AlreadyRunning);
            }
            state.status = EngineStatus::Starting;
            state.devices = devices.clone();
            TransformRequest {
                model_path: state.model_path.clone(),
                attenuation_db: state.attenuation_db,
                log_level: self.config.log_level.clone(),
            }
        };
        self.emit(EngineStatus::Starting, None);

        match self.start_inner(devices, &request) {
            Ok(frame_len) => {
                info!(
                    frame_len,
                    sample_rate = SAMPLE_RATE,
                    model = %request.model_path.display(),
                    "engine started"
                );
                Ok(())
            }
            Err(e) => {
                error!("engine start failed: {e}");
                {
                    let mut state = self.control.lock();
                    state.status = EngineStatus::Idle;
                    self.emit(EngineStatus::Idle, Some(e.to_string()));
                }
                self.control.notify_settled();
                Err(e)
            }
        }
    }

    fn start_inner(&self, devices: DeviceSelection, request: &TransformRequest) -> Result<usize> {
        let mut handle = TransformHandle::create(self.factory.as_ref(), request)?;
        let frame_len = handle.frame_length();

        let stream_request = StreamRequest {
            devices,
            sample_rate: SAMPLE_RATE,
            block_frames: frame_len,
        };
        let format = match self.backend.validate(&stream_request) {
            Ok(format) => format,
            Err(e) => {
                handle.destroy();
                return Err(e);
            }
        };
        debug!(?format, frame_len, "devices validated");

        self.frame_len.store(frame_len, Ordering::Release);
        self.metrics.reset();
        self.diagnostics.reset();
        {
            let mut state = self.control.lock();
            state.transform = Some(handle);
            // Setters called while starting only reached the control state.
            state.apply_parameters();
        }

        let mut scheduler = FrameScheduler::new(
            Arc::clone(&self.control),
            Arc::clone(&self.metrics),
            Arc::clone(&self.diagnostics),
            frame_len,
            self.config.callback_lock_budget,
        );
        let callback: DuplexCallback =
            Box::new(move |block: DuplexBlock<'_>| scheduler.process(block));

        match self.backend.open_duplex(&stream_request, format, callback) {
            Ok(stream) => {
                {
                    let mut state = self.control.lock();
                    state.stream = Some(stream);
                    state.status = EngineStatus::Running;
                    self.emit(EngineStatus::Running, None);
                }
                self.control.notify_settled();
                Ok(frame_len)
            }
            Err(e) => {
                let handle = self.control.lock().transform.take();
                if let Some(mut handle) = handle {
                    handle.destroy();
                }
                Err(e)
            }
        }
    }

    /// Stop the stream and release the transform. No-op when idle.
    ///
    /// A start still in flight is waited out first, so the engine is always
    /// `Idle` when this returns. The stream is stopped before the transform is
    /// destroyed, both under the control lock, so no callback can observe a
    /// destroyed transform.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.control.lock();
        self.control.wait_while_starting(&mut state);
        if state.status != EngineStatus::Running {
            drop(state);
            self.metrics.reset();
            return Ok(());
        }

        state.status = EngineStatus::Stopping;
        self.emit(EngineStatus::Stopping, None);

        if let Some(mut stream) = state.stream.take() {
            if let Err(e) = stream.stop() {
                warn!("stream stop reported an error: {e}");
            }
        }
        if let Some(mut handle) = state.transform.take() {
            handle.destroy();
        }
        state.status = EngineStatus::Idle;
        drop(state);

        self.metrics.reset();
        let diag = self.diagnostics.snapshot();
        info!(
            frames = diag.frames_processed,
            silenced = diag.silenced(),
            lock_timeouts = diag.lock_timeouts,
            "engine stopped"
        );
        self.emit(EngineStatus::Idle, None);
        Ok(())
    }

    /// Set the attenuation limit in dB. Values outside 0..=40 are clamped.
    ///
    /// Takes effect on the next frame when running, and on the next start
    /// otherwise. Returns the value applied.
    pub fn set_attenuation(&self, db: f32) -> f32 {
        let applied = clamp_attenuation(db);
        if applied != db {
            warn!(requested = db, applied, "attenuation limit clamped");
        }
        let mut state = self.control.lock();
        state.attenuation_db = applied;
        if let Some(handle) = state.transform.as_mut() {
            handle.set_attenuation_limit(applied);
        }
        applied
    }

    /// Set the post-filter strength. Negative or non-finite values are ignored.
    pub fn set_post_filter_beta(&self, beta: f32) {
        if !valid_beta(beta) {
            warn!(beta, "ignoring invalid post-filter beta");
            return;
        }
        let mut state = self.control.lock();
        state.post_filter_beta = Some(beta);
        if let Some(handle) = state.transform.as_mut() {
            handle.set_post_filter_beta(beta);
        }
    }

    /// Switch model artifacts.
    ///
    /// A start still in flight is waited out first. When idle, only records
    /// the path for the next start. When running, creates the new transform
    /// off the lock and swaps it in between two frames; the old instance is
    /// destroyed after the swap.
    ///
    /// # Errors
    /// - `CreationFailed` if the new model cannot be loaded. The running
    ///   transform is untouched.
    /// - `FrameLengthChanged` if the new model's frame length differs from
    ///   the open stream's block size.
    /// - `NotRunning` if the engine stopped while the new model was loading.
    pub fn swap_model(&self, model_path: impl AsRef<Path>) -> Result<()> {
        let model_path = model_path.as_ref().to_path_buf();
        let request = {
            let mut state = self.control.lock();
            self.control.wait_while_starting(&mut state);
            if !state.status.is_running() {
                info!(model = %model_path.display(), "model path set for next start");
                state.model_path = model_path;
                return Ok(());
            }
            TransformRequest {
                model_path: model_path.clone(),
                attenuation_db: state.attenuation_db,
                log_level: self.config.log_level.clone(),
            }
        };

        let mut next = TransformHandle::create(self.factory.as_ref(), &request)?;
        let expected = self.frame_len.load(Ordering::Acquire);
        if next.frame_length() != expected {
            let actual = next.frame_length();
            next.destroy();
            return Err(EngineError::FrameLengthChanged { expected, actual });
        }

        let previous = {
            let mut state = self.control.lock();
            if !state.status.is_running() {
                drop(state);
                next.destroy();
                return Err(EngineError::NotRunning);
            }
            state.model_path = model_path;
            let previous = state.transform.replace(next);
            state.apply_parameters();
            previous
        };
        if let Some(mut previous) = previous {
            previous.destroy();
        }
        info!(model = %request.model_path.display(), "model swapped");
        Ok(())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        self.control.status()
    }

    pub fn attenuation(&self) -> f32 {
        self.control.lock().attenuation_db
    }

    pub fn model_path(&self) -> PathBuf {
        self.control.lock().model_path.clone()
    }

    /// Devices requested by the most recent start.
    pub fn devices(&self) -> DeviceSelection {
        self.control.lock().devices.clone()
    }

    /// Frame length of the current or most recent run.
    pub fn frame_length(&self) -> Option<usize> {
        match self.frame_len.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    /// Average processing latency and realtime factor over the window.
    pub fn get_metrics(&self) -> EngineMetrics {
        EngineMetrics::compute(
            self.metrics.average(),
            self.frame_len.load(Ordering::Acquire),
            SAMPLE_RATE,
        )
    }

    /// The latency window itself.
    pub fn metrics(&self) -> Arc<MetricsTracker> {
        Arc::clone(&self.metrics)
    }

    /// Snapshot of callback counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn emit(&self, status: EngineStatus, detail: Option<String>) {
        let _ = self.status_tx.send(EngineStatusEvent { status, detail });
    }
}

impl Drop for DuplexEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn clamp_attenuation(db: f32) -> f32 {
    let (lo, hi) = ATTENUATION_RANGE_DB;
    if db.is_nan() {
        return lo;
    }
    db.clamp(lo, hi)
}

fn valid_beta(beta: f32) -> bool {
    beta.is_finite() && beta >= 0.0
}
