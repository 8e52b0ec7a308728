//! In-process doubles for the audio driver and the transform.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use livefilter_core::audio::{
    AudioBackend, DuplexBlock, DuplexCallback, DuplexStream, NegotiatedFormat, StreamRequest,
    StreamStatus,
};
use livefilter_core::{
    EngineError, FrameError, FrameProcessor, TransformFactory, TransformRequest,
};
use parking_lot::Mutex;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn position(log: &EventLog, entry: &str) -> Option<usize> {
    log.lock().iter().position(|e| e == entry)
}

// ── Audio driver ─────────────────────────────────────────────────────────────

/// Stores the engine's callback and lets the test play driver.
pub struct FakeBackend {
    pub log: EventLog,
    pub format: NegotiatedFormat,
    pub fail_validate: AtomicBool,
    pub fail_open: AtomicBool,
    pub requests: Mutex<Vec<StreamRequest>>,
    callback: Arc<Mutex<Option<DuplexCallback>>>,
}

impl FakeBackend {
    pub fn new(log: EventLog) -> Self {
        Self::with_format(log, NegotiatedFormat::MONO)
    }

    pub fn with_format(log: EventLog, format: NegotiatedFormat) -> Self {
        Self {
            log,
            format,
            fail_validate: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            callback: Arc::new(Mutex::new(None)),
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Run one block through the installed callback. Returns `false` when no
    /// stream is open.
    pub fn drive(&self, input: &[f32], output: &mut [f32], frames: usize) -> bool {
        let mut slot = self.callback.lock();
        let Some(callback) = slot.as_mut() else {
            return false;
        };
        callback(DuplexBlock {
            input,
            input_channels: self.format.input_channels as usize,
            output,
            output_channels: self.format.output_channels as usize,
            frames,
            status: StreamStatus::default(),
        });
        true
    }
}

impl AudioBackend for FakeBackend {
    fn validate(&self, request: &StreamRequest) -> livefilter_core::error::Result<NegotiatedFormat> {
        self.requests.lock().push(request.clone());
        if self.fail_validate.load(Ordering::SeqCst) {
            return Err(EngineError::DeviceConfig("device not found".into()));
        }
        Ok(self.format)
    }

    fn open_duplex(
        &self,
        _request: &StreamRequest,
        _format: NegotiatedFormat,
        callback: DuplexCallback,
    ) -> livefilter_core::error::Result<Box<dyn DuplexStream>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(EngineError::Audio("stream refused to start".into()));
        }
        *self.callback.lock() = Some(callback);
        self.log.lock().push("stream-opened".into());
        Ok(Box::new(FakeStream {
            callback: Arc::clone(&self.callback),
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeStream {
    callback: Arc<Mutex<Option<DuplexCallback>>>,
    log: EventLog,
}

impl DuplexStream for FakeStream {
    fn stop(&mut self) -> livefilter_core::error::Result<()> {
        // Waits for an in-flight block, like a real driver.
        self.callback.lock().take();
        self.log.lock().push("stream-stopped".into());
        Ok(())
    }
}

// ── Transform ────────────────────────────────────────────────────────────────

/// Counts instances and records every control call.
pub struct RecordingFactory {
    pub log: EventLog,
    pub frame_len: AtomicUsize,
    pub fail: AtomicBool,
    pub created: Arc<AtomicUsize>,
    pub destroyed: Arc<AtomicUsize>,
    /// Multiplier applied by every processor; lets tests tell models apart.
    pub gain: Mutex<f32>,
    /// Time `create` takes, to hold an engine in `Starting`.
    pub create_delay: Mutex<Duration>,
    /// Log `frame:{id}` for every processed frame.
    pub log_frames: AtomicBool,
}

impl RecordingFactory {
    pub fn new(log: EventLog, frame_len: usize) -> Self {
        Self {
            log,
            frame_len: AtomicUsize::new(frame_len),
            fail: AtomicBool::new(false),
            created: Arc::new(AtomicUsize::new(0)),
            destroyed: Arc::new(AtomicUsize::new(0)),
            gain: Mutex::new(1.0),
            create_delay: Mutex::new(Duration::ZERO),
            log_frames: AtomicBool::new(false),
        }
    }

    pub fn live_instances(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.destroyed.load(Ordering::SeqCst)
    }
}

impl TransformFactory for RecordingFactory {
    fn create(
        &self,
        request: &TransformRequest,
    ) -> livefilter_core::error::Result<Box<dyn FrameProcessor>> {
        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::CreationFailed(format!(
                "cannot load {}",
                request.model_path.display()
            )));
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!(
            "create:{}:{}",
            request.model_path.display(),
            request.attenuation_db
        ));
        Ok(Box::new(RecordingProcessor {
            id,
            frame_len: self.frame_len.load(Ordering::SeqCst),
            gain: *self.gain.lock(),
            log: Arc::clone(&self.log),
            destroyed: Arc::clone(&self.destroyed),
            alive: true,
            log_frames: self.log_frames.load(Ordering::SeqCst),
        }))
    }
}

pub struct RecordingProcessor {
    id: usize,
    frame_len: usize,
    gain: f32,
    log: EventLog,
    destroyed: Arc<AtomicUsize>,
    alive: bool,
    log_frames: bool,
}

impl FrameProcessor for RecordingProcessor {
    fn frame_length(&self) -> usize {
        self.frame_len
    }

    fn set_attenuation_limit(&mut self, db: f32) {
        self.log.lock().push(format!("atten:{db}"));
    }

    fn set_post_filter_beta(&mut self, beta: f32) {
        self.log.lock().push(format!("beta:{beta}"));
    }

    fn process_frame(&mut self, input: &[f32], output: &mut [f32]) -> Result<f32, FrameError> {
        assert!(self.alive, "process_frame after destroy");
        assert_eq!(input.len(), self.frame_len);
        for (o, i) in output.iter_mut().zip(input) {
            *o = i * self.gain;
        }
        if self.log_frames {
            self.log.lock().push(format!("frame:{}", self.id));
        }
        Ok(7.5)
    }

    fn destroy(&mut self) {
        if self.alive {
            self.alive = false;
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(format!("destroy:{}", self.id));
        }
    }
}
