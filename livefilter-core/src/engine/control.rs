//! The single lock shared by the control thread and the audio callback.
//!
//! Everything the two threads both touch lives in `ControlState` behind one
//! `parking_lot::Mutex`: the transform slot, the engine status and the stream.
//! The control thread takes it for every start/stop/parameter change; the
//! callback takes it only around one `process_frame` call and never waits
//! longer than its lock budget.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::audio::{DeviceSelection, DuplexStream};
use crate::events::EngineStatus;
use crate::transform::TransformHandle;

/// State serialised by the control lock.
pub struct ControlState {
    pub status: EngineStatus,
    /// `Some` from install during start until destroy during stop.
    pub transform: Option<TransformHandle>,
    pub stream: Option<Box<dyn DuplexStream>>,
    /// Applied to the live transform and used for the next creation.
    pub attenuation_db: f32,
    pub post_filter_beta: Option<f32>,
    pub model_path: PathBuf,
    pub devices: DeviceSelection,
}

impl ControlState {
    /// Push the current parameters into the live transform, if any.
    pub fn apply_parameters(&mut self) {
        let beta = self.post_filter_beta;
        let atten = self.attenuation_db;
        if let Some(handle) = self.transform.as_mut() {
            if handle.attenuation_limit() != atten {
                handle.set_attenuation_limit(atten);
            }
            if let Some(beta) = beta {
                handle.set_post_filter_beta(beta);
            }
        }
    }
}

pub struct ControlChannel {
    state: Mutex<ControlState>,
    /// Signalled when a start leaves `Starting`.
    settled: Condvar,
}

impl ControlChannel {
    pub fn new(model_path: PathBuf, attenuation_db: f32, post_filter_beta: Option<f32>) -> Self {
        Self {
            state: Mutex::new(ControlState {
                status: EngineStatus::Idle,
                transform: None,
                stream: None,
                attenuation_db,
                post_filter_beta,
                model_path,
                devices: DeviceSelection::default(),
            }),
            settled: Condvar::new(),
        }
    }

    /// Blocking acquire. Control thread only.
    pub fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock()
    }

    /// Bounded acquire for the audio callback.
    #[inline]
    pub fn try_lock_for(&self, budget: Duration) -> Option<MutexGuard<'_, ControlState>> {
        self.state.try_lock_for(budget)
    }

    /// Block until no start is in flight. The lock is released while waiting.
    pub fn wait_while_starting(&self, guard: &mut MutexGuard<'_, ControlState>) {
        while guard.status == EngineStatus::Starting {
            self.settled.wait(guard);
        }
    }

    /// Wake control calls parked in `wait_while_starting`.
    pub fn notify_settled(&self) {
        self.settled.notify_all();
    }

    pub fn status(&self) -> EngineStatus {
        self.state.lock().status
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel").finish_non_exhaustive()
    }
}
