//! Per-block work done on the driver's real-time thread.
//!
//! `FrameScheduler::process` is the body of the duplex callback. For each
//! block it checks the frame contract, down-selects channel 0 into a
//! preallocated scratch frame, takes the control lock with a bounded wait,
//! runs the transform and fans its output out to every output channel.
//! Any path that does not produce a processed frame writes a full block of
//! zeros instead.

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::control::ControlChannel;
use crate::audio::DuplexBlock;
use crate::metrics::MetricsTracker;
use crate::transform::contract::FrameContract;

/// Counters written by the audio callback, read by the control thread.
pub struct CallbackDiagnostics {
    pub blocks: AtomicUsize,
    pub frames_processed: AtomicUsize,
    /// Silenced because the block broke the frame contract.
    pub silenced_mismatch: AtomicUsize,
    /// Silenced because the engine was not running or had no transform.
    pub silenced_inactive: AtomicUsize,
    pub transform_errors: AtomicUsize,
    pub lock_timeouts: AtomicUsize,
    /// Blocks the driver flagged with an overflow or underflow.
    pub driver_status_flags: AtomicUsize,
    /// `f32` bits of the last SNR estimate; NaN until the first frame.
    last_snr_bits: AtomicU32,
}

impl Default for CallbackDiagnostics {
    fn default() -> Self {
        Self {
            blocks: AtomicUsize::new(0),
            frames_processed: AtomicUsize::new(0),
            silenced_mismatch: AtomicUsize::new(0),
            silenced_inactive: AtomicUsize::new(0),
            transform_errors: AtomicUsize::new(0),
            lock_timeouts: AtomicUsize::new(0),
            driver_status_flags: AtomicUsize::new(0),
            last_snr_bits: AtomicU32::new(f32::NAN.to_bits()),
        }
    }
}

impl CallbackDiagnostics {
    pub fn reset(&self) {
        self.blocks.store(0, Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
        self.silenced_mismatch.store(0, Ordering::Relaxed);
        self.silenced_inactive.store(0, Ordering::Relaxed);
        self.transform_errors.store(0, Ordering::Relaxed);
        self.lock_timeouts.store(0, Ordering::Relaxed);
        self.driver_status_flags.store(0, Ordering::Relaxed);
        self.last_snr_bits
            .store(f32::NAN.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let snr = f32::from_bits(self.last_snr_bits.load(Ordering::Relaxed));
        DiagnosticsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            silenced_mismatch: self.silenced_mismatch.load(Ordering::Relaxed),
            silenced_inactive: self.silenced_inactive.load(Ordering::Relaxed),
            transform_errors: self.transform_errors.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            driver_status_flags: self.driver_status_flags.load(Ordering::Relaxed),
            last_snr_db: snr.is_finite().then_some(snr),
        }
    }

    #[inline]
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks: usize,
    pub frames_processed: usize,
    pub silenced_mismatch: usize,
    pub silenced_inactive: usize,
    pub transform_errors: usize,
    pub lock_timeouts: usize,
    pub driver_status_flags: usize,
    pub last_snr_db: Option<f32>,
}

impl DiagnosticsSnapshot {
    /// Blocks that went out as silence for any reason.
    pub fn silenced(&self) -> usize {
        self.silenced_mismatch + self.silenced_inactive + self.transform_errors + self.lock_timeouts
    }
}

/// State moved into the duplex callback. Everything is sized at construction.
pub struct FrameScheduler {
    control: Arc<ControlChannel>,
    metrics: Arc<MetricsTracker>,
    diagnostics: Arc<CallbackDiagnostics>,
    contract: FrameContract,
    lock_budget: Duration,
    /// Channel 0 of the current block.
    frame: Vec<f32>,
}

impl FrameScheduler {
    pub fn new(
        control: Arc<ControlChannel>,
        metrics: Arc<MetricsTracker>,
        diagnostics: Arc<CallbackDiagnostics>,
        frame_len: usize,
        lock_budget: Duration,
    ) -> Self {
        Self {
            control,
            metrics,
            diagnostics,
            contract: FrameContract::new(frame_len),
            lock_budget,
            frame: vec![0.0; frame_len],
        }
    }

    /// Handle one driver block. Never allocates, never blocks past the lock
    /// budget, always leaves `block.output` fully written.
    pub fn process(&mut self, block: DuplexBlock<'_>) {
        let diag = &*self.diagnostics;
        CallbackDiagnostics::bump(&diag.blocks);
        if !block.status.is_clean() {
            CallbackDiagnostics::bump(&diag.driver_status_flags);
        }

        if self.contract.check_block(&block).is_err() {
            CallbackDiagnostics::bump(&diag.silenced_mismatch);
            FrameContract::silence(block.output);
            return;
        }

        let in_ch = block.input_channels;
        for (dst, frame) in self.frame.iter_mut().zip(block.input.chunks_exact(in_ch)) {
            *dst = frame[0];
        }

        let started = Instant::now();
        let Some(mut state) = self.control.try_lock_for(self.lock_budget) else {
            CallbackDiagnostics::bump(&diag.lock_timeouts);
            FrameContract::silence(block.output);
            return;
        };

        let running = state.status.is_running();
        let failure = match state.transform.as_mut() {
            Some(handle) if running => match handle.process_frame(&self.frame) {
                Ok((snr, processed)) => {
                    write_fanned_out(processed, &mut *block.output, block.output_channels);
                    diag.last_snr_bits.store(snr.to_bits(), Ordering::Relaxed);
                    None
                }
                Err(_) => Some(&diag.transform_errors),
            },
            _ => Some(&diag.silenced_inactive),
        };
        drop(state);

        if let Some(counter) = failure {
            CallbackDiagnostics::bump(counter);
            FrameContract::silence(block.output);
            return;
        }

        self.metrics
            .record(started.elapsed().as_secs_f64() * 1000.0);
        CallbackDiagnostics::bump(&diag.frames_processed);
    }
}

/// Copy a mono frame to every interleaved output channel.
#[inline]
fn write_fanned_out(frame: &[f32], output: &mut [f32], channels: usize) {
    if channels == 1 {
        output.copy_from_slice(frame);
    } else {
        for (slot, &sample) in output.chunks_exact_mut(channels).zip(frame) {
            slot.fill(sample);
        }
    }
}
