//! Rolling window of per-frame processing latency.
//!
//! Written only by the audio callback, read by the control thread. Slots are
//! `AtomicU64` holding `f64` bits, so `record` is lock-free and
//! allocation-free. A reader racing a writer may see a window that mixes the
//! old and new newest sample; acceptable for a display metric.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Frames kept in the window.
pub const DEFAULT_WINDOW: usize = 30;

#[derive(Debug)]
pub struct MetricsTracker {
    slots: Box<[AtomicU64]>,
    /// Index the next sample is written to.
    head: AtomicUsize,
    len: AtomicUsize,
}

impl MetricsTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            head: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one duration; evicts the oldest once the window is full.
    /// Non-finite or negative values are recorded as 0.
    #[inline]
    pub fn record(&self, duration_ms: f64) {
        let v = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };
        let cap = self.slots.len();
        let head = self.head.load(Ordering::Relaxed);
        self.slots[head].store(v.to_bits(), Ordering::Relaxed);
        self.head.store((head + 1) % cap, Ordering::Relaxed);
        let len = self.len.load(Ordering::Relaxed);
        if len < cap {
            self.len.store(len + 1, Ordering::Release);
        } else {
            // Publish the slot write even when len is unchanged.
            self.len.store(len, Ordering::Release);
        }
    }

    /// Mean of the window, `None` when empty.
    pub fn average(&self) -> Option<f64> {
        let n = self.len();
        if n == 0 {
            return None;
        }
        // Until the window wraps, samples occupy slots[0..n]; after, all slots.
        let sum: f64 = self.slots[..n]
            .iter()
            .map(|s| f64::from_bits(s.load(Ordering::Relaxed)))
            .sum();
        Some(sum / n as f64)
    }

    /// Window contents, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        let n = self.len();
        let cap = self.slots.len();
        let head = self.head.load(Ordering::Relaxed);
        let start = if n < cap { 0 } else { head };
        (0..n)
            .map(|i| f64::from_bits(self.slots[(start + i) % cap].load(Ordering::Relaxed)))
            .collect()
    }

    /// Clear the window. Called when the engine stops.
    pub fn reset(&self) {
        self.len.store(0, Ordering::Release);
        self.head.store(0, Ordering::Release);
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// What the control surface reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetrics {
    pub average_latency_ms: Option<f64>,
    /// `average_latency_ms / frame duration`. Must stay below 1.0.
    pub realtime_factor: Option<f64>,
}

impl EngineMetrics {
    pub fn compute(average_latency_ms: Option<f64>, frame_len: usize, sample_rate: u32) -> Self {
        let frame_ms = frame_duration_ms(frame_len, sample_rate);
        let realtime_factor = match (average_latency_ms, frame_ms) {
            (Some(avg), Some(frame_ms)) => Some(avg / frame_ms),
            _ => None,
        };
        Self {
            average_latency_ms,
            realtime_factor,
        }
    }
}

/// Wall-clock duration of one frame, `None` when unknown.
pub fn frame_duration_ms(frame_len: usize, sample_rate: u32) -> Option<f64> {
    if frame_len == 0 || sample_rate == 0 {
        return None;
    }
    Some(frame_len as f64 * 1000.0 / sample_rate as f64)
}
