//! Lock-free SPSC ring buffer bridging the capture callback to the playback
//! callback.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice`/`pop_slice` are wait-free
//! and allocation-free, so both ends are safe on audio threads.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the capture callback.
pub type BridgeProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the playback callback.
pub type BridgeConsumer = ringbuf::HeapCons<f32>;

/// Capacity in blocks. Enough to ride out scheduling jitter between the two
/// driver threads.
pub const BRIDGE_BLOCKS: usize = 8;

/// Occupancy (in blocks) beyond which the consumer drops the oldest audio to
/// keep end-to-end latency bounded.
pub const MAX_QUEUED_BLOCKS: usize = 3;

/// Create a bridge sized for `block_samples` interleaved samples per block,
/// pre-filled with one block of silence so playback starts without an
/// underrun.
pub fn create_bridge(block_samples: usize) -> (BridgeProducer, BridgeConsumer) {
    let block_samples = block_samples.max(1);
    let (mut producer, consumer) = HeapRb::<f32>::new(block_samples * BRIDGE_BLOCKS).split();
    let silence = vec![0.0f32; block_samples];
    producer.push_slice(&silence);
    (producer, consumer)
}

/// Pop exactly `dest.len()` samples, zero-filling whatever the ring could not
/// supply. Returns `true` on underflow.
#[inline]
pub fn pop_block(consumer: &mut BridgeConsumer, dest: &mut [f32]) -> bool {
    let got = consumer.pop_slice(dest);
    if got < dest.len() {
        dest[got..].fill(0.0);
        return true;
    }
    false
}

/// Drop queued samples beyond `MAX_QUEUED_BLOCKS` blocks. Returns `true` if
/// anything was dropped.
#[inline]
pub fn trim_backlog(consumer: &mut BridgeConsumer, block_samples: usize) -> bool {
    let limit = block_samples * MAX_QUEUED_BLOCKS;
    let excess = consumer.occupied_len().saturating_sub(limit);
    if excess > 0 {
        consumer.skip(excess);
        return true;
    }
    false
}
