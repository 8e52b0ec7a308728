//! Duplex audio over cpal.
//!
//! cpal has no single duplex stream, so one is assembled from an input and an
//! output stream at the same rate and block size. The capture callback pushes
//! interleaved samples into a lock-free ring; the playback callback is the
//! frame clock: it pops one block of input and runs the engine's callback with
//! it and the driver's output buffer.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on several platforms (COM on Windows, CoreAudio
//! on macOS). Both streams are therefore created, run and dropped on one
//! dedicated thread. A sync channel reports open success/failure back to the
//! caller; `stop()` signals that thread and joins it, so when it returns the
//! streams are gone and no callback can run.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, Host, SampleFormat, SampleRate, Stream, StreamConfig,
    SupportedBufferSize, SupportedStreamConfigRange,
};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info, warn};

use super::{
    AudioBackend, DeviceSelection, DuplexBlock, DuplexCallback, DuplexStream, NegotiatedFormat,
    StreamRequest, StreamStatus,
};
use crate::buffering::{create_bridge, pop_block, trim_backlog, Consumer, Producer};
use crate::error::{EngineError, Result};

/// `AudioBackend` on the platform's default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn validate(&self, request: &StreamRequest) -> Result<NegotiatedFormat> {
        let host = cpal::default_host();
        let (input, output) = resolve_devices(&host, &request.devices)?;
        negotiate(&input, &output, request)
    }

    fn open_duplex(
        &self,
        request: &StreamRequest,
        format: NegotiatedFormat,
        callback: DuplexCallback,
    ) -> Result<Box<dyn DuplexStream>> {
        let (open_tx, open_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let request = request.clone();

        let thread = thread::Builder::new()
            .name("livefilter-audio".into())
            .spawn(move || {
                // ── Build + start (on this thread; cpal::Stream is !Send) ──
                let streams = match DuplexStreams::open(&request, format, callback) {
                    Ok(s) => {
                        let _ = open_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop() (or the handle is dropped).
                let _ = stop_rx.recv();
                streams.close();
            })
            .map_err(|e| EngineError::Audio(format!("failed to spawn audio thread: {e}")))?;

        match open_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalDuplexStream {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EngineError::Audio("audio thread died during open".into()))
            }
        }
    }
}

/// Handle to the streams living on the audio thread.
struct CpalDuplexStream {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DuplexStream for CpalDuplexStream {
    fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| EngineError::Audio("audio thread panicked during shutdown".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalDuplexStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("audio stream shutdown on drop failed: {e}");
        }
    }
}

struct DuplexStreams {
    input: Stream,
    output: Stream,
}

impl DuplexStreams {
    fn open(
        request: &StreamRequest,
        format: NegotiatedFormat,
        mut callback: DuplexCallback,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let (input_device, output_device) = resolve_devices(&host, &request.devices)?;

        let block_frames = request.block_frames;
        let in_ch = format.input_channels as usize;
        let out_ch = format.output_channels as usize;
        let block_samples = block_frames * in_ch;

        let input_config = StreamConfig {
            channels: format.input_channels,
            sample_rate: SampleRate(request.sample_rate),
            buffer_size: BufferSize::Fixed(block_frames as u32),
        };
        let output_config = StreamConfig {
            channels: format.output_channels,
            sample_rate: SampleRate(request.sample_rate),
            buffer_size: BufferSize::Fixed(block_frames as u32),
        };

        info!(
            input = input_device.name().unwrap_or_default().as_str(),
            output = output_device.name().unwrap_or_default().as_str(),
            sample_rate = request.sample_rate,
            block_frames,
            input_channels = in_ch,
            output_channels = out_ch,
            "opening duplex stream"
        );

        let (mut producer, mut consumer) = create_bridge(block_samples);
        let overflow = Arc::new(AtomicBool::new(false));
        let overflow_in = Arc::clone(&overflow);

        let input = input_device
            .build_input_stream(
                &input_config,
                move |data: &[f32], _info| {
                    let written = producer.push_slice(data);
                    if written < data.len() {
                        overflow_in.store(true, Ordering::Relaxed);
                    }
                },
                |err| error!("audio input stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::Audio(format!("failed to build input stream: {e}")))?;

        // Sized once; the callback below never grows it.
        let mut scratch = vec![0.0f32; block_samples];

        let output = output_device
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], _info| {
                    let frames = data.len() / out_ch;
                    let needed = frames * in_ch;
                    let mut status = StreamStatus {
                        input_overflow: overflow.swap(false, Ordering::Relaxed),
                        input_underflow: false,
                    };
                    if trim_backlog(&mut consumer, block_samples) {
                        status.input_overflow = true;
                    }

                    let input: &[f32] = if needed <= scratch.len() {
                        status.input_underflow = pop_block(&mut consumer, &mut scratch[..needed]);
                        &scratch[..needed]
                    } else {
                        // Oversized block: keep the ring aligned, let the
                        // frame contract silence it.
                        consumer.skip(needed);
                        &scratch[..0]
                    };

                    callback(DuplexBlock {
                        input,
                        input_channels: in_ch,
                        output: data,
                        output_channels: out_ch,
                        frames,
                        status,
                    });
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::Audio(format!("failed to build output stream: {e}")))?;

        input
            .play()
            .map_err(|e| EngineError::Audio(format!("failed to start input stream: {e}")))?;
        output
            .play()
            .map_err(|e| EngineError::Audio(format!("failed to start output stream: {e}")))?;

        Ok(Self { input, output })
    }

    fn close(self) {
        if let Err(e) = self.output.pause() {
            warn!("failed to pause output stream: {e}");
        }
        if let Err(e) = self.input.pause() {
            warn!("failed to pause input stream: {e}");
        }
        // Dropping the streams releases the devices on this thread.
        drop(self.output);
        drop(self.input);
        debug!("duplex stream closed");
    }
}

fn resolve_devices(host: &Host, selection: &DeviceSelection) -> Result<(Device, Device)> {
    let input = match selection.input.as_deref() {
        Some(name) => host
            .input_devices()
            .map_err(|e| EngineError::DeviceConfig(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| EngineError::DeviceConfig(format!("input device '{name}' not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| EngineError::DeviceConfig("no default input device".into()))?,
    };

    let output = match selection.output.as_deref() {
        Some(name) => host
            .output_devices()
            .map_err(|e| EngineError::DeviceConfig(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| EngineError::DeviceConfig(format!("output device '{name}' not found")))?,
        None => host
            .default_output_device()
            .ok_or_else(|| EngineError::DeviceConfig("no default output device".into()))?,
    };

    Ok((input, output))
}

fn negotiate(input: &Device, output: &Device, request: &StreamRequest) -> Result<NegotiatedFormat> {
    let input_name = input.name().unwrap_or_default();
    let output_name = output.name().unwrap_or_default();

    let input_ranges = input
        .supported_input_configs()
        .map_err(|e| EngineError::DeviceConfig(format!("{input_name}: {e}")))?;
    let input_channels = pick_channels(input_ranges, request).ok_or_else(|| {
        EngineError::DeviceConfig(format!(
            "input device '{input_name}' cannot capture f32 at {} Hz with {}-frame blocks",
            request.sample_rate, request.block_frames
        ))
    })?;

    let output_ranges = output
        .supported_output_configs()
        .map_err(|e| EngineError::DeviceConfig(format!("{output_name}: {e}")))?;
    let output_channels = pick_channels(output_ranges, request).ok_or_else(|| {
        EngineError::DeviceConfig(format!(
            "output device '{output_name}' cannot play f32 at {} Hz with {}-frame blocks",
            request.sample_rate, request.block_frames
        ))
    })?;

    if input_channels != 1 || output_channels != 1 {
        warn!(
            input_channels,
            output_channels, "device has no mono mode; using channel 0 in / fan-out to all out"
        );
    }

    Ok(NegotiatedFormat {
        input_channels,
        output_channels,
    })
}

/// Fewest channels among f32 configs that cover the rate and block size.
fn pick_channels(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    request: &StreamRequest,
) -> Option<u16> {
    ranges
        .filter(|r| r.sample_format() == SampleFormat::F32)
        .filter(|r| {
            r.min_sample_rate().0 <= request.sample_rate
                && request.sample_rate <= r.max_sample_rate().0
        })
        .filter(|r| match r.buffer_size() {
            SupportedBufferSize::Range { min, max } => {
                let n = request.block_frames as u32;
                *min <= n && n <= *max
            }
            SupportedBufferSize::Unknown => true,
        })
        .map(|r| r.channels())
        .filter(|&c| c > 0)
        .min()
}
