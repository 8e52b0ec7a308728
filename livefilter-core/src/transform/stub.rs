//! `PassthroughProcessor`: in-process transform that copies input to output.
//!
//! Lets the full duplex path run without the native library (monitoring a
//! microphone, checking device routing) and backs the end-to-end tests.
//! Reports an SNR estimate of 0 dB for every frame.

use tracing::debug;

use crate::error::{FrameError, Result};
use crate::transform::{FrameProcessor, TransformFactory, TransformRequest};

/// 10 ms at 48 kHz.
pub const DEFAULT_FRAME_LEN: usize = 480;

#[derive(Debug)]
pub struct PassthroughProcessor {
    frame_len: usize,
    attenuation_db: f32,
    post_filter_beta: f32,
    frames: u64,
}

impl PassthroughProcessor {
    pub fn new(frame_len: usize, attenuation_db: f32) -> Self {
        Self {
            frame_len,
            attenuation_db,
            post_filter_beta: 0.0,
            frames: 0,
        }
    }

    pub fn attenuation_limit(&self) -> f32 {
        self.attenuation_db
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }
}

impl Default for PassthroughProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_LEN, 24.0)
    }
}

impl FrameProcessor for PassthroughProcessor {
    fn frame_length(&self) -> usize {
        self.frame_len
    }

    fn set_attenuation_limit(&mut self, db: f32) {
        self.attenuation_db = db;
    }

    fn set_post_filter_beta(&mut self, beta: f32) {
        self.post_filter_beta = beta;
    }

    fn process_frame(
        &mut self,
        input: &[f32],
        output: &mut [f32],
    ) -> std::result::Result<f32, FrameError> {
        output.copy_from_slice(input);
        self.frames += 1;
        Ok(0.0)
    }

    fn destroy(&mut self) {
        debug!(frames = self.frames, "PassthroughProcessor::destroy");
    }
}

/// Builds `PassthroughProcessor`s; the model path is ignored.
#[derive(Debug, Clone, Copy)]
pub struct PassthroughFactory {
    pub frame_len: usize,
}

impl Default for PassthroughFactory {
    fn default() -> Self {
        Self {
            frame_len: DEFAULT_FRAME_LEN,
        }
    }
}

impl TransformFactory for PassthroughFactory {
    fn create(&self, request: &TransformRequest) -> Result<Box<dyn FrameProcessor>> {
        Ok(Box::new(PassthroughProcessor::new(
            self.frame_len,
            request.attenuation_db,
        )))
    }
}
