//! Frame-size contract between the audio driver and the transform.
//!
//! The transform only accepts buffers of exactly `frame_len` f32 samples. The
//! sample format is fixed by the `&[f32]` types; what remains to check at run
//! time is the length of every block. On any violation the transform is not
//! called and the whole output block is zero-filled.

use crate::audio::DuplexBlock;
use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContract {
    frame_len: usize,
}

impl FrameContract {
    pub fn new(frame_len: usize) -> Self {
        Self { frame_len }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// A mono transform input must be exactly one frame.
    pub fn check_input(&self, input: &[f32]) -> Result<(), FrameError> {
        if input.len() != self.frame_len {
            return Err(FrameError::Mismatch {
                expected: self.frame_len,
                actual: input.len(),
            });
        }
        Ok(())
    }

    /// Validate a driver block before any of it is read.
    ///
    /// The driver-reported frame count must equal the negotiated frame length
    /// and both interleaved buffers must hold exactly that many frames.
    pub fn check_block(&self, block: &DuplexBlock<'_>) -> Result<(), FrameError> {
        if block.frames != self.frame_len {
            return Err(FrameError::Mismatch {
                expected: self.frame_len,
                actual: block.frames,
            });
        }

        let input_needed = self.frame_len * block.input_channels;
        if block.input_channels == 0 || block.input.len() != input_needed {
            return Err(FrameError::Mismatch {
                expected: input_needed.max(self.frame_len),
                actual: block.input.len(),
            });
        }

        let output_needed = self.frame_len * block.output_channels;
        if block.output_channels == 0 || block.output.len() != output_needed {
            return Err(FrameError::Mismatch {
                expected: output_needed.max(self.frame_len),
                actual: block.output.len(),
            });
        }

        Ok(())
    }

    /// Zero the entire output block. The driver always gets a full block back.
    #[inline]
    pub fn silence(output: &mut [f32]) {
        output.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::StreamStatus;

    fn block<'a>(
        input: &'a [f32],
        input_channels: usize,
        output: &'a mut [f32],
        output_channels: usize,
        frames: usize,
    ) -> DuplexBlock<'a> {
        DuplexBlock {
            input,
            input_channels,
            output,
            output_channels,
            frames,
            status: StreamStatus::default(),
        }
    }

    #[test]
    fn accepts_exact_mono_block() {
        let contract = FrameContract::new(480);
        let input = vec![0.0; 480];
        let mut output = vec![0.0; 480];
        assert!(contract
            .check_block(&block(&input, 1, &mut output, 1, 480))
            .is_ok());
    }

    #[test]
    fn accepts_interleaved_stereo_block() {
        let contract = FrameContract::new(4);
        let input = vec![0.0; 8];
        let mut output = vec![0.0; 8];
        assert!(contract
            .check_block(&block(&input, 2, &mut output, 2, 4))
            .is_ok());
    }

    #[test]
    fn rejects_driver_frame_count_mismatch() {
        let contract = FrameContract::new(480);
        let input = vec![0.0; 512];
        let mut output = vec![0.0; 512];
        assert_eq!(
            contract.check_block(&block(&input, 1, &mut output, 1, 512)),
            Err(FrameError::Mismatch {
                expected: 480,
                actual: 512
            })
        );
    }

    #[test]
    fn rejects_short_buffers_even_when_frame_count_matches() {
        let contract = FrameContract::new(480);
        let short = vec![0.0; 240];
        let full = vec![0.0; 480];
        let mut output = vec![0.0; 480];
        let mut short_out = vec![0.0; 240];

        assert!(contract
            .check_block(&block(&short, 1, &mut output, 1, 480))
            .is_err());
        assert!(contract
            .check_block(&block(&full, 1, &mut short_out, 1, 480))
            .is_err());
        assert!(contract
            .check_block(&block(&full, 0, &mut output, 1, 480))
            .is_err());
    }

    #[test]
    fn rejects_oversized_buffers_when_frame_count_matches() {
        let contract = FrameContract::new(480);
        let exact = vec![0.0; 480];
        let long = vec![0.0; 496];
        let mut output = vec![0.0; 480];
        let mut long_out = vec![0.0; 496];

        assert_eq!(
            contract.check_block(&block(&long, 1, &mut output, 1, 480)),
            Err(FrameError::Mismatch {
                expected: 480,
                actual: 496
            })
        );
        assert!(contract
            .check_block(&block(&exact, 1, &mut long_out, 1, 480))
            .is_err());

        // Stereo input sized for three channels.
        let wide = vec![0.0; 480 * 3];
        assert!(contract
            .check_block(&block(&wide, 2, &mut output, 1, 480))
            .is_err());
    }

    #[test]
    fn silence_zeroes_everything() {
        let mut output = vec![0.7; 16];
        FrameContract::silence(&mut output);
        assert!(output.iter().all(|s| *s == 0.0));
        assert_eq!(output.len(), 16);
    }
}
