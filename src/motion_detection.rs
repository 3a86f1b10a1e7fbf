// src/motion_detection.rs
//
// Cheap local motion gate. Each frame is reduced to a fixed 50x50 RGB
// sample and compared pixel-for-pixel against the previous sample; the
// share of changed pixels decides whether the expensive remote analysis
// is worth invoking at all.

use crate::types::Frame;
use tracing::debug;

/// Side length of the downsampled comparison grid.
pub const SAMPLE_SIZE: usize = 50;

const CHANNELS: usize = 3;

/// A pixel counts as changed when |dR| + |dG| + |dB| exceeds this.
const PIXEL_DIFF_THRESHOLD: u32 = 30;

/// Outcome of comparing one frame against the previous sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionReading {
    pub has_motion: bool,
    /// Percentage of sample pixels that changed, 0-100.
    pub motion_level: f32,
}

pub struct MotionDetector {
    /// Motion sensitivity, 0-100. The gate opens when the changed-pixel
    /// percentage exceeds sensitivity / 10.
    sensitivity: u8,
    /// Previous 50x50 RGB sample. None until the first usable frame, and
    /// again after a capture restart.
    previous: Option<Vec<u8>>,
}

impl MotionDetector {
    pub fn new(sensitivity: u8) -> Self {
        Self {
            sensitivity: sensitivity.min(100),
            previous: None,
        }
    }

    /// Compare `frame` against the stored sample.
    ///
    /// Returns `None` when the frame is not usable yet (zero dimensions or a
    /// buffer that does not match them); the caller must skip the tick
    /// entirely rather than treat it as a no-motion reading.
    ///
    /// The first usable frame always reads as motion so the initial tick
    /// attempts analysis. The stored sample is replaced wholesale on every
    /// decision, whatever the outcome.
    pub fn detect(&mut self, frame: &Frame) -> Option<MotionReading> {
        if !frame.is_ready() {
            debug!(
                "Skipping motion check: frame not ready ({}x{}, {} bytes)",
                frame.width,
                frame.height,
                frame.data.len()
            );
            return None;
        }

        let sample = downsample(frame);

        let reading = match self.previous.as_deref() {
            None => MotionReading {
                has_motion: true,
                motion_level: 100.0,
            },
            Some(previous) => {
                let changed = changed_pixels(previous, &sample);
                let total = (SAMPLE_SIZE * SAMPLE_SIZE) as f32;
                let motion_level = changed as f32 / total * 100.0;
                MotionReading {
                    has_motion: motion_level > self.sensitivity as f32 / 10.0,
                    motion_level,
                }
            }
        };

        self.previous = Some(sample);
        Some(reading)
    }

    /// Drop the stored sample, e.g. after the capture device was restarted.
    /// The next usable frame cold-starts as motion again.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Nearest-neighbor reduction of a frame to the SAMPLE_SIZE grid.
fn downsample(frame: &Frame) -> Vec<u8> {
    let mut sample = Vec::with_capacity(SAMPLE_SIZE * SAMPLE_SIZE * CHANNELS);

    for gy in 0..SAMPLE_SIZE {
        let sy = gy * frame.height / SAMPLE_SIZE;
        for gx in 0..SAMPLE_SIZE {
            let sx = gx * frame.width / SAMPLE_SIZE;
            let idx = (sy * frame.width + sx) * CHANNELS;
            sample.extend_from_slice(&frame.data[idx..idx + CHANNELS]);
        }
    }

    sample
}

fn changed_pixels(previous: &[u8], current: &[u8]) -> usize {
    previous
        .chunks_exact(CHANNELS)
        .zip(current.chunks_exact(CHANNELS))
        .filter(|(prev, curr)| {
            let diff: u32 = prev
                .iter()
                .zip(curr.iter())
                .map(|(a, b)| a.abs_diff(*b) as u32)
                .sum();
            diff > PIXEL_DIFF_THRESHOLD
        })
        .count()
}
