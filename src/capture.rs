// src/capture.rs
//
// Frame acquisition boundary. The watcher acquires the device on
// activation and releases it on deactivation or before any parameter
// change; implementations must tolerate exactly one start per stop.

use crate::types::{epoch_ms, Frame, Resolution};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

/// A source of frames. `capture` may return None while the device warms up;
/// the scan loop skips those ticks without advancing its schedule.
pub trait FrameSource: Send {
    fn start(&mut self, resolution: Resolution) -> Result<(), CaptureError>;
    fn stop(&mut self);
    fn capture(&mut self) -> Option<Frame>;
}

/// Deterministic stand-in for a camera: a flat scene that shifts brightness
/// every few frames, enough to exercise the motion gate end to end without
/// hardware. First few captures return None to mimic device warmup.
pub struct SyntheticSource {
    resolution: Option<Resolution>,
    frame_counter: u64,
    /// Captures to swallow after start() before frames flow.
    warmup_frames: u64,
    /// Shift the scene every N frames; in between it is perfectly static.
    shift_every: u64,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            resolution: None,
            frame_counter: 0,
            warmup_frames: 2,
            shift_every: 4,
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        self.resolution = Some(resolution);
        self.frame_counter = 0;
        Ok(())
    }

    fn stop(&mut self) {
        self.resolution = None;
    }

    fn capture(&mut self) -> Option<Frame> {
        let resolution = self.resolution?;
        self.frame_counter += 1;

        if self.frame_counter <= self.warmup_frames {
            return None;
        }

        // Scene brightness steps every `shift_every` frames.
        let phase = self.frame_counter / self.shift_every;
        let value = 60u8.wrapping_add((phase % 4) as u8 * 50);

        let width = resolution.width();
        let height = resolution.height();
        Some(Frame {
            data: vec![value; width * height * 3],
            width,
            height,
            timestamp_ms: epoch_ms(),
        })
    }
}
