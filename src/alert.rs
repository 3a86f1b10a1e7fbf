// src/alert.rs
//
// Alert boundary. Invoked exactly once per reliable person detection;
// everything beyond that single call (sound synthesis, push delivery)
// belongs to the implementation.

use crate::types::DetectionEvent;
use tracing::info;

pub trait AlertSink: Send {
    fn person_detected(&mut self, event: &DetectionEvent);
}

/// Logs the detection and, when sound is enabled, rings the terminal bell.
pub struct ConsoleAlert {
    sound_enabled: bool,
}

impl ConsoleAlert {
    pub fn new(sound_enabled: bool) -> Self {
        Self { sound_enabled }
    }
}

impl AlertSink for ConsoleAlert {
    fn person_detected(&mut self, event: &DetectionEvent) {
        info!(
            "ALERT: {} (confidence {:.0}%){}",
            event.message,
            event.confidence.unwrap_or(0.0),
            event
                .description
                .as_deref()
                .map(|d| format!(" - {}", d))
                .unwrap_or_default()
        );
        if self.sound_enabled {
            // BEL is as far as this binary goes toward audio.
            print!("\x07");
        }
    }
}
