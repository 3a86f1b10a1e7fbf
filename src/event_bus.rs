// src/event_bus.rs
//
// Decoupled event hand-off. The scheduler publishes detection events here
// instead of reaching into the UI layer; the driver drains and fans out.

use crate::types::DetectionEvent;
use std::collections::VecDeque;
use tracing::warn;

pub struct EventBus {
    events: VecDeque<DetectionEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: DetectionEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<DetectionEvent> {
        self.events.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}
