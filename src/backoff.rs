// src/backoff.rs
//
// Scan-cadence backoff. Quota failures double the interval up to a hard
// ceiling; the first successful analysis snaps it straight back to base.

/// Hard ceiling on the scan interval: five minutes.
pub const MAX_INTERVAL_MS: u64 = 300_000;

#[derive(Debug, Clone)]
pub struct BackoffController {
    base_ms: u64,
    current_ms: u64,
}

impl BackoffController {
    pub fn new(base_ms: u64) -> Self {
        Self {
            base_ms,
            current_ms: base_ms,
        }
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    pub fn base_ms(&self) -> u64 {
        self.base_ms
    }

    /// Quota failure: double, clamped to the ceiling. Returns the new interval.
    pub fn on_quota_exceeded(&mut self) -> u64 {
        self.current_ms = (self.current_ms.saturating_mul(2)).min(MAX_INTERVAL_MS);
        self.current_ms
    }

    /// Successful analysis: immediate reset, no gradual decay.
    pub fn on_success(&mut self) -> u64 {
        self.current_ms = self.base_ms;
        self.current_ms
    }

    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }
}
