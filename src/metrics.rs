// src/metrics.rs
//
// Runtime counters for the scan loop. Cheap to clone and share; the
// summary is logged at shutdown and available to observers on demand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct WatchMetrics {
    pub ticks_total: Arc<AtomicU64>,
    pub frames_not_ready: Arc<AtomicU64>,
    pub static_scenes: Arc<AtomicU64>,
    pub analyses_started: Arc<AtomicU64>,
    pub analyses_ok: Arc<AtomicU64>,
    pub analyses_failed: Arc<AtomicU64>,
    pub quota_backoffs: Arc<AtomicU64>,
    pub alerts_fired: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl WatchMetrics {
    pub fn new() -> Self {
        Self {
            ticks_total: Arc::new(AtomicU64::new(0)),
            frames_not_ready: Arc::new(AtomicU64::new(0)),
            static_scenes: Arc::new(AtomicU64::new(0)),
            analyses_started: Arc::new(AtomicU64::new(0)),
            analyses_ok: Arc::new(AtomicU64::new(0)),
            analyses_failed: Arc::new(AtomicU64::new(0)),
            quota_backoffs: Arc::new(AtomicU64::new(0)),
            alerts_fired: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            frames_not_ready: self.frames_not_ready.load(Ordering::Relaxed),
            static_scenes: self.static_scenes.load(Ordering::Relaxed),
            analyses_started: self.analyses_started.load(Ordering::Relaxed),
            analyses_ok: self.analyses_ok.load(Ordering::Relaxed),
            analyses_failed: self.analyses_failed.load(Ordering::Relaxed),
            quota_backoffs: self.quota_backoffs.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for WatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub frames_not_ready: u64,
    pub static_scenes: u64,
    pub analyses_started: u64,
    pub analyses_ok: u64,
    pub analyses_failed: u64,
    pub quota_backoffs: u64,
    pub alerts_fired: u64,
    pub elapsed_secs: f64,
}
