// src/scan_scheduler.rs
//
// Scan loop state machine. Owns the motion gate, the backoff controller
// and the bounded history; decides per tick whether the remote analysis
// call is worth making, and classifies its outcome when it lands.
//
// Timer ticks and manual triggers enter through the same guarded
// `run_cycle` so both paths share one busy check and one set of rules.
// At most one analysis call is in flight per scheduler; a tick arriving
// while busy is dropped, never queued.

use crate::analysis_client::{AnalysisFailure, Detection};
use crate::backoff::BackoffController;
use crate::event_bus::EventBus;
use crate::history::HistoryLog;
use crate::motion_detection::MotionDetector;
use crate::types::{DetectionEvent, DetectionStatus, Frame, ScanConfig};
use serde::Serialize;
use tracing::{debug, info};

/// A detection only counts as a person when confidence is strictly above this.
pub const RELIABLE_CONFIDENCE: f32 = 45.0;

const MAX_PENDING_EVENTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    Timer,
    Manual,
}

impl CycleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Manual => "manual",
        }
    }
}

/// Scheduler timing state, mutated only by the scheduler itself.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleState {
    pub active: bool,
    pub current_interval_ms: u64,
    pub next_scan_at_ms: u64,
    /// True for the whole lifetime of an in-flight analysis call.
    pub busy: bool,
}

/// Permission to run one analysis call. The generation stamp ties the
/// eventual completion back to the activation that issued it; completions
/// from a previous life are discarded.
#[derive(Debug)]
pub struct AnalysisTicket {
    pub generation: u64,
    pub frame: Frame,
    pub trigger: CycleTrigger,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// System is idle; nothing happens.
    Inactive,
    /// An analysis call is already in flight; the tick is dropped.
    Busy,
    /// Capture has not produced a usable frame; the tick is skipped
    /// without advancing the schedule.
    FrameNotReady,
    /// No motion: the remote call was skipped and a StaticScene event emitted.
    Static(DetectionEvent),
    /// Motion (or a manual trigger): the caller must run the analysis call
    /// and feed the result back through `complete_analysis`.
    Analyze(AnalysisTicket),
}

pub struct ScanScheduler {
    schedule: ScheduleState,
    generation: u64,
    backoff: BackoffController,
    detector: MotionDetector,
    history: HistoryLog,
    bus: EventBus,
}

impl ScanScheduler {
    pub fn new(scan: &ScanConfig) -> Self {
        Self {
            schedule: ScheduleState {
                active: false,
                current_interval_ms: scan.base_interval_ms,
                next_scan_at_ms: 0,
                busy: false,
            },
            generation: 0,
            backoff: BackoffController::new(scan.base_interval_ms),
            detector: MotionDetector::new(scan.sensitivity),
            history: HistoryLog::new(),
            bus: EventBus::new(MAX_PENDING_EVENTS),
        }
    }

    pub fn schedule(&self) -> &ScheduleState {
        &self.schedule
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Events emitted since the last drain, for observer fan-out.
    pub fn drain_events(&mut self) -> Vec<DetectionEvent> {
        self.bus.drain()
    }

    /// Idle -> Armed. Arms the timer at the base cadence and wipes all
    /// state from the previous activation.
    pub fn activate(&mut self, now_ms: u64) {
        self.generation += 1;
        self.backoff.reset();
        self.detector.reset();
        self.history.clear();
        self.bus.clear();
        self.schedule = ScheduleState {
            active: true,
            current_interval_ms: self.backoff.base_ms(),
            next_scan_at_ms: now_ms + self.backoff.base_ms(),
            busy: false,
        };
        info!(
            "Scan loop armed, first scan in {}s",
            self.backoff.base_ms() / 1000
        );
    }

    /// Armed/Analyzing -> Idle. An analysis call still in flight may run to
    /// completion, but the generation bump guarantees its result is discarded.
    pub fn deactivate(&mut self) {
        if !self.schedule.active {
            return;
        }
        self.generation += 1;
        self.backoff.reset();
        self.detector.reset();
        self.history.clear();
        self.bus.clear();
        self.schedule = ScheduleState {
            active: false,
            current_interval_ms: self.backoff.base_ms(),
            next_scan_at_ms: 0,
            busy: false,
        };
        info!("Scan loop deactivated");
    }

    /// The capture device was released and reacquired (e.g. resolution
    /// change); the stored motion sample no longer matches the stream.
    pub fn notify_capture_restarted(&mut self) {
        self.detector.reset();
    }

    /// Single entrypoint for both timer ticks and manual triggers.
    ///
    /// Timer ticks run the motion gate; manual triggers bypass it. Both are
    /// rejected while an analysis call is in flight.
    pub fn run_cycle(
        &mut self,
        trigger: CycleTrigger,
        frame: Option<Frame>,
        now_ms: u64,
    ) -> CycleOutcome {
        if !self.schedule.active {
            return CycleOutcome::Inactive;
        }

        if self.schedule.busy {
            debug!("{} tick dropped: analysis already in flight", trigger.as_str());
            return CycleOutcome::Busy;
        }

        let Some(frame) = frame else {
            debug!("{} tick skipped: no frame available", trigger.as_str());
            return CycleOutcome::FrameNotReady;
        };

        match trigger {
            CycleTrigger::Timer => {
                let Some(reading) = self.detector.detect(&frame) else {
                    return CycleOutcome::FrameNotReady;
                };

                if !reading.has_motion {
                    let event = DetectionEvent::new(
                        DetectionStatus::StaticScene,
                        format!(
                            "Static scene ({:.1}% motion), skipping analysis",
                            reading.motion_level
                        ),
                        now_ms,
                    );
                    self.schedule.next_scan_at_ms = now_ms + self.schedule.current_interval_ms;
                    self.emit(event.clone());
                    return CycleOutcome::Static(event);
                }

                debug!(
                    "Motion at {:.1}%, requesting analysis",
                    reading.motion_level
                );
            }
            CycleTrigger::Manual => {
                if !frame.is_ready() {
                    return CycleOutcome::FrameNotReady;
                }
                info!("Manual scan requested, bypassing motion gate");
            }
        }

        self.schedule.busy = true;
        CycleOutcome::Analyze(AnalysisTicket {
            generation: self.generation,
            frame,
            trigger,
        })
    }

    /// Apply the outcome of an analysis call issued by `run_cycle`.
    ///
    /// Returns the emitted event, or None when the result is stale: the
    /// scheduler was deactivated (or reactivated) after the ticket was
    /// issued, and the result must leave all state untouched.
    pub fn complete_analysis(
        &mut self,
        generation: u64,
        result: Result<Detection, AnalysisFailure>,
        now_ms: u64,
    ) -> Option<DetectionEvent> {
        if !self.schedule.active || generation != self.generation {
            info!("Discarding analysis result from a previous activation");
            return None;
        }

        self.schedule.busy = false;

        let event = match result {
            Ok(detection) => {
                self.schedule.current_interval_ms = self.backoff.on_success();
                let reliable =
                    detection.person_detected && detection.confidence > RELIABLE_CONFIDENCE;
                let (status, message) = if reliable {
                    (DetectionStatus::PersonDetected, "Person detected")
                } else {
                    (DetectionStatus::NoPerson, "No person present")
                };
                DetectionEvent {
                    status,
                    message: message.to_string(),
                    description: (!detection.description.is_empty())
                        .then(|| detection.description.clone()),
                    confidence: Some(detection.confidence),
                    timestamp_ms: now_ms,
                }
            }
            Err(AnalysisFailure::QuotaExceeded) => {
                let interval = self.backoff.on_quota_exceeded();
                self.schedule.current_interval_ms = interval;
                DetectionEvent::new(
                    DetectionStatus::Cooldown,
                    format!("Analysis rate limited, next scan in {}s", interval / 1000),
                    now_ms,
                )
            }
            Err(AnalysisFailure::Other(message)) => DetectionEvent::new(
                DetectionStatus::Error,
                format!("Analysis error: {}", message),
                now_ms,
            ),
        };

        self.schedule.next_scan_at_ms = now_ms + self.schedule.current_interval_ms;
        self.emit(event.clone());
        Some(event)
    }

    fn emit(&mut self, event: DetectionEvent) {
        debug!("Event: {} - {}", event.status.as_str(), event.message);
        self.history.push(event.clone());
        self.bus.publish(event);
    }
}
