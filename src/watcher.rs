// src/watcher.rs
//
// Async driver around the scan scheduler. One select loop owns the timer,
// the command channel and the single in-flight analysis task; the scheduler
// stays a plain state machine underneath, so everything here is plumbing:
// capture hooks, task spawning, alert dispatch and event fan-out.

use crate::alert::AlertSink;
use crate::analysis_client::{AnalysisClient, AnalysisFailure, Detection};
use crate::capture::FrameSource;
use crate::metrics::{MetricsSummary, WatchMetrics};
use crate::scan_scheduler::{CycleOutcome, CycleTrigger, ScanScheduler};
use crate::types::{epoch_ms, Config, DetectionEvent, DetectionStatus, Resolution};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

/// Retry floor while capture warms up: the schedule is not advanced, but the
/// loop must not spin on an overdue deadline either.
const CAPTURE_RETRY_MS: u64 = 250;

const COMMAND_QUEUE: usize = 16;
const EVENT_FANOUT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchCommand {
    Activate,
    Deactivate,
    ManualScan,
    SetResolution(Resolution),
    Shutdown,
}

/// Cheap cloneable handle for driving a running watcher.
#[derive(Clone)]
pub struct WatchHandle {
    commands: mpsc::Sender<WatchCommand>,
    events: broadcast::Sender<DetectionEvent>,
    metrics: WatchMetrics,
}

impl WatchHandle {
    pub async fn activate(&self) -> Result<()> {
        self.send(WatchCommand::Activate).await
    }

    pub async fn deactivate(&self) -> Result<()> {
        self.send(WatchCommand::Deactivate).await
    }

    /// Force one immediate analysis cycle, bypassing the motion gate.
    /// A no-op when an analysis call is already in flight.
    pub async fn manual_scan(&self) -> Result<()> {
        self.send(WatchCommand::ManualScan).await
    }

    pub async fn set_resolution(&self, resolution: Resolution) -> Result<()> {
        self.send(WatchCommand::SetResolution(resolution)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(WatchCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    async fn send(&self, command: WatchCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("watcher is no longer running"))
    }
}

enum LoopEvent {
    Command(Option<WatchCommand>),
    TimerTick,
    AnalysisDone(u64, std::result::Result<Result<Detection, AnalysisFailure>, JoinError>),
}

pub struct Watcher<S, C, A>
where
    S: FrameSource,
    C: AnalysisClient + 'static,
    A: AlertSink,
{
    scheduler: ScanScheduler,
    source: S,
    client: Arc<C>,
    alerts: A,
    metrics: WatchMetrics,
    commands: mpsc::Receiver<WatchCommand>,
    events: broadcast::Sender<DetectionEvent>,
    resolution: Resolution,
    capture_active: bool,
}

impl<S, C, A> Watcher<S, C, A>
where
    S: FrameSource,
    C: AnalysisClient + 'static,
    A: AlertSink,
{
    pub fn new(config: &Config, source: S, client: C, alerts: A) -> (Self, WatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_FANOUT);
        let metrics = WatchMetrics::new();

        let handle = WatchHandle {
            commands: command_tx,
            events: event_tx.clone(),
            metrics: metrics.clone(),
        };

        let watcher = Self {
            scheduler: ScanScheduler::new(&config.scan),
            source,
            client: Arc::new(client),
            alerts,
            metrics,
            commands: command_rx,
            events: event_tx,
            resolution: config.capture.resolution,
            capture_active: false,
        };

        (watcher, handle)
    }

    /// Drive the scan loop until shutdown. Deactivation stays responsive
    /// while an analysis call is outstanding; the call itself runs to
    /// completion on the runtime and its result is discarded by the
    /// scheduler's generation check.
    pub async fn run(mut self) -> Result<()> {
        let mut inflight: Option<(u64, JoinHandle<Result<Detection, AnalysisFailure>>)> = None;
        let mut retry_floor_ms: u64 = 0;

        loop {
            let schedule = self.scheduler.schedule();
            let tick_armed = self.capture_active && schedule.active && !schedule.busy;
            let deadline_ms = schedule.next_scan_at_ms.max(retry_floor_ms);
            let delay = Duration::from_millis(deadline_ms.saturating_sub(epoch_ms()));

            let event = tokio::select! {
                command = self.commands.recv() => LoopEvent::Command(command),
                result = async { (&mut inflight.as_mut().expect("inflight checked").1).await },
                    if inflight.is_some() =>
                {
                    let (generation, _) = inflight.take().expect("inflight checked");
                    LoopEvent::AnalysisDone(generation, result)
                }
                _ = tokio::time::sleep(delay), if tick_armed => LoopEvent::TimerTick,
            };

            match event {
                LoopEvent::Command(None) | LoopEvent::Command(Some(WatchCommand::Shutdown)) => {
                    self.deactivate();
                    info!("Watcher shut down");
                    return Ok(());
                }
                LoopEvent::Command(Some(WatchCommand::Activate)) => self.activate(),
                LoopEvent::Command(Some(WatchCommand::Deactivate)) => self.deactivate(),
                LoopEvent::Command(Some(WatchCommand::ManualScan)) => {
                    self.cycle(CycleTrigger::Manual, &mut inflight, &mut retry_floor_ms);
                }
                LoopEvent::Command(Some(WatchCommand::SetResolution(resolution))) => {
                    self.set_resolution(resolution);
                }
                LoopEvent::TimerTick => {
                    self.cycle(CycleTrigger::Timer, &mut inflight, &mut retry_floor_ms);
                }
                LoopEvent::AnalysisDone(generation, result) => {
                    self.apply_completion(generation, result);
                }
            }
        }
    }

    fn activate(&mut self) {
        if self.scheduler.schedule().active {
            debug!("Activate ignored: already running");
            return;
        }

        match self.source.start(self.resolution) {
            Ok(()) => {
                self.capture_active = true;
                self.scheduler.activate(epoch_ms());
            }
            Err(e) => self.capture_fault(e.to_string()),
        }
    }

    fn deactivate(&mut self) {
        if self.scheduler.schedule().active {
            self.scheduler.deactivate();
        }
        if self.capture_active {
            self.source.stop();
            self.capture_active = false;
        }
    }

    /// Release the device before reacquiring at the new resolution; a failed
    /// reacquire is fatal to the current activation, same as a failed start.
    fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
        if !self.capture_active {
            return;
        }

        self.source.stop();
        match self.source.start(resolution) {
            Ok(()) => {
                info!(
                    "Capture restarted at {}x{}",
                    resolution.width(),
                    resolution.height()
                );
                self.scheduler.notify_capture_restarted();
            }
            Err(e) => {
                self.capture_active = false;
                self.scheduler.deactivate();
                self.capture_fault(e.to_string());
            }
        }
    }

    fn cycle(
        &mut self,
        trigger: CycleTrigger,
        inflight: &mut Option<(u64, JoinHandle<Result<Detection, AnalysisFailure>>)>,
        retry_floor_ms: &mut u64,
    ) {
        let now_ms = epoch_ms();
        self.metrics.inc(&self.metrics.ticks_total);

        let frame = if self.capture_active {
            self.source.capture()
        } else {
            None
        };

        match self.scheduler.run_cycle(trigger, frame, now_ms) {
            CycleOutcome::Analyze(ticket) => {
                info!("Dispatching {}-triggered analysis", ticket.trigger.as_str());
                self.metrics.inc(&self.metrics.analyses_started);
                let client = Arc::clone(&self.client);
                let generation = ticket.generation;
                *inflight = Some((
                    generation,
                    tokio::spawn(async move { client.detect(&ticket.frame).await }),
                ));
            }
            CycleOutcome::Static(_) => self.metrics.inc(&self.metrics.static_scenes),
            CycleOutcome::FrameNotReady => {
                self.metrics.inc(&self.metrics.frames_not_ready);
                *retry_floor_ms = now_ms + CAPTURE_RETRY_MS;
            }
            CycleOutcome::Busy | CycleOutcome::Inactive => {}
        }

        self.forward_events();
    }

    fn apply_completion(
        &mut self,
        generation: u64,
        result: std::result::Result<Result<Detection, AnalysisFailure>, JoinError>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!("Analysis task failed: {}", join_error);
                Err(AnalysisFailure::Other(format!(
                    "analysis task failed: {}",
                    join_error
                )))
            }
        };

        if let Some(event) = self.scheduler.complete_analysis(generation, outcome, epoch_ms()) {
            match event.status {
                DetectionStatus::PersonDetected => {
                    self.metrics.inc(&self.metrics.analyses_ok);
                    self.metrics.inc(&self.metrics.alerts_fired);
                    self.alerts.person_detected(&event);
                }
                DetectionStatus::NoPerson => self.metrics.inc(&self.metrics.analyses_ok),
                DetectionStatus::Cooldown => {
                    self.metrics.inc(&self.metrics.analyses_failed);
                    self.metrics.inc(&self.metrics.quota_backoffs);
                }
                DetectionStatus::Error => self.metrics.inc(&self.metrics.analyses_failed),
                DetectionStatus::StaticScene => {}
            }
        }

        self.forward_events();
    }

    /// Device acquisition failed: surface it to observers and stay idle
    /// until a fresh activation succeeds.
    fn capture_fault(&mut self, message: String) {
        error!("Capture unavailable: {}", message);
        let event = DetectionEvent::new(
            DetectionStatus::Error,
            format!("Capture unavailable: {}", message),
            epoch_ms(),
        );
        let _ = self.events.send(event);
    }

    fn forward_events(&mut self) {
        for event in self.scheduler.drain_events() {
            debug!("{}: {}", event.status.as_str(), event.message);
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use crate::motion_detection::SAMPLE_SIZE;
    use crate::types::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct TestSource {
        started: bool,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        fail_start: bool,
    }

    impl TestSource {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let stops = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    started: false,
                    starts: Arc::clone(&starts),
                    stops: Arc::clone(&stops),
                    fail_start: false,
                },
                starts,
                stops,
            )
        }
    }

    impl FrameSource for TestSource {
        fn start(&mut self, _resolution: Resolution) -> Result<(), CaptureError> {
            if self.fail_start {
                return Err(CaptureError::Unavailable("no device".to_string()));
            }
            assert!(!self.started, "start without intervening stop");
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) {
            assert!(self.started, "stop without matching start");
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.started = false;
        }

        fn capture(&mut self) -> Option<Frame> {
            if !self.started {
                return None;
            }
            Some(Frame {
                data: vec![100; SAMPLE_SIZE * SAMPLE_SIZE * 3],
                width: SAMPLE_SIZE,
                height: SAMPLE_SIZE,
                timestamp_ms: epoch_ms(),
            })
        }
    }

    /// Analysis fake: counts calls and optionally blocks until released.
    struct FakeClient {
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Semaphore>>,
        detection: Detection,
    }

    #[async_trait::async_trait]
    impl AnalysisClient for FakeClient {
        async fn detect(&self, _frame: &Frame) -> Result<Detection, AnalysisFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
            }
            Ok(self.detection.clone())
        }
    }

    struct CountingAlert {
        fired: Arc<AtomicUsize>,
    }

    impl AlertSink for CountingAlert {
        fn person_detected(&mut self, _event: &DetectionEvent) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn person(confidence: f32) -> Detection {
        Detection {
            person_detected: true,
            confidence,
            description: "someone".to_string(),
        }
    }

    fn test_config(base_interval_ms: u64) -> Config {
        let mut config = Config::default();
        config.scan.base_interval_ms = base_interval_ms;
        config
    }

    async fn wait_until(flag: impl Fn() -> bool) {
        timeout(WAIT, async {
            while !flag() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_event(rx: &mut broadcast::Receiver<DetectionEvent>) -> DetectionEvent {
        timeout(WAIT, rx.recv()).await.expect("no event").unwrap()
    }

    #[tokio::test]
    async fn test_manual_scan_alerts_exactly_once() {
        let (source, _, _) = TestSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            calls: Arc::clone(&calls),
            gate: None,
            detection: person(90.0),
        };
        let alerts = CountingAlert {
            fired: Arc::clone(&fired),
        };

        let (watcher, handle) = Watcher::new(&test_config(30_000), source, client, alerts);
        let mut events = handle.subscribe();
        let running = tokio::spawn(watcher.run());

        handle.activate().await.unwrap();
        handle.manual_scan().await.unwrap();

        let event = next_event(&mut events).await;
        assert_eq!(event.status, DetectionStatus::PersonDetected);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_manual_scan_while_busy_is_dropped() {
        let (source, _, _) = TestSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let client = FakeClient {
            calls: Arc::clone(&calls),
            gate: Some(Arc::clone(&gate)),
            detection: person(90.0),
        };
        let alerts = CountingAlert {
            fired: Arc::clone(&fired),
        };

        let (watcher, handle) = Watcher::new(&test_config(30_000), source, client, alerts);
        let mut events = handle.subscribe();
        let running = tokio::spawn(watcher.run());

        handle.activate().await.unwrap();
        handle.manual_scan().await.unwrap();
        {
            let calls = Arc::clone(&calls);
            wait_until(move || calls.load(Ordering::SeqCst) == 1).await;
        }

        // Second trigger while the first call is still in flight: dropped.
        handle.manual_scan().await.unwrap();
        gate.add_permits(1);

        let event = next_event(&mut events).await;
        assert_eq!(event.status, DetectionStatus::PersonDetected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        handle.shutdown().await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_deactivation_discards_late_result() {
        let (source, _, stops) = TestSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let client = FakeClient {
            calls: Arc::clone(&calls),
            gate: Some(Arc::clone(&gate)),
            detection: person(90.0),
        };
        let alerts = CountingAlert {
            fired: Arc::clone(&fired),
        };

        let (watcher, handle) = Watcher::new(&test_config(30_000), source, client, alerts);
        let mut events = handle.subscribe();
        let running = tokio::spawn(watcher.run());

        handle.activate().await.unwrap();
        handle.manual_scan().await.unwrap();
        {
            let calls = Arc::clone(&calls);
            wait_until(move || calls.load(Ordering::SeqCst) == 1).await;
        }

        // Deactivate while the call is outstanding, then let it resolve.
        handle.deactivate().await.unwrap();
        {
            let stops = Arc::clone(&stops);
            wait_until(move || stops.load(Ordering::SeqCst) == 1).await;
        }
        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(handle.metrics().analyses_started, 1);

        handle.shutdown().await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_timer_tick_drives_first_analysis() {
        let (source, _, _) = TestSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            calls: Arc::clone(&calls),
            gate: None,
            detection: Detection {
                person_detected: false,
                confidence: 5.0,
                description: String::new(),
            },
        };
        let alerts = CountingAlert {
            fired: Arc::clone(&fired),
        };

        // Short cadence so the first timer tick lands within the test.
        let (watcher, handle) = Watcher::new(&test_config(50), source, client, alerts);
        let mut events = handle.subscribe();
        let running = tokio::spawn(watcher.run());

        handle.activate().await.unwrap();

        // Cold-start motion guarantees the first tick analyzes.
        let event = next_event(&mut events).await;
        assert_eq!(event.status, DetectionStatus::NoPerson);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        handle.shutdown().await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_capture_hooks_fire_once_per_transition() {
        let (source, starts, stops) = TestSource::new();
        let client = FakeClient {
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
            detection: person(90.0),
        };
        let alerts = CountingAlert {
            fired: Arc::new(AtomicUsize::new(0)),
        };

        let (watcher, handle) = Watcher::new(&test_config(30_000), source, client, alerts);
        let running = tokio::spawn(watcher.run());

        handle.activate().await.unwrap();
        {
            let starts = Arc::clone(&starts);
            wait_until(move || starts.load(Ordering::SeqCst) == 1).await;
        }

        handle.deactivate().await.unwrap();
        {
            let stops = Arc::clone(&stops);
            wait_until(move || stops.load(Ordering::SeqCst) == 1).await;
        }

        // Shutdown after deactivation must not release the device twice.
        handle.shutdown().await.unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolution_change_releases_before_reacquiring() {
        let (source, starts, stops) = TestSource::new();
        let client = FakeClient {
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
            detection: person(90.0),
        };
        let alerts = CountingAlert {
            fired: Arc::new(AtomicUsize::new(0)),
        };

        let (watcher, handle) = Watcher::new(&test_config(30_000), source, client, alerts);
        let mut events = handle.subscribe();
        let running = tokio::spawn(watcher.run());

        handle.activate().await.unwrap();
        handle.set_resolution(Resolution::Fhd).await.unwrap();
        {
            let starts = Arc::clone(&starts);
            wait_until(move || starts.load(Ordering::SeqCst) == 2).await;
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // The activation survives the restart.
        handle.manual_scan().await.unwrap();
        let event = next_event(&mut events).await;
        assert_eq!(event.status, DetectionStatus::PersonDetected);

        handle.shutdown().await.unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_start_surfaces_capture_fault() {
        let (mut source, starts, _) = TestSource::new();
        source.fail_start = true;
        let client = FakeClient {
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
            detection: person(90.0),
        };
        let alerts = CountingAlert {
            fired: Arc::new(AtomicUsize::new(0)),
        };

        let (watcher, handle) = Watcher::new(&test_config(30_000), source, client, alerts);
        let mut events = handle.subscribe();
        let running = tokio::spawn(watcher.run());

        handle.activate().await.unwrap();
        let event = next_event(&mut events).await;
        assert_eq!(event.status, DetectionStatus::Error);
        assert!(event.message.contains("Capture unavailable"));
        assert_eq!(starts.load(Ordering::SeqCst), 0);

        handle.shutdown().await.unwrap();
        running.await.unwrap().unwrap();
    }
}
