// src/main.rs

mod alert;
mod analysis_client;
mod backoff;
mod capture;
mod config;
mod event_bus;
mod history;
mod metrics;
mod motion_detection;
mod scan_scheduler;
mod types;
mod watcher;

use alert::ConsoleAlert;
use analysis_client::HttpAnalysisClient;
use anyhow::Result;
use capture::SyntheticSource;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use types::Resolution;
use watcher::{WatchHandle, Watcher};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = types::Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("presence_watch={}", config.logging.level))
        .init();

    info!("Presence watcher starting");
    info!(
        "Scan cadence: base {}s, sensitivity {}, resolution {}x{}",
        config.scan.base_interval_ms / 1000,
        config.scan.sensitivity,
        config.capture.resolution.width(),
        config.capture.resolution.height(),
    );
    info!("Analysis server: {}", config.analysis.server_url);

    let client = HttpAnalysisClient::new(&config.analysis.server_url, config.analysis.timeout_secs)?;
    let alerts = ConsoleAlert::new(config.alert.sound_enabled);
    let source = SyntheticSource::new();

    let (watcher, handle) = Watcher::new(&config, source, client, alerts);
    let mut events = handle.subscribe();
    let running = tokio::spawn(watcher.run());

    // Mirror the event stream into the log; a UI would subscribe the same way.
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                "[history] {} - {}{}",
                event.status.as_str(),
                event.message,
                event
                    .confidence
                    .map(|c| format!(" ({:.0}%)", c))
                    .unwrap_or_default()
            );
        }
    });

    handle.activate().await?;
    info!("Watching. Commands: scan | start | stop | res <HD|FHD|UHD> | status. Ctrl-C to exit.");

    tokio::spawn(console(handle.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    handle.shutdown().await?;
    running.await??;

    let summary = handle.metrics();
    info!(
        "Session summary: {} ticks, {} static scenes, {} analyses ({} ok, {} failed), {} alerts",
        summary.ticks_total,
        summary.static_scenes,
        summary.analyses_started,
        summary.analyses_ok,
        summary.analyses_failed,
        summary.alerts_fired,
    );

    Ok(())
}

/// Minimal operator console on stdin.
async fn console(handle: WatchHandle) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let result = match line.trim() {
            "" => Ok(()),
            "scan" => handle.manual_scan().await,
            "start" => handle.activate().await,
            "stop" => handle.deactivate().await,
            "status" => {
                let summary = handle.metrics();
                info!(
                    "{} ticks, {} analyses, {} alerts",
                    summary.ticks_total, summary.analyses_started, summary.alerts_fired
                );
                Ok(())
            }
            "res HD" => handle.set_resolution(Resolution::Hd).await,
            "res FHD" => handle.set_resolution(Resolution::Fhd).await,
            "res UHD" => handle.set_resolution(Resolution::Uhd).await,
            other => {
                warn!("Unknown command: {}", other);
                Ok(())
            }
        };

        if result.is_err() {
            break;
        }
    }
}
