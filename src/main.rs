//! Firewatch - Multi-Zone Fire Alarm Coordinator
//!
//! Watches a building's sensor relay over WebSocket and drives the
//! audible fire alarm: an alternating two-frequency tone plus a spoken
//! warning naming the zones in danger.
//!
//! # Usage
//!
//! ```bash
//! # Run against the default relay (ws://127.0.0.1:8000/ws/sensors)
//! cargo run --release
//!
//! # Run against the bundled simulator
//! cargo run --bin sensor-sim &
//! cargo run --release -- --url ws://127.0.0.1:8000/ws/sensors
//!
//! # Track alert state without touching any sound device
//! cargo run --release -- --no-audio
//! ```
//!
//! While running, the process takes operator commands on stdin, one per
//! line: `mute`, `unmute`, `status`, `quit`.
//!
//! # Environment Variables
//!
//! - `FIREWATCH_CONFIG`: Path to a firewatch.toml (checked before ./firewatch.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use firewatch::audio::{AudioBackend, NullBackend, ProcessBackend};
use firewatch::config::{self, MonitorConfig};
use firewatch::monitor::{MonitorHandle, MonitorLoop};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "firewatch")]
#[command(about = "Multi-zone fire alarm coordinator")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (takes precedence over FIREWATCH_CONFIG
    /// and ./firewatch.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the sensor relay WebSocket URL
    #[arg(long, value_name = "WS_URL")]
    url: Option<String>,

    /// Override the reconnect delay in milliseconds
    #[arg(long, value_name = "MS")]
    reconnect_ms: Option<u64>,

    /// Run without touching any audio device (alert state only)
    #[arg(long)]
    no_audio: bool,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskName {
    Monitor,
    Console,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Monitor => write!(f, "Monitor"),
            TaskName::Console => write!(f, "Console"),
        }
    }
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        return Ok(());
                    }
                }
            }
        }
    }

    // Cancelled: give the remaining tasks a moment to stop their audio
    // channels and close the feed before the set is dropped.
    let drain = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(result) = task_set.join_next().await {
            match result {
                Ok(Ok(task_name)) => {
                    info!("🔒 Supervisor: Task {} completed normally", task_name);
                }
                Ok(Err(e)) => error!("🔒 Supervisor: Task failed during shutdown: {}", e),
                Err(e) => error!("🔒 Supervisor: Task panicked during shutdown: {}", e),
            }
        }
    });
    if drain.await.is_err() {
        warn!("🔒 Supervisor: Shutdown drain timed out, aborting remaining tasks");
    }

    Ok(())
}

// ============================================================================
// Operator Console
// ============================================================================

/// Spawn the stdin command reader into the JoinSet.
fn spawn_console(
    task_set: &mut JoinSet<Result<TaskName>>,
    handle: MonitorHandle,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[Console] Task starting (commands: mute | unmute | status | quit)");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => handle_command(line.trim(), &handle, &cancel_token).await,
                        Ok(None) => {
                            // stdin closed (e.g. running under a service manager)
                            info!("[Console] stdin closed - console commands disabled");
                            break;
                        }
                        Err(e) => {
                            warn!("[Console] stdin read failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        Ok(TaskName::Console)
    });
}

async fn handle_command(cmd: &str, handle: &MonitorHandle, cancel_token: &CancellationToken) {
    match cmd {
        "mute" => handle.mute().await,
        "unmute" => handle.unmute().await,
        "status" => {
            let state = handle.state().await;
            match serde_json::to_string_pretty(&state) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("[Console] Failed to render status: {}", e),
            }
        }
        "quit" | "exit" => {
            info!("[Console] Quit requested");
            cancel_token.cancel();
        }
        "" => {}
        other => {
            warn!("[Console] Unknown command {:?} (try mute | unmute | status | quit)", other);
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    // Load monitor configuration
    let mut monitor_config = match &args.config {
        Some(path) => MonitorConfig::load_from_file(path)?,
        None => MonitorConfig::load(),
    };
    if let Some(url) = args.url {
        monitor_config.source.url = url;
    }
    if let Some(ms) = args.reconnect_ms {
        monitor_config.source.reconnect_delay_ms = ms;
    }
    monitor_config.validate()?;

    info!(
        "Feed: {} | Reconnect: {}ms | Tone: {:.0}/{:.0} Hz every {}ms | Voice repeat: {}s",
        monitor_config.source.url,
        monitor_config.source.reconnect_delay_ms,
        monitor_config.tone.low_hz,
        monitor_config.tone.high_hz,
        monitor_config.tone.cadence_ms,
        monitor_config.voice.repeat_secs,
    );
    config::init(monitor_config.clone());

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Firewatch - Multi-Zone Fire Alarm Coordinator");
    info!("  Building Sensor Feed Monitor");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    let backend: Arc<dyn AudioBackend> = if args.no_audio {
        info!("🔇 Audio: disabled (--no-audio), alert state tracked silently");
        Arc::new(NullBackend)
    } else {
        info!("🔊 Audio: command-line playback (tone) and speech synthesis (voice)");
        Arc::new(ProcessBackend::new())
    };
    info!("");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let (monitor, handle) = MonitorLoop::new(&monitor_config, backend, cancel_token.clone());

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: Monitor loop (feed link, zone store, alert machine)
    task_set.spawn(async move {
        info!("[Monitor] Task starting");
        let stats = monitor.run().await;

        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("📊 FINAL STATISTICS");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("   Snapshots Applied:   {}", stats.snapshots_applied);
        info!("   Danger Changes:      {}", stats.danger_changes);
        info!("   Operator Commands:   {}", stats.intents_handled);
        info!("   Connect Attempts:    {}", stats.link.connect_attempts);
        info!("   Snapshots Received:  {}", stats.link.snapshots_received);
        info!("   Parse Failures:      {}", stats.link.parse_failures);
        info!("   Sessions Completed:  {}", stats.link.sessions_completed);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        Ok(TaskName::Monitor)
    });

    // Task 2: Operator console on stdin
    spawn_console(&mut task_set, handle, cancel_token.clone());

    run_supervisor(&mut task_set, cancel_token).await?;

    info!("");
    info!("✓ Firewatch shutdown complete");
    Ok(())
}
