//! Building Sensor Feed Simulation
//!
//! Serves the sensor relay WebSocket feed with a scripted fire scenario
//! for exercising firewatch end to end:
//! - Calm: all zones safe
//! - Single-zone fire: one zone breaches its gas threshold
//! - Spreading fire: several zones in danger at once
//! - Recovery: all zones return to safe
//!
//! The scenario loops forever on a fixed cycle, so a long-running monitor
//! sees repeated alarm episodes.
//!
//! # Usage
//! ```bash
//! ./sensor-sim --addr 127.0.0.1:8000 --interval-ms 2000
//! # In another terminal:
//! ./firewatch
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::SinkExt;
use rand::prelude::*;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use firewatch::types::{SensorSnapshot, ZoneId, ZoneReading, ZoneStatus};

// ============================================================================
// Feed Constants
// ============================================================================

/// Ambient temperature (deg C)
const BASE_TEMP_C: f64 = 24.0;
/// Temperature at a burning zone (deg C)
const DANGER_TEMP_C: f64 = 58.0;
/// Ambient gas level (ppm)
const BASE_GAS_PPM: f64 = 180.0;
/// Gas level at a burning zone (ppm)
const DANGER_GAS_PPM: f64 = 450.0;
/// Danger threshold reported for every zone (ppm)
const GAS_THRESHOLD_PPM: f64 = 300.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sensor-sim")]
#[command(about = "Building sensor feed simulation for firewatch testing")]
#[command(version = "1.0")]
struct Args {
    /// Listen address for the WebSocket feed
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: String,

    /// Interval between snapshots (ms)
    #[arg(long, default_value = "2000", value_parser = clap::value_parser!(u64).range(50..))]
    interval_ms: u64,

    /// Number of monitored zones (floors)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u16).range(1..=32))]
    zones: u16,

    /// Seconds for one full calm/fire/spread/recovery cycle
    #[arg(long, default_value = "120", value_parser = clap::value_parser!(u64).range(8..))]
    cycle_secs: u64,

    /// Close each session after this many frames (0 = never).
    /// Useful for exercising the monitor's reconnect path.
    #[arg(long, default_value = "0")]
    drop_every: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Scenario Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// All zones safe (0-40%)
    Calm,
    /// Fire on one zone (40-60%)
    SingleZone,
    /// Fire spreading to several zones (60-80%)
    MultiZone,
    /// All zones back to safe (80-100%)
    Recovery,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Calm => "Calm (All Zones Safe)",
            Phase::SingleZone => "Single-Zone Fire",
            Phase::MultiZone => "Spreading Fire (Multiple Zones)",
            Phase::Recovery => "Recovery (Zones Clearing)",
        }
    }

    fn from_progress(progress: f64) -> Self {
        match progress {
            p if p < 0.40 => Phase::Calm,
            p if p < 0.60 => Phase::SingleZone,
            p if p < 0.80 => Phase::MultiZone,
            _ => Phase::Recovery,
        }
    }

    /// Zones on fire during this phase, for a building with `zones` floors.
    fn burning(&self, zones: u16) -> Vec<ZoneId> {
        let first: ZoneId = 2.min(zones);
        match self {
            Phase::Calm | Phase::Recovery => vec![],
            Phase::SingleZone => vec![first],
            Phase::MultiZone => {
                let mut out = vec![first];
                if zones >= 3 {
                    out.push(3);
                } else if zones >= 2 {
                    out.push(1);
                }
                out
            }
        }
    }
}

// ============================================================================
// Feed State
// ============================================================================

struct FeedState {
    rng: StdRng,
    zones: u16,
    cycle: Duration,
    started: Instant,
}

impl FeedState {
    fn new(zones: u16, cycle_secs: u64, started: Instant, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            zones,
            cycle: Duration::from_secs(cycle_secs),
            started,
        }
    }

    fn current_phase(&self) -> Phase {
        let progress =
            (self.started.elapsed().as_secs_f64() / self.cycle.as_secs_f64()).fract();
        Phase::from_progress(progress)
    }

    /// Build the next snapshot for the current phase of the scenario.
    fn next_snapshot(&mut self) -> (Phase, SensorSnapshot) {
        let phase = self.current_phase();
        let burning = phase.burning(self.zones);

        let mut floors = BTreeMap::new();
        for zone in 1..=self.zones {
            let on_fire = burning.contains(&zone);
            let (temp_base, gas_base) = if on_fire {
                (DANGER_TEMP_C, DANGER_GAS_PPM)
            } else {
                (BASE_TEMP_C, BASE_GAS_PPM)
            };
            floors.insert(
                zone,
                ZoneReading {
                    status: if on_fire {
                        ZoneStatus::Danger
                    } else {
                        ZoneStatus::Safe
                    },
                    temperature: temp_base + self.rng.gen_range(-1.5..1.5),
                    gas: gas_base + self.rng.gen_range(-12.0..12.0),
                    threshold: GAS_THRESHOLD_PPM,
                },
            );
        }

        let danger_floors = floors
            .iter()
            .filter(|(_, r)| r.status == ZoneStatus::Danger)
            .map(|(id, _)| *id)
            .collect();

        (phase, SensorSnapshot { floors, danger_floors })
    }
}

// ============================================================================
// Client Sessions
// ============================================================================

#[derive(Clone, Copy)]
struct SessionConfig {
    interval_ms: u64,
    zones: u16,
    cycle_secs: u64,
    drop_every: u64,
    seed: Option<u64>,
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    cfg: SessionConfig,
    started: Instant,
) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    info!("🔌 Client connected: {}", peer);

    let mut state = FeedState::new(cfg.zones, cfg.cycle_secs, started, cfg.seed);
    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.interval_ms));
    let mut last_phase: Option<Phase> = None;
    let mut frames = 0u64;

    loop {
        ticker.tick().await;

        let (phase, snapshot) = state.next_snapshot();
        if last_phase != Some(phase) {
            info!("📍 Phase: {}", phase.name());
            last_phase = Some(phase);
        }

        let text = serde_json::to_string(&snapshot).context("snapshot serialization failed")?;
        if let Err(e) = ws.send(Message::Text(text)).await {
            info!("🔌 Client {} gone: {}", peer, e);
            break;
        }
        frames += 1;

        if cfg.drop_every > 0 && frames % cfg.drop_every == 0 {
            warn!("🔌 Dropping session to {} after {} frames (--drop-every)", peer, frames);
            let _ = ws.close(None).await;
            break;
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Sensor Feed Simulation - Scripted Building Fire Scenario");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "📊 Zones: {} | Interval: {}ms | Cycle: {}s | Drop every: {}",
        args.zones,
        args.interval_ms,
        args.cycle_secs,
        if args.drop_every == 0 {
            "never".to_string()
        } else {
            format!("{} frames", args.drop_every)
        }
    );

    let listener = TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.addr))?;
    info!("📡 Sensor feed listening on ws://{}/ws/sensors", args.addr);

    let session_cfg = SessionConfig {
        interval_ms: args.interval_ms,
        zones: args.zones,
        cycle_secs: args.cycle_secs,
        drop_every: args.drop_every,
        seed: args.seed,
    };
    let started = Instant::now();

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        tokio::spawn(async move {
            if let Err(e) = serve_client(stream, peer, session_cfg, started).await {
                warn!("Session error from {}: {}", peer, e);
            }
        });
    }
}
