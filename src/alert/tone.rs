//! Alarm tone channel.
//!
//! Synthesizes the two-frequency siren in software and streams it to the
//! audio backend one cadence block at a time. Each block holds one
//! frequency; the synth alternates frequencies between blocks while
//! carrying the sine phase across the switch so the output never clicks.
//!
//! The tone is independent of which zones are in danger: once sounding
//! it keeps running unchanged until the channel is stopped.

use crate::audio::AudioBackend;
use crate::config::ToneConfig;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Synthesis sample rate. High enough for a clean 1 kHz tone, low enough
/// that a 300 ms block stays small (~13 KB).
pub const SAMPLE_RATE_HZ: u32 = 22_050;

/// Frozen tone parameters, captured from config at channel creation.
#[derive(Debug, Clone, Copy)]
pub struct TonePattern {
    pub low_hz: f64,
    pub high_hz: f64,
    pub cadence_ms: u64,
    pub volume: f64,
}

impl From<&ToneConfig> for TonePattern {
    fn from(cfg: &ToneConfig) -> Self {
        Self {
            low_hz: cfg.low_hz,
            high_hz: cfg.high_hz,
            cadence_ms: cfg.cadence_ms,
            volume: cfg.volume,
        }
    }
}

// ============================================================================
// Synthesis
// ============================================================================

/// Incremental sine generator for the alternating alarm tone.
///
/// `next_block()` renders one cadence worth of samples at the current
/// frequency, then switches to the other frequency for the next call.
/// Phase accumulates across blocks and frequency switches.
pub struct ToneSynth {
    pattern: TonePattern,
    phase: f64,
    high: bool,
}

impl ToneSynth {
    pub fn new(pattern: TonePattern) -> Self {
        Self {
            pattern,
            phase: 0.0,
            high: false,
        }
    }

    /// Render the next cadence block as s16le mono bytes.
    pub fn next_block(&mut self) -> Vec<u8> {
        let samples = (u64::from(SAMPLE_RATE_HZ) * self.pattern.cadence_ms / 1000) as usize;
        let freq = if self.high {
            self.pattern.high_hz
        } else {
            self.pattern.low_hz
        };
        let step = TAU * freq / f64::from(SAMPLE_RATE_HZ);
        let amplitude = self.pattern.volume * f64::from(i16::MAX);

        let mut block = Vec::with_capacity(samples * 2);
        for _ in 0..samples {
            let value = (self.phase.sin() * amplitude) as i16;
            block.extend_from_slice(&value.to_le_bytes());
            self.phase = (self.phase + step) % TAU;
        }

        self.high = !self.high;
        block
    }
}

// ============================================================================
// Channel
// ============================================================================

struct RunningTone {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the background task that streams the alarm tone.
///
/// `start()` while already running is a no-op, so the tone is never
/// doubled or restarted mid-pattern. `stop()` returns only after the
/// streaming task has exited and the PCM sink is closed.
pub struct ToneChannel {
    backend: Arc<dyn AudioBackend>,
    pattern: TonePattern,
    running: Option<RunningTone>,
}

impl ToneChannel {
    pub fn new(backend: Arc<dyn AudioBackend>, cfg: &ToneConfig) -> Self {
        Self {
            backend,
            pattern: TonePattern::from(cfg),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Begin sounding the tone. No-op if already sounding.
    pub fn start(&mut self) {
        if self.running.is_some() {
            debug!("Tone already sounding — start ignored");
            return;
        }

        let backend = Arc::clone(&self.backend);
        let pattern = self.pattern;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut sink = match backend.open_pcm(SAMPLE_RATE_HZ).await {
                Ok(sink) => sink,
                Err(e) => {
                    warn!(error = %e, "Tone output unavailable — alarm degraded to silent");
                    return;
                }
            };

            let mut synth = ToneSynth::new(pattern);
            let mut ticker = tokio::time::interval(Duration::from_millis(pattern.cadence_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let block = synth.next_block();
                        if let Err(e) = sink.write(&block).await {
                            warn!(error = %e, "Tone sink failed — alarm degraded to silent");
                            break;
                        }
                    }
                }
            }

            sink.close().await;
        });

        self.running = Some(RunningTone { cancel, task });
    }

    /// Silence the tone. Returns once the streaming task has fully exited;
    /// a no-op if the tone is not sounding.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            let _ = running.task.await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
