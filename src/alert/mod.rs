//! Alert state machine.
//!
//! Coordinates the audible alert across three phases:
//!
//! - **Idle**: no zone in danger, both channels silent
//! - **Sounding**: danger present, tone and voice both running
//! - **Muted**: danger present but the operator silenced the alarm
//!
//! The machine is the only owner of the two channels, so every start and
//! stop goes through one place and the phase can never disagree with
//! what is audible. A mute lasts only for the alarm episode it silenced:
//! when the danger set empties the mute clears with it, and the next
//! danger sounds in full.

pub mod tone;
pub mod voice;

pub use tone::ToneChannel;
pub use voice::VoiceChannel;

use crate::audio::AudioBackend;
use crate::config::{ToneConfig, VoiceConfig};
use crate::types::{AlertState, DangerSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Phase of the audible alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    Sounding,
    Muted,
}

impl std::fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertPhase::Idle => write!(f, "IDLE"),
            AlertPhase::Sounding => write!(f, "SOUNDING"),
            AlertPhase::Muted => write!(f, "MUTED"),
        }
    }
}

/// Drives the tone and voice channels from danger-set changes and
/// operator mute commands.
///
/// Invariant: the phase is `Idle` exactly when the danger set is empty.
pub struct AlertMachine {
    phase: AlertPhase,
    danger: DangerSet,
    tone: ToneChannel,
    voice: VoiceChannel,
}

impl AlertMachine {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        tone_cfg: &ToneConfig,
        voice_cfg: &VoiceConfig,
    ) -> Self {
        Self {
            phase: AlertPhase::Idle,
            danger: DangerSet::default(),
            tone: ToneChannel::new(Arc::clone(&backend), tone_cfg),
            voice: VoiceChannel::new(backend, voice_cfg),
        }
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    pub fn danger(&self) -> &DangerSet {
        &self.danger
    }

    /// Externally observable alert state.
    pub fn state(&self) -> AlertState {
        AlertState {
            active: !self.danger.is_empty(),
            muted: self.phase == AlertPhase::Muted,
        }
    }

    /// Apply a new danger-set membership.
    ///
    /// Called only when membership actually changed; a repeated set is
    /// ignored so a redundant notification cannot restart the warning.
    pub async fn on_danger_change(&mut self, zones: DangerSet) {
        if zones == self.danger {
            return;
        }

        if zones.is_empty() {
            match self.phase {
                AlertPhase::Idle => {}
                AlertPhase::Sounding => {
                    self.voice.stop().await;
                    self.tone.stop().await;
                    info!("All zones clear — alarm stopped");
                }
                AlertPhase::Muted => {
                    // Channels are already silent; the mute dissolves with
                    // the danger that it silenced.
                    info!("All zones clear — mute cleared");
                }
            }
            self.phase = AlertPhase::Idle;
        } else {
            match self.phase {
                AlertPhase::Idle => {
                    info!(zones = %zones, "Fire detected — alarm sounding");
                    self.tone.start();
                    self.voice.start(&zones).await;
                    self.phase = AlertPhase::Sounding;
                }
                AlertPhase::Sounding => {
                    // The tone keeps running unchanged; only the spoken
                    // warning names zones and must be re-announced.
                    info!(zones = %zones, "Danger zones changed — warning re-announced");
                    self.voice.start(&zones).await;
                }
                AlertPhase::Muted => {
                    debug!(zones = %zones, "Danger zones changed while muted");
                }
            }
        }

        self.danger = zones;
    }

    /// Operator mute. Silences both channels; the alarm condition itself
    /// stays active. No-op unless currently sounding.
    pub async fn mute(&mut self) {
        match self.phase {
            AlertPhase::Sounding => {
                self.voice.stop().await;
                self.tone.stop().await;
                self.phase = AlertPhase::Muted;
                info!(zones = %self.danger, "Alarm muted by operator");
            }
            AlertPhase::Idle | AlertPhase::Muted => {
                debug!(phase = %self.phase, "Mute ignored");
            }
        }
    }

    /// Operator unmute. Restarts both channels against the current danger
    /// set. No-op unless currently muted.
    pub async fn unmute(&mut self) {
        match self.phase {
            AlertPhase::Muted => {
                info!(zones = %self.danger, "Alarm unmuted — sounding resumed");
                self.tone.start();
                self.voice.start(&self.danger).await;
                self.phase = AlertPhase::Sounding;
            }
            AlertPhase::Idle | AlertPhase::Sounding => {
                debug!(phase = %self.phase, "Unmute ignored");
            }
        }
    }

    /// Stop both channels unconditionally. Used at monitor shutdown.
    pub async fn shutdown(&mut self) {
        self.voice.stop().await;
        self.tone.stop().await;
        self.phase = AlertPhase::Idle;
        self.danger = DangerSet::default();
    }
}

// ============================================================================
// Tests
// ============================================================================
