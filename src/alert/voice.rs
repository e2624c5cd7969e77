//! Spoken warning channel.
//!
//! Announces which zones are in danger: once immediately when the channel
//! starts, then again on every repeat interval until stopped. Utterances
//! are awaited inline in the channel task, so two can never overlap.
//!
//! Unlike the tone, the spoken text depends on the danger set. When the
//! set changes the alert machine restarts this channel with the new
//! wording; `start()` therefore always tears down any previous cycle
//! completely before beginning the new one.

use crate::audio::AudioBackend;
use crate::config::VoiceConfig;
use crate::types::DangerSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Build the warning sentence for a danger set.
///
/// One zone: "Warning. Fire detected on floor 2."
/// Several: "Warning. Fire detected on floors 1, 2 and 3."
pub fn warning_phrase(zones: &DangerSet) -> String {
    let names: Vec<String> = zones.zones().map(|z| z.to_string()).collect();
    match names.as_slice() {
        [] => "Warning. Fire detected.".to_string(),
        [one] => format!("Warning. Fire detected on floor {one}."),
        [a, b] => format!("Warning. Fire detected on floors {a} and {b}."),
        [init @ .., last] => {
            format!("Warning. Fire detected on floors {} and {last}.", init.join(", "))
        }
    }
}

struct RunningVoice {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the background task that repeats the spoken warning.
pub struct VoiceChannel {
    backend: Arc<dyn AudioBackend>,
    repeat: Duration,
    running: Option<RunningVoice>,
}

impl VoiceChannel {
    pub fn new(backend: Arc<dyn AudioBackend>, cfg: &VoiceConfig) -> Self {
        Self {
            backend,
            repeat: Duration::from_secs(cfg.repeat_secs),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start announcing `zones`, replacing any announcement cycle already
    /// in progress. The previous cycle is fully stopped (its utterance
    /// silenced, its task joined) before the new one begins.
    pub async fn start(&mut self, zones: &DangerSet) {
        self.stop().await;

        let phrase = warning_phrase(zones);
        let backend = Arc::clone(&self.backend);
        let repeat = self.repeat;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(repeat);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = backend.speak(&phrase, &task_cancel).await {
                            warn!(error = %e, "Voice output unavailable — spoken warning degraded to silent");
                            break;
                        }
                    }
                }
            }
        });

        self.running = Some(RunningVoice { cancel, task });
    }

    /// Stop the announcement cycle, silencing any utterance in progress.
    /// Returns once the channel task has fully exited.
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
