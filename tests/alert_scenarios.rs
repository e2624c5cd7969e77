//! Alarm Scenario Tests
//!
//! Exercises the snapshot-to-sound pipeline end to end: snapshots go
//! through the zone store, membership changes drive the alert machine,
//! and a recording audio backend captures exactly which channel actions
//! resulted. No sound device is touched.
//!
//! The scenarios mirror how the building feed behaves in practice:
//! a fire appearing on one zone, spreading, being muted by an operator,
//! and clearing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use firewatch::alert::{AlertMachine, AlertPhase};
use firewatch::audio::{AudioBackend, AudioError, PcmSink};
use firewatch::config::{ToneConfig, VoiceConfig};
use firewatch::store::{SnapshotOutcome, ZoneStore};
use firewatch::types::{SensorSnapshot, ZoneId, ZoneReading, ZoneStatus};

// ============================================================================
// Recording Backend
// ============================================================================

/// One observable audio action.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    ToneOpened,
    ToneClosed,
    Spoke(String),
}

/// Audio backend that records every action for later assertions.
#[derive(Default)]
struct Recorder {
    actions: Arc<Mutex<Vec<Action>>>,
    tones_open: Arc<AtomicUsize>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn actions(&self) -> Vec<Action> {
        self.actions.lock().expect("action log poisoned").clone()
    }

    fn spoken(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Spoke(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn tone_opens(&self) -> usize {
        self.actions()
            .iter()
            .filter(|a| **a == Action::ToneOpened)
            .count()
    }

    fn tones_open_now(&self) -> usize {
        self.tones_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioBackend for Recorder {
    async fn open_pcm(&self, _sample_rate: u32) -> Result<Box<dyn PcmSink>, AudioError> {
        self.actions
            .lock()
            .expect("action log poisoned")
            .push(Action::ToneOpened);
        self.tones_open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecorderSink {
            actions: Arc::clone(&self.actions),
            tones_open: Arc::clone(&self.tones_open),
        }))
    }

    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<(), AudioError> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.actions
            .lock()
            .expect("action log poisoned")
            .push(Action::Spoke(text.to_string()));
        Ok(())
    }
}

struct RecorderSink {
    actions: Arc<Mutex<Vec<Action>>>,
    tones_open: Arc<AtomicUsize>,
}

#[async_trait]
impl PcmSink for RecorderSink {
    async fn write(&mut self, _block: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.actions
            .lock()
            .expect("action log poisoned")
            .push(Action::ToneClosed);
        self.tones_open.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build a snapshot where each listed zone is either safe or in danger.
fn snapshot(entries: &[(ZoneId, bool)]) -> SensorSnapshot {
    let floors: BTreeMap<ZoneId, ZoneReading> = entries
        .iter()
        .map(|(id, danger)| {
            (
                *id,
                ZoneReading {
                    status: if *danger {
                        ZoneStatus::Danger
                    } else {
                        ZoneStatus::Safe
                    },
                    temperature: if *danger { 58.0 } else { 24.0 },
                    gas: if *danger { 450.0 } else { 180.0 },
                    threshold: 300.0,
                },
            )
        })
        .collect();
    let danger_floors = entries
        .iter()
        .filter(|(_, danger)| *danger)
        .map(|(id, _)| *id)
        .collect();
    SensorSnapshot {
        floors,
        danger_floors,
    }
}

/// Apply a snapshot the way the monitor loop does: through the store,
/// notifying the machine only when danger membership changed.
async fn apply(store: &mut ZoneStore, machine: &mut AlertMachine, snap: SensorSnapshot) {
    if let SnapshotOutcome::Changed(danger) = store.apply_snapshot(snap) {
        machine.on_danger_change(danger).await;
    }
}

fn machine(backend: &Arc<Recorder>) -> AlertMachine {
    AlertMachine::new(
        Arc::clone(backend) as Arc<dyn AudioBackend>,
        &ToneConfig::default(),
        &VoiceConfig::default(),
    )
}

/// Let spawned channel tasks run.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fire_on_one_zone_sounds_tone_and_names_the_zone() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(1, false), (2, false), (3, false)])).await;
    settle().await;
    assert_eq!(m.phase(), AlertPhase::Idle);
    assert!(backend.actions().is_empty(), "calm building stays silent");

    apply(&mut store, &mut m, snapshot(&[(1, false), (2, true), (3, false)])).await;
    settle().await;

    assert_eq!(m.phase(), AlertPhase::Sounding);
    assert_eq!(backend.tone_opens(), 1);
    assert_eq!(backend.tones_open_now(), 1, "tone audible while sounding");
    assert_eq!(backend.spoken(), vec!["Warning. Fire detected on floor 2."]);

    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mute_holds_through_continuing_danger_then_clears_with_it() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(1, false), (2, true)])).await;
    settle().await;
    m.mute().await;

    assert_eq!(m.phase(), AlertPhase::Muted);
    assert_eq!(backend.tones_open_now(), 0, "mute silences the tone");
    assert!(m.danger().contains(2), "danger persists through mute");

    // The zone keeps reporting danger; membership is unchanged, so the
    // machine hears nothing and the building stays quiet.
    let before = backend.actions().len();
    apply(&mut store, &mut m, snapshot(&[(1, false), (2, true)])).await;
    settle().await;
    assert_eq!(m.phase(), AlertPhase::Muted);
    assert_eq!(backend.actions().len(), before);

    // All clear: mute dissolves along with the alarm.
    apply(&mut store, &mut m, snapshot(&[(1, false), (2, false)])).await;
    settle().await;
    assert_eq!(m.phase(), AlertPhase::Idle);
    assert!(!m.state().active);
    assert!(!m.state().muted);
}

#[tokio::test(start_paused = true)]
async fn test_next_episode_sounds_in_full_after_a_muted_one() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(1, false), (2, true)])).await;
    settle().await;
    m.mute().await;
    apply(&mut store, &mut m, snapshot(&[(1, false), (2, false)])).await;
    settle().await;

    let opens_before = backend.tone_opens();
    apply(&mut store, &mut m, snapshot(&[(1, true), (2, false)])).await;
    settle().await;

    assert_eq!(m.phase(), AlertPhase::Sounding, "old mute must not carry over");
    assert_eq!(backend.tone_opens(), opens_before + 1);
    assert_eq!(
        backend.spoken().last().map(String::as_str),
        Some("Warning. Fire detected on floor 1.")
    );

    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_spreading_fire_reannounces_without_touching_tone() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(1, false), (2, true), (3, false)])).await;
    settle().await;
    apply(&mut store, &mut m, snapshot(&[(1, true), (2, false), (3, true)])).await;
    settle().await;

    assert_eq!(m.phase(), AlertPhase::Sounding);
    assert_eq!(backend.tone_opens(), 1, "tone is zone-independent and keeps running");
    assert_eq!(backend.tones_open_now(), 1);
    assert_eq!(
        backend.spoken(),
        vec![
            "Warning. Fire detected on floor 2.",
            "Warning. Fire detected on floors 1 and 3.",
        ]
    );

    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reading_churn_without_membership_change_is_silent() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(1, false), (2, true)])).await;
    settle().await;
    let before = backend.actions().len();

    // Same membership, wilder readings, several snapshots in a row.
    for _ in 0..5 {
        let mut snap = snapshot(&[(1, false), (2, true)]);
        if let Some(r) = snap.floors.get_mut(&2) {
            r.gas += 25.0;
            r.temperature += 3.0;
        }
        apply(&mut store, &mut m, snap).await;
    }
    settle().await;

    assert_eq!(backend.actions().len(), before, "no re-announcement without membership change");
    assert_eq!(backend.spoken().len(), 1);

    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_voice_repeats_while_tone_runs_continuously() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(2, true)])).await;
    settle().await;
    assert_eq!(backend.spoken().len(), 1);

    tokio::time::advance(Duration::from_secs(15)).await;
    settle().await;
    assert_eq!(backend.spoken().len(), 2, "warning repeats on the interval");
    assert_eq!(backend.spoken()[1], "Warning. Fire detected on floor 2.");
    assert_eq!(backend.tone_opens(), 1, "repeats never touch the tone");

    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unmute_resumes_against_latest_membership() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(2, true), (3, false)])).await;
    settle().await;
    m.mute().await;

    // The fire spreads while muted.
    apply(&mut store, &mut m, snapshot(&[(2, true), (3, true)])).await;
    settle().await;
    assert_eq!(m.phase(), AlertPhase::Muted);
    assert_eq!(backend.tones_open_now(), 0);

    m.unmute().await;
    settle().await;

    assert_eq!(m.phase(), AlertPhase::Sounding);
    assert_eq!(backend.tones_open_now(), 1);
    assert_eq!(
        backend.spoken().last().map(String::as_str),
        Some("Warning. Fire detected on floors 2 and 3.")
    );

    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_no_channel_running() {
    let backend = Recorder::new();
    let mut store = ZoneStore::new();
    let mut m = machine(&backend);

    apply(&mut store, &mut m, snapshot(&[(1, true), (2, true)])).await;
    settle().await;
    assert_eq!(backend.tones_open_now(), 1);

    m.shutdown().await;
    assert_eq!(backend.tones_open_now(), 0);
    assert_eq!(m.phase(), AlertPhase::Idle);

    // No stray repeats after shutdown.
    let spoken_before = backend.spoken().len();
    tokio::time::advance(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(backend.spoken().len(), spoken_before);
}
