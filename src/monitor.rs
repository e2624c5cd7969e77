//! Monitor event loop.
//!
//! One task owns everything with alarm-relevant state: the sensor link,
//! the zone store, and the alert machine. Feed events and operator
//! commands are serialized through a single `select!` loop, so there are
//! no locks around alarm decisions and every danger change is fully
//! handled (channels started or stopped) before the next event is looked
//! at.
//!
//! Everything observable from outside goes through [`MonitorHandle`]:
//! a snapshot getter and a watch subscription for state, and an intent
//! channel for mute/unmute. The loop publishes a fresh [`MonitorState`]
//! after every event it absorbs.

use crate::alert::AlertMachine;
use crate::audio::AudioBackend;
use crate::config::MonitorConfig;
use crate::link::{LinkEvent, LinkStats, SensorLink};
use crate::store::{SnapshotOutcome, ZoneStore};
use crate::types::{AlertState, ConnectionState, DangerSet, ZoneId, ZoneReading};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Operator command for the audible alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorIntent {
    Mute,
    Unmute,
}

/// Full externally visible state of the monitor.
///
/// Published after every absorbed event; cheap to clone and serialize.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MonitorState {
    pub connection: ConnectionState,
    pub zones: BTreeMap<ZoneId, ZoneReading>,
    pub danger: DangerSet,
    pub alert: AlertState,
    pub link: LinkStats,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

/// Lifetime counters, returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MonitorStats {
    pub snapshots_applied: u64,
    pub danger_changes: u64,
    pub intents_handled: u64,
    pub link: LinkStats,
}

/// Cloneable access point for everything outside the loop.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<RwLock<MonitorState>>,
    intents: mpsc::Sender<OperatorIntent>,
    state_rx: watch::Receiver<MonitorState>,
}

impl MonitorHandle {
    /// Current monitor state.
    pub async fn state(&self) -> MonitorState {
        self.shared.read().await.clone()
    }

    /// Subscribe to state updates.
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state_rx.clone()
    }

    /// Request that the current alarm episode be silenced.
    pub async fn mute(&self) {
        if self.intents.send(OperatorIntent::Mute).await.is_err() {
            warn!("Monitor loop gone — mute dropped");
        }
    }

    /// Request that a muted alarm resume sounding.
    pub async fn unmute(&self) {
        if self.intents.send(OperatorIntent::Unmute).await.is_err() {
            warn!("Monitor loop gone — unmute dropped");
        }
    }
}

/// The event loop itself. Construct with [`MonitorLoop::new`], then call
/// [`run`](MonitorLoop::run) exactly once.
pub struct MonitorLoop {
    link: SensorLink,
    store: ZoneStore,
    machine: AlertMachine,
    connection: ConnectionState,
    last_snapshot_at: Option<DateTime<Utc>>,
    stats: MonitorStats,
    shared: Arc<RwLock<MonitorState>>,
    state_tx: watch::Sender<MonitorState>,
    intents_rx: mpsc::Receiver<OperatorIntent>,
    cancel: CancellationToken,
}

impl MonitorLoop {
    pub fn new(
        cfg: &MonitorConfig,
        backend: Arc<dyn AudioBackend>,
        cancel: CancellationToken,
    ) -> (Self, MonitorHandle) {
        let (intents_tx, intents_rx) = mpsc::channel(8);
        let shared = Arc::new(RwLock::new(MonitorState::default()));
        let (state_tx, state_rx) = watch::channel(MonitorState::default());

        let monitor = Self {
            link: SensorLink::new(&cfg.source),
            store: ZoneStore::new(),
            machine: AlertMachine::new(backend, &cfg.tone, &cfg.voice),
            connection: ConnectionState::Disconnected,
            last_snapshot_at: None,
            stats: MonitorStats::default(),
            shared: Arc::clone(&shared),
            state_tx,
            intents_rx,
            cancel,
        };

        let handle = MonitorHandle {
            shared,
            intents: intents_tx,
            state_rx,
        };

        (monitor, handle)
    }

    /// Run until cancelled. Consumes the loop; returns lifetime counters.
    pub async fn run(mut self) -> MonitorStats {
        info!("Monitor loop started");
        let mut intents_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,

                event = self.link.next_event() => {
                    self.handle_link_event(event).await;
                }

                intent = self.intents_rx.recv(), if intents_open => {
                    match intent {
                        Some(intent) => self.handle_intent(intent).await,
                        // All handles dropped. Keep monitoring; there is
                        // just no one left to mute the alarm.
                        None => intents_open = false,
                    }
                }
            }
        }

        // Silence first, then drop the feed.
        self.machine.shutdown().await;
        self.link.close().await;
        self.connection = ConnectionState::Disconnected;
        self.stats.link = self.link.stats();
        self.publish().await;

        info!(
            snapshots = self.stats.snapshots_applied,
            danger_changes = self.stats.danger_changes,
            intents = self.stats.intents_handled,
            "Monitor loop stopped"
        );
        self.stats
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::State(state) => {
                debug!(state = %state, "Feed connection state changed");
                self.connection = state;
            }
            LinkEvent::Snapshot(snapshot) => {
                self.stats.snapshots_applied += 1;
                if let SnapshotOutcome::Changed(danger) = self.store.apply_snapshot(snapshot) {
                    self.stats.danger_changes += 1;
                    self.machine.on_danger_change(danger).await;
                }
                self.last_snapshot_at = Some(Utc::now());
            }
        }
        self.stats.link = self.link.stats();
        self.publish().await;
    }

    async fn handle_intent(&mut self, intent: OperatorIntent) {
        self.stats.intents_handled += 1;
        match intent {
            OperatorIntent::Mute => self.machine.mute().await,
            OperatorIntent::Unmute => self.machine.unmute().await,
        }
        self.publish().await;
    }

    async fn publish(&self) {
        let state = MonitorState {
            connection: self.connection,
            zones: self.store.zones().clone(),
            danger: self.store.danger().clone(),
            alert: self.machine.state(),
            link: self.stats.link,
            last_snapshot_at: self.last_snapshot_at,
        };
        *self.shared.write().await = state.clone();
        self.state_tx.send_replace(state);
    }
}

// ============================================================================
// Tests
// ============================================================================
