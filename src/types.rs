//! Core domain types: zone readings, the wire snapshot, and derived state.
//!
//! The wire payload mirrors the upstream sensor relay exactly: a `floors`
//! object keyed by zone id with per-zone readings, plus a precomputed
//! `dangerFloors` list. Zone ids are small integers; JSON object keys are
//! their usual stringified form.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable identifier for one monitored zone (a floor).
pub type ZoneId = u16;

// ============================================================================
// Zone Reading (wire format)
// ============================================================================

/// Upstream verdict for a single zone.
///
/// The source judges threshold breaches; this client trusts the field and
/// never recomputes danger from `temperature`/`gas` locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum ZoneStatus {
    #[default]
    Safe,
    Danger,
}

impl ZoneStatus {
    /// Short code for logging.
    pub fn short_code(&self) -> &'static str {
        match self {
            ZoneStatus::Safe => "SAFE",
            ZoneStatus::Danger => "DANGER",
        }
    }
}

impl std::fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneStatus::Safe => write!(f, "Safe"),
            ZoneStatus::Danger => write!(f, "Danger"),
        }
    }
}

/// Latest sensor reading for one zone. Replaced wholesale on every
/// snapshot; never partially merged, no history kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneReading {
    /// Upstream danger verdict for this zone.
    pub status: ZoneStatus,

    /// Temperature in degrees Celsius.
    pub temperature: f64,

    /// Gas concentration (PPM-like sensor unit).
    pub gas: f64,

    /// Gas level at which the source flips the zone to `Danger`.
    pub threshold: f64,
}

impl ZoneReading {
    pub fn is_danger(&self) -> bool {
        self.status == ZoneStatus::Danger
    }
}

// ============================================================================
// Sensor Snapshot (inbound live-update message)
// ============================================================================

/// One full inbound update: the complete zone map plus the source's own
/// danger list. A snapshot always carries every monitored zone; a zone
/// missing from `floors` is no longer monitored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    /// Latest reading per zone, ascending by zone id.
    pub floors: BTreeMap<ZoneId, ZoneReading>,

    /// Zones the source reports as in danger. Cross-checked against the
    /// per-zone `status` fields on apply; the statuses are authoritative.
    pub danger_floors: Vec<ZoneId>,
}

impl SensorSnapshot {
    /// Parse a raw text frame into a snapshot.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ============================================================================
// Danger Set (derived)
// ============================================================================

/// The set of zones currently in danger, ascending by zone id.
///
/// Derived deterministically from the latest snapshot's `status` fields.
/// Ascending order keeps display and spoken-warning text stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DangerSet(BTreeSet<ZoneId>);

impl DangerSet {
    /// Derive the danger set from a snapshot's per-zone statuses.
    pub fn from_snapshot(snapshot: &SensorSnapshot) -> Self {
        snapshot
            .floors
            .iter()
            .filter(|(_, reading)| reading.is_danger())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        self.0.contains(&zone)
    }

    /// Zone ids in ascending order.
    pub fn zones(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.0.iter().copied()
    }

    /// Membership equality against a wire-format zone list.
    pub fn matches_list(&self, zones: &[ZoneId]) -> bool {
        self.0.len() == zones.len() && zones.iter().all(|z| self.0.contains(z))
    }
}

impl FromIterator<ZoneId> for DangerSet {
    fn from_iter<I: IntoIterator<Item = ZoneId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for DangerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for zone in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{zone}")?;
            first = false;
        }
        Ok(())
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Lifecycle of the live-update channel. Owned by the sensor link;
/// transitions are inert to alarm logic (a disconnect alone never
/// silences an already-sounding alarm).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// ============================================================================
// Alert State (observable)
// ============================================================================

/// Observable alert condition: `active` iff any zone is in danger,
/// `muted` iff an operator silenced the current episode. The audible
/// channels run iff `active && !muted`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AlertState {
    pub active: bool,
    pub muted: bool,
}

// ============================================================================
// Tests
// ============================================================================
