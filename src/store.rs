//! Zone state store.
//!
//! Holds the latest reading for every monitored zone and the danger set
//! derived from those readings. Each inbound snapshot replaces the whole
//! zone map; there is no per-zone merging and no history.
//!
//! The store is the single point that decides whether an update matters
//! to the alarm: it re-derives danger membership on every snapshot and
//! reports a change only when membership actually differs. Readings that
//! fluctuate without changing membership are absorbed silently, so the
//! alert machine never sees churn.

use crate::types::{DangerSet, SensorSnapshot, ZoneId, ZoneReading};
use std::collections::BTreeMap;
use tracing::warn;

/// Result of applying one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Danger membership changed; carries the new set.
    Changed(DangerSet),
    /// Zone readings were replaced but danger membership is identical.
    Unchanged,
}

/// Latest zone readings plus the derived danger set.
#[derive(Debug, Default)]
pub struct ZoneStore {
    zones: BTreeMap<ZoneId, ZoneReading>,
    danger: DangerSet,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest reading per zone, ascending by zone id.
    pub fn zones(&self) -> &BTreeMap<ZoneId, ZoneReading> {
        &self.zones
    }

    /// Zones currently in danger.
    pub fn danger(&self) -> &DangerSet {
        &self.danger
    }

    /// Replace all zone state with `snapshot`.
    ///
    /// The danger set is derived from the per-zone `status` fields. The
    /// snapshot's own `dangerFloors` list is only cross-checked: if the
    /// two disagree the statuses win, since they are what the rest of the
    /// payload describes.
    pub fn apply_snapshot(&mut self, snapshot: SensorSnapshot) -> SnapshotOutcome {
        let derived = DangerSet::from_snapshot(&snapshot);
        if !derived.matches_list(&snapshot.danger_floors) {
            warn!(
                derived = %derived,
                advertised = ?snapshot.danger_floors,
                "Feed dangerFloors disagrees with zone statuses — statuses win"
            );
        }

        self.zones = snapshot.floors;

        if derived == self.danger {
            SnapshotOutcome::Unchanged
        } else {
            self.danger = derived.clone();
            SnapshotOutcome::Changed(derived)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
