//! Firewatch: multi-zone fire alarm coordination.
//!
//! Connects to a building's sensor relay over WebSocket, tracks per-zone
//! danger state, and drives the audible alarm.
//!
//! ## Architecture
//!
//! - **Sensor Link**: resilient WebSocket client with fixed-delay reconnect
//! - **Zone Store**: latest readings per zone and the derived danger set
//! - **Alert Machine**: Idle/Sounding/Muted phases driving two channels
//! - **Tone Channel**: synthesized alternating two-frequency alarm tone
//! - **Voice Channel**: spoken warning naming the zones in danger
//! - **Monitor Loop**: single task serializing feed events and operator intents

// Alarm coordination modules
pub mod alert;
pub mod audio;
pub mod config;
pub mod link;
pub mod monitor;
pub mod store;
pub mod types;

// Re-export monitor configuration
pub use config::MonitorConfig;

// Re-export commonly used types
pub use types::{
    AlertState, ConnectionState, DangerSet, SensorSnapshot, ZoneId, ZoneReading, ZoneStatus,
};

// Re-export the alert machinery
pub use alert::{AlertMachine, AlertPhase, ToneChannel, VoiceChannel};

// Re-export audio backends
pub use audio::{AudioBackend, NullBackend, PcmSink, ProcessBackend};

// Re-export the feed link
pub use link::{LinkEvent, LinkStats, SensorLink};

// Re-export the monitor loop
pub use monitor::{MonitorHandle, MonitorLoop, MonitorState, MonitorStats, OperatorIntent};

// Re-export the zone store
pub use store::{SnapshotOutcome, ZoneStore};
