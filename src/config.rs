//! Monitor configuration loaded from TOML files.
//!
//! Every tunable lives here so a deployment can be adjusted without a
//! rebuild. Each struct implements `Default` with values matching the
//! deployed sensor relay, so behavior is unchanged when no file is present.
//!
//! ## Loading Order
//!
//! 1. `FIREWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `firewatch.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(MonitorConfig::load());
//!
//! // Anywhere in the codebase:
//! let delay = config::get().source.reconnect_delay_ms;
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Global monitor configuration, initialized once at startup.
static MONITOR_CONFIG: OnceLock<MonitorConfig> = OnceLock::new();

/// Initialize the global monitor configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: MonitorConfig) {
    if MONITOR_CONFIG.set(config).is_err() {
        warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global monitor configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static MonitorConfig {
    MONITOR_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    MONITOR_CONFIG.get().is_some()
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a firewatch deployment.
///
/// Load with `MonitorConfig::load()` which searches:
/// 1. `$FIREWATCH_CONFIG` env var
/// 2. `./firewatch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitorConfig {
    /// Sensor feed endpoint and reconnect policy
    #[serde(default)]
    pub source: SourceConfig,

    /// Alarm tone synthesis parameters
    #[serde(default)]
    pub tone: ToneConfig,

    /// Spoken warning parameters
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl MonitorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$FIREWATCH_CONFIG` environment variable
    /// 2. `./firewatch.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var("FIREWATCH_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), url = %config.source.url, "Loaded config from FIREWATCH_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from FIREWATCH_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "FIREWATCH_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./firewatch.toml
        let local = PathBuf::from("firewatch.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(url = %config.source.url, "Loaded config from ./firewatch.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./firewatch.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No firewatch.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all settings for internal consistency.
    ///
    /// Rules:
    /// - The feed URL must be a non-empty ws:// or wss:// address
    /// - All timings must be positive
    /// - Tone frequencies must be finite and positive
    /// - Volume must be within (0, 1]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let s = &self.source;
        if !(s.url.starts_with("ws://") || s.url.starts_with("wss://")) {
            errors.push(format!(
                "source.url must be a ws:// or wss:// address, got {:?}",
                s.url
            ));
        }
        if s.connect_timeout_secs == 0 {
            errors.push("source.connect_timeout_secs must be > 0".to_string());
        }
        if s.reconnect_delay_ms == 0 {
            errors.push("source.reconnect_delay_ms must be > 0".to_string());
        }

        let t = &self.tone;
        for (name, hz) in [("tone.low_hz", t.low_hz), ("tone.high_hz", t.high_hz)] {
            if !hz.is_finite() || hz <= 0.0 {
                errors.push(format!("{name} must be a positive finite frequency, got {hz}"));
            }
        }
        if t.cadence_ms == 0 {
            errors.push("tone.cadence_ms must be > 0".to_string());
        }
        if !t.volume.is_finite() || t.volume <= 0.0 || t.volume > 1.0 {
            errors.push(format!("tone.volume must be within (0, 1], got {}", t.volume));
        }

        if self.voice.repeat_secs == 0 {
            errors.push("voice.repeat_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Source Config
// ============================================================================

/// Sensor feed endpoint and reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// WebSocket endpoint of the sensor relay.
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Per-attempt connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Fixed delay between a disconnect and the next connect attempt (ms).
    /// There is deliberately no retry cap and no backoff: the feed drives
    /// a life-safety indicator and the link never gives up.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_source_url() -> String {
    "ws://127.0.0.1:8000/ws/sensors".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_reconnect_delay() -> u64 {
    2000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

// ============================================================================
// Tone Config
// ============================================================================

/// Alarm tone synthesis parameters.
///
/// The tone alternates between two frequencies on a fixed cadence, which
/// gives it its siren character without any audio sample assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneConfig {
    /// Lower alternation frequency (Hz).
    #[serde(default = "default_tone_low")]
    pub low_hz: f64,

    /// Upper alternation frequency (Hz).
    #[serde(default = "default_tone_high")]
    pub high_hz: f64,

    /// How long each frequency is held before switching (ms).
    #[serde(default = "default_tone_cadence")]
    pub cadence_ms: u64,

    /// Linear output gain, within (0, 1].
    #[serde(default = "default_tone_volume")]
    pub volume: f64,
}

fn default_tone_low() -> f64 {
    800.0
}
fn default_tone_high() -> f64 {
    1000.0
}
fn default_tone_cadence() -> u64 {
    300
}
fn default_tone_volume() -> f64 {
    0.2
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            low_hz: default_tone_low(),
            high_hz: default_tone_high(),
            cadence_ms: default_tone_cadence(),
            volume: default_tone_volume(),
        }
    }
}

// ============================================================================
// Voice Config
// ============================================================================

/// Spoken warning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Interval between repeats of the spoken warning (seconds).
    /// The first utterance is spoken immediately on alert start.
    #[serde(default = "default_voice_repeat")]
    pub repeat_secs: u64,
}

fn default_voice_repeat() -> u64 {
    15
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            repeat_secs: default_voice_repeat(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
