//! Audio output backends.
//!
//! The alert channels never talk to sound hardware directly. They go
//! through [`AudioBackend`], which has two production-relevant jobs:
//! streaming raw PCM for the alarm tone, and speaking a text warning.
//!
//! [`ProcessBackend`] implements both by spawning whichever standard
//! command-line tools are installed (`aplay`/`paplay`/`play` for PCM,
//! `espeak-ng`/`espeak`/`spd-say`/`say` for speech). Piping to a child
//! process keeps the monitor free of audio-stack linkage and works the
//! same on a headless panel PC as on a desktop. [`NullBackend`] discards
//! everything and exists for `--no-audio` runs and for tests that only
//! care about state transitions.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors surfaced by audio backends.
///
/// These are reported and degrade the alert to silence; they never stop
/// the monitor itself.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no PCM player found on PATH (tried: {0})")]
    NoPlayer(String),

    #[error("no speech program found on PATH (tried: {0})")]
    NoSpeaker(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("audio pipe error: {0}")]
    Io(#[from] io::Error),
}

/// Sink for a stream of raw PCM blocks.
///
/// Obtained from [`AudioBackend::open_pcm`]. The stream is signed 16-bit
/// little-endian mono at the sample rate passed to `open_pcm`.
#[async_trait]
pub trait PcmSink: Send {
    /// Write one block of samples. Blocks until the sink accepts it.
    async fn write(&mut self, block: &[u8]) -> Result<(), AudioError>;

    /// Tear the sink down without draining buffered audio. An alarm that
    /// has been silenced must go quiet now, not after the buffer empties.
    async fn close(self: Box<Self>);
}

/// Abstraction over the machine's audio output.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Open a PCM sink for s16le mono samples at `sample_rate` Hz.
    async fn open_pcm(&self, sample_rate: u32) -> Result<Box<dyn PcmSink>, AudioError>;

    /// Speak `text` aloud, returning once the utterance finishes or
    /// `cancel` fires. Cancellation must silence the speech promptly.
    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<(), AudioError>;
}

// ============================================================================
// Process-Spawning Backend
// ============================================================================

/// PCM players probed in order. Each entry is the program name plus the
/// arguments that make it read s16le mono from stdin; `{rate}` is
/// substituted with the sample rate.
const PLAYER_CANDIDATES: &[(&str, &[&str])] = &[
    ("aplay", &["-q", "-f", "S16_LE", "-r", "{rate}", "-c", "1", "-t", "raw", "-"]),
    ("paplay", &["--raw", "--format=s16le", "--rate={rate}", "--channels=1"]),
    ("play", &["-q", "-t", "raw", "-e", "signed", "-b", "16", "-c", "1", "-r", "{rate}", "-"]),
];

/// Speech programs probed in order. All of them take the utterance as a
/// single trailing argument.
const SPEAKER_CANDIDATES: &[&str] = &["espeak-ng", "espeak", "spd-say", "say"];

/// Audio backend that pipes output to standard command-line tools.
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> Self {
        Self
    }

    /// Locate the first available PCM player, with `{rate}` substituted.
    fn find_player(sample_rate: u32) -> Result<(PathBuf, Vec<String>), AudioError> {
        let rate = sample_rate.to_string();
        for (program, args) in PLAYER_CANDIDATES {
            if let Some(path) = find_on_path(program) {
                let args = args.iter().map(|a| a.replace("{rate}", &rate)).collect();
                return Ok((path, args));
            }
        }
        let tried = PLAYER_CANDIDATES
            .iter()
            .map(|(p, _)| *p)
            .collect::<Vec<_>>()
            .join(", ");
        Err(AudioError::NoPlayer(tried))
    }

    fn find_speaker() -> Result<PathBuf, AudioError> {
        for program in SPEAKER_CANDIDATES {
            if let Some(path) = find_on_path(program) {
                return Ok(path);
            }
        }
        Err(AudioError::NoSpeaker(SPEAKER_CANDIDATES.join(", ")))
    }
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioBackend for ProcessBackend {
    async fn open_pcm(&self, sample_rate: u32) -> Result<Box<dyn PcmSink>, AudioError> {
        let (program, args) = Self::find_player(sample_rate)?;
        debug!(program = %program.display(), "Starting PCM player");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AudioError::Spawn {
                program: program.display().to_string(),
                source: e,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AudioError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "player stdin unavailable"))
        })?;

        Ok(Box::new(ProcessSink { child, stdin }))
    }

    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<(), AudioError> {
        let program = Self::find_speaker()?;
        debug!(program = %program.display(), "Speaking warning");

        let mut child = Command::new(&program)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AudioError::Spawn {
                program: program.display().to_string(),
                source: e,
            })?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if !status.success() {
                    warn!(program = %program.display(), %status, "Speech program exited abnormally");
                }
                Ok(())
            }
            () = cancel.cancelled() => {
                // Silenced mid-utterance. Kill rather than wait out the sentence.
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(())
            }
        }
    }
}

/// PCM sink backed by a player child process.
struct ProcessSink {
    child: Child,
    stdin: ChildStdin,
}

#[async_trait]
impl PcmSink for ProcessSink {
    async fn write(&mut self, block: &[u8]) -> Result<(), AudioError> {
        self.stdin.write_all(block).await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) {
        // Killing discards the player's buffered audio, which is what
        // "stop the tone now" means.
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Search PATH for an executable, like the shell would.
fn find_on_path(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    find_in_dirs(program, std::env::split_paths(&path_var))
}

fn find_in_dirs(program: &str, dirs: impl Iterator<Item = PathBuf>) -> Option<PathBuf> {
    for dir in dirs {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ============================================================================
// Null Backend
// ============================================================================

/// Backend that discards all output. Used for `--no-audio` runs and in
/// tests that exercise alert state without sound.
pub struct NullBackend;

#[async_trait]
impl AudioBackend for NullBackend {
    async fn open_pcm(&self, _sample_rate: u32) -> Result<Box<dyn PcmSink>, AudioError> {
        Ok(Box::new(NullSink))
    }

    async fn speak(&self, _text: &str, _cancel: &CancellationToken) -> Result<(), AudioError> {
        Ok(())
    }
}

struct NullSink;

#[async_trait]
impl PcmSink for NullSink {
    async fn write(&mut self, _block: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }

    async fn close(self: Box<Self>) {}
}

// ============================================================================
// Test Support
// ============================================================================
