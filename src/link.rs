//! Sensor feed link.
//!
//! Maintains the WebSocket session to the sensor relay and turns it into
//! a stream of [`LinkEvent`]s. The link is a small explicit state machine:
//!
//! ```text
//! Start -> Dialing -> Live -> Backoff -> Dialing -> ...
//! ```
//!
//! Reconnection is a timer-driven transition, not an incidental sleep: a
//! lost session enters `Backoff` with an absolute deadline, and when the
//! deadline passes the link moves to `Dialing` and reports `Connecting`.
//! The delay is fixed and the cycle never gives up; the feed drives a
//! life-safety indicator, so there is no retry cap and no backoff growth.
//!
//! There is at most one live session at any time, by construction: the
//! socket lives inside the `Live` phase and is dropped on any exit.
//!
//! Malformed frames are counted and discarded without touching the
//! session; the caller keeps whatever state it had.

use crate::config::SourceConfig;
use crate::types::{ConnectionState, SensorSnapshot};
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One observable occurrence on the feed link.
#[derive(Debug, PartialEq)]
pub enum LinkEvent {
    /// The session lifecycle moved to a new state.
    State(ConnectionState),
    /// A well-formed snapshot arrived on the live session.
    Snapshot(SensorSnapshot),
}

/// Counters for the lifetime of the link.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LinkStats {
    pub connect_attempts: u64,
    pub snapshots_received: u64,
    pub parse_failures: u64,
    pub sessions_completed: u64,
}

enum LinkPhase {
    /// Created, nothing attempted yet.
    Start,
    /// A connect attempt is due.
    Dialing,
    /// Session established; socket owned here and only here.
    Live(Box<WsStream>),
    /// Waiting out the fixed reconnect delay.
    Backoff { until: Instant },
}

/// Pull-driven client for the sensor relay's WebSocket feed.
pub struct SensorLink {
    url: String,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    phase: LinkPhase,
    stats: LinkStats,
}

impl SensorLink {
    pub fn new(cfg: &SourceConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            reconnect_delay: Duration::from_millis(cfg.reconnect_delay_ms),
            phase: LinkPhase::Start,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Wait for the next link event.
    ///
    /// Cancel-safe: the backoff deadline is stored in the phase, so a
    /// caller that drops this future mid-wait resumes the same deadline
    /// on the next call instead of restarting the delay.
    pub async fn next_event(&mut self) -> LinkEvent {
        loop {
            match &mut self.phase {
                LinkPhase::Start => {
                    self.phase = LinkPhase::Dialing;
                    return LinkEvent::State(ConnectionState::Connecting);
                }

                LinkPhase::Dialing => {
                    self.stats.connect_attempts += 1;
                    debug!(url = %self.url, attempt = self.stats.connect_attempts, "Dialing sensor feed");

                    let attempt = tokio::time::timeout(
                        self.connect_timeout,
                        connect_async(self.url.as_str()),
                    )
                    .await;

                    match attempt {
                        Ok(Ok((ws, _response))) => {
                            info!(url = %self.url, "Sensor feed connected");
                            self.phase = LinkPhase::Live(Box::new(ws));
                            return LinkEvent::State(ConnectionState::Connected);
                        }
                        Ok(Err(e)) => {
                            warn!(
                                url = %self.url,
                                error = %e,
                                retry_ms = self.reconnect_delay.as_millis() as u64,
                                "Sensor feed connect failed — retrying"
                            );
                            self.enter_backoff();
                            return LinkEvent::State(ConnectionState::Disconnected);
                        }
                        Err(_) => {
                            warn!(
                                url = %self.url,
                                timeout_secs = self.connect_timeout.as_secs(),
                                retry_ms = self.reconnect_delay.as_millis() as u64,
                                "Sensor feed connect timed out — retrying"
                            );
                            self.enter_backoff();
                            return LinkEvent::State(ConnectionState::Disconnected);
                        }
                    }
                }

                LinkPhase::Live(ws) => match ws.next().await {
                    Some(Ok(Message::Text(text))) => match SensorSnapshot::parse(&text) {
                        Ok(snapshot) => {
                            self.stats.snapshots_received += 1;
                            return LinkEvent::Snapshot(snapshot);
                        }
                        Err(e) => {
                            // Bad frame, healthy session. Drop the frame,
                            // keep listening.
                            self.stats.parse_failures += 1;
                            warn!(error = %e, len = text.len(), "Discarding malformed feed message");
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "Ignoring binary feed message");
                    }
                    Some(Ok(Message::Frame(_))) => {
                        // Raw frames are not surfaced by the read API
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.stats.sessions_completed += 1;
                        warn!(
                            url = %self.url,
                            retry_ms = self.reconnect_delay.as_millis() as u64,
                            "Sensor feed session ended — reconnecting"
                        );
                        self.enter_backoff();
                        return LinkEvent::State(ConnectionState::Disconnected);
                    }
                    Some(Err(e)) => {
                        self.stats.sessions_completed += 1;
                        warn!(
                            url = %self.url,
                            error = %e,
                            retry_ms = self.reconnect_delay.as_millis() as u64,
                            "Sensor feed session failed — reconnecting"
                        );
                        self.enter_backoff();
                        return LinkEvent::State(ConnectionState::Disconnected);
                    }
                },

                LinkPhase::Backoff { until } => {
                    let deadline = *until;
                    tokio::time::sleep_until(deadline).await;
                    self.phase = LinkPhase::Dialing;
                    return LinkEvent::State(ConnectionState::Connecting);
                }
            }
        }
    }

    /// Close any live session gracefully. Used at shutdown.
    pub async fn close(&mut self) {
        if let LinkPhase::Live(ws) = &mut self.phase {
            let _ = ws.close(None).await;
        }
        self.phase = LinkPhase::Start;
    }

    fn enter_backoff(&mut self) {
        self.phase = LinkPhase::Backoff {
            until: Instant::now() + self.reconnect_delay,
        };
    }
}

// ============================================================================
// Tests
// ============================================================================
