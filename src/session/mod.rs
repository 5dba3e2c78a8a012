//! Proxy session subsystem.
//!
//! # Data Flow
//! ```text
//! accepted client socket
//!     → Connecting (dial upstream, with timeout)
//!     → Proxying
//!         client → upstream: pump + RequestInspector  (record writes)
//!         upstream → client: pump + ResponseInspector (match, emit audit)
//!     → Closing (either side ended, failed, or shutdown requested)
//!     → Closed (both sockets released, pending table discarded)
//! ```
//!
//! # Design Decisions
//! - Bytes are forwarded unmodified; inspection only observes
//! - Each session owns its correlation table; nothing is shared across sessions
//! - The first direction to finish ends the session and aborts the other

pub mod inspect;
pub mod pump;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::audit::AuditSink;
use crate::config::upstream::UpstreamAddrError;
use crate::config::{CaptureConfig, CorrelationConfig, ProxyConfig, UpstreamAddr};
use crate::correlation::{CorrelationTable, SharedCorrelationTable};
use crate::net::connection::SessionId;
use crate::observability::metrics;
use crate::wire::FramingError;

use inspect::{Inspector, Passthrough, RequestInspector, ResponseInspector};
use pump::pump;

/// Which way bytes are flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client_to_upstream",
            Direction::UpstreamToClient => "upstream_to_client",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Dialing the upstream server.
    Connecting,
    /// Both sockets open, bytes flowing.
    Proxying,
    /// Tearing down both sockets.
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Proxying => "proxying",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to upstream {upstream}: {source}")]
    Connect {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout:?} connecting to upstream {upstream}")]
    ConnectTimeout { upstream: String, timeout: Duration },

    #[error("read failed ({direction}): {source}")]
    Read {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed ({direction}): {source}")]
    Write {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("framing error ({direction}): {source}")]
    Framing {
        direction: Direction,
        #[source]
        source: FramingError,
    },

    #[error("forwarding task failed: {0}")]
    Task(String),
}

/// Everything a session needs from the configuration, resolved once.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub upstream: UpstreamAddr,
    pub connect_timeout: Duration,
    pub capture: CaptureConfig,
    pub correlation: CorrelationConfig,
}

impl SessionSettings {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, UpstreamAddrError> {
        Ok(Self {
            upstream: UpstreamAddr::parse(&config.upstream.uri)?,
            connect_timeout: Duration::from_secs(config.upstream.connect_timeout_secs),
            capture: config.capture.clone(),
            correlation: config.correlation.clone(),
        })
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.correlation.sweep_interval_secs.max(1))
    }
}

enum Ended {
    Direction(Direction, Result<u64, SessionError>),
    Shutdown,
}

/// One client connection paired with one upstream connection.
pub struct ProxySession {
    id: SessionId,
    client: Option<TcpStream>,
    settings: Arc<SessionSettings>,
    sink: Arc<dyn AuditSink>,
    state: SessionState,
}

impl ProxySession {
    pub fn new(
        id: SessionId,
        client: TcpStream,
        settings: Arc<SessionSettings>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            id,
            client: Some(client),
            settings,
            sink,
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "Session state change");
        self.state = next;
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok` when either side closed cleanly or shutdown was
    /// requested. Both sockets are closed by the time this returns.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), SessionError> {
        let Some(client) = self.client.take() else {
            self.transition(SessionState::Closed);
            return Ok(());
        };

        let upstream = match connect_upstream(&self.settings).await {
            Ok(stream) => stream,
            Err(err) => {
                metrics::record_upstream_connect_failure();
                self.transition(SessionState::Closing);
                drop(client);
                self.transition(SessionState::Closed);
                return Err(err);
            }
        };
        let _ = client.set_nodelay(true);
        self.transition(SessionState::Proxying);

        let id = self.id;
        let table = SharedCorrelationTable::new(CorrelationTable::from_config(&self.settings.correlation));
        let (inbound, outbound) = self.inspectors(&table);
        let read_buffer = self.settings.capture.read_buffer_bytes;

        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        let mut to_upstream = tokio::spawn(pump(
            client_read,
            upstream_write,
            inbound,
            Direction::ClientToUpstream,
            id,
            read_buffer,
        ));
        let mut to_client = tokio::spawn(pump(
            upstream_read,
            client_write,
            outbound,
            Direction::UpstreamToClient,
            id,
            read_buffer,
        ));

        let mut sweep = tokio::time::interval(self.settings.sweep_interval());
        sweep.tick().await;

        let ended = loop {
            tokio::select! {
                res = &mut to_upstream => break Ended::Direction(Direction::ClientToUpstream, flatten(res)),
                res = &mut to_client => break Ended::Direction(Direction::UpstreamToClient, flatten(res)),
                _ = shutdown.recv() => break Ended::Shutdown,
                _ = sweep.tick() => {
                    let evicted = table.sweep();
                    if evicted > 0 {
                        tracing::debug!(session = %id, evicted, "Dropped stale pending requests");
                    }
                }
            }
        };

        self.transition(SessionState::Closing);

        // Aborting drops the remaining halves, which closes both sockets.
        to_upstream.abort();
        to_client.abort();
        let _ = to_upstream.await;
        let _ = to_client.await;

        let discarded = table.len();
        if discarded > 0 {
            tracing::debug!(session = %id, discarded, "Discarded unanswered requests");
        }
        self.transition(SessionState::Closed);

        match ended {
            Ended::Shutdown => {
                tracing::debug!(session = %id, "Session closed for shutdown");
                Ok(())
            }
            Ended::Direction(direction, Ok(forwarded)) => {
                tracing::debug!(session = %id, direction = %direction, forwarded, "Peer closed");
                Ok(())
            }
            Ended::Direction(_, Err(err)) => Err(err),
        }
    }

    fn inspectors(&self, table: &SharedCorrelationTable) -> (Box<dyn Inspector>, Box<dyn Inspector>) {
        if !self.settings.capture.enabled {
            return (Box::new(Passthrough), Box::new(Passthrough));
        }

        let max = self.settings.capture.max_message_bytes;
        (
            Box::new(RequestInspector::new(self.id, max, table.clone())),
            Box::new(ResponseInspector::new(self.id, max, table.clone(), Arc::clone(&self.sink))),
        )
    }
}

async fn connect_upstream(settings: &SessionSettings) -> Result<TcpStream, SessionError> {
    let upstream = &settings.upstream;
    let connect = TcpStream::connect((upstream.host.as_str(), upstream.port));

    match tokio::time::timeout(settings.connect_timeout, connect).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(source)) => Err(SessionError::Connect {
            upstream: upstream.to_string(),
            source,
        }),
        Err(_) => Err(SessionError::ConnectTimeout {
            upstream: upstream.to_string(),
            timeout: settings.connect_timeout,
        }),
    }
}

fn flatten(res: Result<Result<u64, SessionError>, tokio::task::JoinError>) -> Result<u64, SessionError> {
    res.map_err(|e| SessionError::Task(e.to_string()))?
}
