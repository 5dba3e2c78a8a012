//! Accept loop.
//!
//! # Responsibilities
//! - Accept clients and run one [`ProxySession`] per connection
//! - Stop accepting on shutdown, then wait for sessions to drain

use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditSink;
use crate::config::upstream::UpstreamAddrError;
use crate::config::ProxyConfig;
use crate::lifecycle::Shutdown;
use crate::net::connection::SessionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::session::{ProxySession, SessionError, SessionSettings};

/// Runs the proxy over an already-bound [`Listener`].
pub struct ProxyServer {
    settings: Arc<SessionSettings>,
    sink: Arc<dyn AuditSink>,
    tracker: SessionTracker,
    drain_timeout: Duration,
}

impl ProxyServer {
    pub fn new(config: &ProxyConfig, sink: Arc<dyn AuditSink>) -> Result<Self, UpstreamAddrError> {
        Ok(Self {
            settings: Arc::new(SessionSettings::from_config(config)?),
            sink,
            tracker: SessionTracker::new(),
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
        })
    }

    /// Live session tracker, for callers that want to observe drain.
    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Accept until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                upstream = %self.settings.upstream,
                capture = self.settings.capture.enabled,
                "Proxy accepting connections"
            );
        }

        loop {
            // Subscribe before accepting so a shutdown racing the accept
            // still reaches the new session.
            let session_shutdown = shutdown.subscribe();

            let accepted = tokio::select! {
                res = listener.accept() => res,
                _ = stop.recv() => break,
            };

            let (stream, peer, permit) = match accepted {
                Ok(conn) => conn,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let guard = self.tracker.track();
            let session = ProxySession::new(guard.id(), stream, Arc::clone(&self.settings), Arc::clone(&self.sink));

            tokio::spawn(async move {
                let _permit = permit;
                let id = guard.id();
                tracing::info!(session = %id, peer_addr = %peer, "Client connected");

                match session.run(session_shutdown).await {
                    Ok(()) => tracing::info!(session = %id, "Session closed"),
                    Err(err @ (SessionError::Connect { .. } | SessionError::ConnectTimeout { .. })) => {
                        tracing::error!(session = %id, error = %err, "Upstream unavailable, client dropped")
                    }
                    Err(err) => tracing::warn!(session = %id, error = %err, "Session ended with error"),
                }
                drop(guard);
            });
        }

        tracing::info!(active = self.tracker.active_count(), "Stopped accepting, draining sessions");
        let remaining = self.tracker.wait_for_drain(self.drain_timeout).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Drain timeout elapsed with sessions still open");
        } else {
            tracing::info!("All sessions drained");
        }
        Ok(())
    }
}
