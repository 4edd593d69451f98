//! WebSocket connection acceptor.
//!
//! Binds the configured TCP address and turns each accepted connection into
//! a session: validate the upgrade path, enforce the session cap, spawn the
//! shell, register, then hand off to the session relay. Acceptance is
//! non-blocking; a session in teardown never delays a new connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::session::{ProcessHandle, Session, SessionRegistry};

/// The WebSocket listener and its session registry.
pub struct BridgeServer {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    listener: TcpListener,
}

impl BridgeServer {
    /// Binds the listener at the configured address.
    pub async fn bind(config: Config) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.listen)
            .await
            .with_context(|| format!("Failed to bind {}", config.server.listen))?;

        tracing::info!(
            addr = %listener.local_addr()?,
            endpoint = %config.server.endpoint,
            "Listening for WebSocket connections"
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            listener,
        })
    }

    /// Returns the bound socket address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Each connection is handled on its own task; a failed or slow
    /// session never affects the accept loop or any other session.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    tracing::debug!(%peer, "Accepted TCP connection");
                    let config = Arc::clone(&self.config);
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        handle_connection(socket, peer, config, registry).await;
                    });
                }
                Err(e) => {
                    // Transient accept errors (EMFILE and friends) must not
                    // take the listener down.
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            }
        }

        tracing::info!("Accept loop stopped");
    }
}

/// Upgrades one TCP connection and runs its session to completion.
async fn handle_connection(
    socket: TcpStream,
    peer: std::net::SocketAddr,
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
) {
    let endpoint = config.server.endpoint.clone();

    let callback = move |req: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
        let path = req.uri().path();
        if path == endpoint {
            Ok(response)
        } else {
            tracing::debug!(%path, "Rejected upgrade on unknown path");
            let mut resp = ErrorResponse::new(Some("Not Found".to_string()));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Err(resp)
        }
    };

    let mut ws = match tokio_tungstenite::accept_hdr_async(socket, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    // Session cap. Checked after the upgrade so the peer gets a proper
    // close frame rather than a dropped socket.
    let max = config.server.max_sessions;
    if max > 0 && registry.count() >= max {
        tracing::warn!(%peer, max_sessions = max, "Session limit reached, rejecting");
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Again,
                reason: "session limit reached".into(),
            }))
            .await;
        return;
    }

    // Confirmed spawn comes before registration; a session that failed to
    // spawn is never observable in the registry.
    let (handle, output_rx) = match ProcessHandle::spawn(&config.session) {
        Ok(spawned) => spawned,
        Err(e) => {
            tracing::error!(%peer, error = %e, "Failed to spawn shell for connection");
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Error,
                    reason: "shell spawn failed".into(),
                }))
                .await;
            return;
        }
    };

    let session = Session::new(handle, Arc::clone(&registry), config.grace_period());
    tracing::info!(
        %peer,
        session_id = %session.id(),
        pid = ?session.pid(),
        "Session created"
    );

    registry.insert(session.id().clone(), session.registry_entry());
    session.run(ws, output_rx).await;
}
