//! Session lifecycle and byte relay.
//!
//! A session pairs exactly one WebSocket connection with exactly one shell
//! process for their common lifetime. Two independent pumps relay opaque
//! bytes: outbound (shell output to peer, one binary frame per chunk) and
//! inbound (peer frames into the shell's input, fully drained in receipt
//! order). Either endpoint failing moves the session through an explicit
//! Active -> Closing -> Terminated state machine; the session deregisters
//! only after the shell is reaped *and* the relay has wound down.

pub mod pty;
pub mod registry;

pub use pty::{ProcessHandle, ProcessStatus, PtyDimensions, SessionError};
pub use registry::{SessionEntry, SessionId, SessionRegistry};

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::ControlMessage;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle state of a session.
///
/// Transitions are strictly forward: a session is single-use, pairing one
/// connection with one process; reconnecting requires a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Both process and connection alive, relay running.
    Active,
    /// Teardown initiated from either side.
    Closing,
    /// Both resources released, session deregistered.
    Terminated,
}

type WsSink<S> = Arc<tokio::sync::Mutex<SplitSink<WebSocketStream<S>, Message>>>;

/// One connection paired with one shell process.
///
/// The session exclusively owns both resources. All teardown paths (peer
/// disconnect, process exit, relay failure, daemon shutdown) converge on
/// the tail of [`Session::run`], which reaps the process, joins the
/// outbound pump, and removes the session from the registry synchronously.
pub struct Session {
    id: SessionId,
    handle: ProcessHandle,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
    created_at: SystemTime,
    grace: Duration,
}

impl Session {
    /// Creates a session around a confirmed-spawned process handle.
    ///
    /// The caller (the acceptor) is responsible for registering the session
    /// before entering the relay; construction itself has no side effects.
    pub fn new(
        handle: ProcessHandle,
        registry: Arc<SessionRegistry>,
        grace: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            handle,
            registry,
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Active),
            created_at: SystemTime::now(),
            grace,
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the shell's process id, if available.
    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Returns the registry entry for this session.
    pub fn registry_entry(&self) -> SessionEntry {
        SessionEntry {
            pid: self.handle.pid(),
            created_at: self.created_at,
            cancel: self.cancel.clone(),
        }
    }

    /// Runs the relay until either endpoint terminates, then tears down.
    ///
    /// Consumes the session: a session is strictly single-use. On return
    /// the shell has been reaped, the connection closed, and the session
    /// removed from the registry.
    pub async fn run<S>(
        self,
        ws: WebSocketStream<S>,
        output_rx: mpsc::Receiver<Vec<u8>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!(
            session_id = %self.id,
            pid = ?self.handle.pid(),
            "Session active"
        );

        let (sink, mut stream) = ws.split();
        let sink: WsSink<S> = Arc::new(tokio::sync::Mutex::new(sink));

        let outbound = tokio::spawn(outbound_pump(
            self.id.clone(),
            Arc::clone(&sink),
            output_rx,
            self.cancel.clone(),
        ));

        self.inbound_pump(&mut stream, &sink).await;

        // Teardown. Whichever side finished first, both resources must
        // report completion before the session leaves the registry.
        self.transition(SessionState::Closing);
        self.cancel.cancel();

        match self.handle.terminate(self.grace).await {
            Ok(status) => {
                tracing::info!(
                    session_id = %self.id,
                    pid = ?self.handle.pid(),
                    %status,
                    "Shell reaped"
                );
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to reap shell");
            }
        }

        if outbound.await.is_err() {
            tracing::warn!(session_id = %self.id, "Outbound pump panicked");
        }

        // Close the connection if the peer hasn't already.
        {
            let mut sink = sink.lock().await;
            let _ = sink.close().await;
        }

        self.transition(SessionState::Terminated);
        self.registry.remove(&self.id);
        tracing::info!(session_id = %self.id, "Session terminated");
    }

    /// Relays peer frames into the shell until the connection ends, the
    /// relay is cancelled, or a write to the shell fails.
    async fn inbound_pump<S>(
        &self,
        stream: &mut SplitStream<WebSocketStream<S>>,
        sink: &WsSink<S>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = stream.next() => message,
            };

            let Some(message) = message else {
                tracing::debug!(session_id = %self.id, "Peer stream ended");
                break;
            };

            match message {
                Ok(Message::Binary(data)) => {
                    // Each inbound message is fully drained before the next
                    // one is accepted; awaiting here backpressures the
                    // socket receive loop instead of queueing unboundedly.
                    if let Err(e) = self.handle.write(&data).await {
                        tracing::debug!(
                            session_id = %self.id,
                            error = %e,
                            "Write to shell failed, tearing down"
                        );
                        break;
                    }
                }
                Ok(Message::Text(text)) => {
                    if self.handle_control(&text, sink).await {
                        break;
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let mut sink = sink.lock().await;
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Ok(Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => {
                    tracing::debug!(session_id = %self.id, "Peer closed connection");
                    break;
                }
                Err(e) => {
                    // Peer unreachable or protocol violation; absorbed,
                    // local to this session.
                    tracing::debug!(session_id = %self.id, error = %e, "Connection error");
                    break;
                }
            }
        }
    }

    /// Handles one control message. Returns `true` when the session should
    /// close. Malformed control frames are logged and ignored; they never
    /// terminate the session.
    async fn handle_control<S>(&self, text: &str, sink: &WsSink<S>) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match ControlMessage::parse(text) {
            Ok(Some(ControlMessage::Resize { cols, rows })) => {
                if let Err(e) = self.handle.resize(cols, rows) {
                    tracing::warn!(session_id = %self.id, error = %e, "Resize failed");
                }
                false
            }
            Ok(Some(ControlMessage::Ping)) => {
                let mut sink = sink.lock().await;
                let _ = sink.send(Message::Pong(Vec::new())).await;
                false
            }
            Ok(Some(ControlMessage::Close)) => {
                tracing::debug!(session_id = %self.id, "Peer requested close");
                true
            }
            Ok(None) => {
                tracing::debug!(session_id = %self.id, "Ignoring unknown control message");
                false
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Malformed control message");
                false
            }
        }
    }

    /// Advances the lifecycle state. Transitions only move forward;
    /// duplicate teardown triggers are no-ops.
    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        let allowed = matches!(
            (*state, next),
            (SessionState::Active, SessionState::Closing)
                | (SessionState::Closing, SessionState::Terminated)
        );
        if allowed {
            tracing::debug!(
                session_id = %self.id,
                from = ?*state,
                to = ?next,
                "Session state change"
            );
            *state = next;
        }
    }
}

/// Forwards every chunk of shell output to the peer, in the order
/// produced, one binary frame per chunk.
///
/// The send is awaited, so a saturated connection backpressures through
/// the bounded output channel to the PTY reader; output is never dropped.
/// When the output channel closes (process exit) the peer gets a normal
/// close frame; a failed send is absorbed and triggers teardown.
async fn outbound_pump<S>(
    session_id: SessionId,
    sink: WsSink<S>,
    mut output_rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = output_rx.recv() => chunk,
        };

        match chunk {
            Some(data) => {
                let mut sink = sink.lock().await;
                if let Err(e) = sink.send(Message::Binary(data)).await {
                    tracing::debug!(
                        session_id = %session_id,
                        error = %e,
                        "Send to peer failed, tearing down"
                    );
                    cancel.cancel();
                    break;
                }
            }
            None => {
                // Shell exited; close from this side with a normal closure.
                // The exit status is logged during teardown, never sent to
                // the peer as structured data.
                tracing::debug!(session_id = %session_id, "Shell output ended");
                let mut sink = sink.lock().await;
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "shell exited".into(),
                    })))
                    .await;
                cancel.cancel();
                break;
            }
        }
    }
}
