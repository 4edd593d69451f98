//! Process-wide session registry.
//!
//! The registry maps session identifiers to lifecycle bookkeeping entries.
//! It exists only for accounting: counting active sessions and cancelling
//! all of them on daemon shutdown. Sessions never communicate through it.

use std::time::SystemTime;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a session.
pub type SessionId = String;

/// Lifecycle bookkeeping for one registered session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// OS process id of the session's shell, for diagnostics.
    pub pid: Option<u32>,

    /// When the session was accepted, for diagnostics.
    pub created_at: SystemTime,

    /// Cancels the session's relay pumps and triggers its teardown.
    pub cancel: CancellationToken,
}

/// Thread-safe registry of active sessions.
///
/// Entries are inserted only after a confirmed shell spawn and removed
/// synchronously when the session reaches its terminal state; a terminated
/// session is never left behind for later collection.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a session.
    pub fn insert(&self, id: SessionId, entry: SessionEntry) {
        tracing::debug!(session_id = %id, pid = ?entry.pid, "Registered session");
        self.sessions.insert(id, entry);
    }

    /// Removes a session, returning its entry if it was registered.
    pub fn remove(&self, id: &str) -> Option<SessionEntry> {
        let removed = self.sessions.remove(id).map(|(_, entry)| entry);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "Deregistered session");
        }
        removed
    }

    /// Returns whether a session is currently registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of active sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Cancels every registered session, returning how many were signalled.
    ///
    /// Used for forced shutdown on daemon exit; each session then runs its
    /// own teardown (terminate the shell, close the connection, deregister).
    pub fn shutdown_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            tracing::info!(sessions = cancelled, "Cancelled all active sessions");
        }
        cancelled
    }

    /// Waits until every session has deregistered itself, or the timeout
    /// elapses. Returns `true` if the registry drained.
    pub async fn wait_idle(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.sessions.is_empty() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        self.sessions.is_empty()
    }
}
