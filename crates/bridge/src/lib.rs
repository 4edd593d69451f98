//! ShellBridge daemon library.
//!
//! Bridges WebSocket connections to local interactive shells. Each accepted
//! connection gets its own shell process on a pseudo-terminal, and the
//! daemon relays bytes in both directions until either side terminates.
//!
//! # Architecture
//!
//! - [`config`]: TOML configuration with environment overrides and validation
//! - [`server`]: TCP listener, WebSocket upgrade, and session admission
//! - [`session`]: session lifecycle, the PTY process handle, and the registry
//!
//! Binary frames carry raw terminal bytes in both directions; text frames
//! carry JSON control messages (see the `protocol` crate).

pub mod config;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use server::BridgeServer;
pub use session::{
    ProcessHandle, ProcessStatus, Session, SessionRegistry, SessionState,
};
