//! # ShellBridge Protocol Library
//!
//! This crate defines the wire protocol spoken between the ShellBridge
//! daemon and its clients over a WebSocket connection.
//!
//! ## Overview
//!
//! The protocol is deliberately thin. A shell session is a raw byte relay,
//! so almost everything on the wire is opaque payload:
//!
//! - **Binary frames** carry raw bytes in both directions: keystrokes from
//!   the client into the shell's input, and shell output back to the
//!   client. The bridge never parses, re-frames, or reorders them.
//! - **Text frames** carry JSON control messages from the client, currently
//!   terminal resize, keepalive ping, and cooperative close.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Binary frames: opaque terminal bytes  │
//! ├─────────────────────────────────────────┤
//! │   Text frames: JSON control messages    │
//! ├─────────────────────────────────────────┤
//! │         Transport (WebSocket)           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::ControlMessage;
//!
//! let msg = ControlMessage::parse(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
//! assert_eq!(msg, Some(ControlMessage::Resize { cols: 120, rows: 40 }));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Control message definitions and parsing
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::ControlMessage;
