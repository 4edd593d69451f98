//! Control message definitions for ShellBridge.
//!
//! Control messages travel as JSON text frames on the WebSocket, distinct
//! from the binary frames that carry raw terminal bytes. The set is small
//! and client-to-bridge only: the bridge never sends structured data back,
//! it only relays the shell's output verbatim.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// A control message sent by the client on a text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Resize the session's pseudo-terminal.
    Resize {
        /// New terminal width in columns.
        cols: u16,
        /// New terminal height in rows.
        rows: u16,
    },
    /// Keepalive ping; the bridge answers with a pong frame.
    Ping,
    /// Cooperative close request; the bridge tears the session down.
    Close,
}

impl ControlMessage {
    /// Parses a control message from a text frame payload.
    ///
    /// Returns `Ok(None)` for well-formed JSON carrying an unrecognized
    /// `type`, so newer clients degrade gracefully against older bridges.
    /// Malformed JSON, missing fields, and zero resize dimensions are
    /// errors.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let msg_type = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        let message = match msg_type {
            "resize" => {
                let cols = read_u16_field(&value, "cols")?;
                let rows = read_u16_field(&value, "rows")?;
                if cols == 0 || rows == 0 {
                    return Err(ProtocolError::ZeroDimensions { cols, rows });
                }
                ControlMessage::Resize { cols, rows }
            }
            "ping" => ControlMessage::Ping,
            "close" => ControlMessage::Close,
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    /// Serializes the message to its JSON wire form.
    pub fn to_json(&self) -> String {
        // The enum has no non-serializable states.
        serde_json::to_string(self).expect("control message serialization cannot fail")
    }
}

/// Extracts a u16 field from a JSON object.
fn read_u16_field(value: &serde_json::Value, key: &'static str) -> Result<u16> {
    let raw = value
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .ok_or(ProtocolError::InvalidField(key))?;
    u16::try_from(raw).map_err(|_| ProtocolError::InvalidField(key))
}
