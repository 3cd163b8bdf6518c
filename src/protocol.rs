//! Viewer wire protocol.
//!
//! Every WebSocket text frame carries one JSON object tagged by `type`.
//! Viewers send [`ClientMessage`]s; the relay sends [`ServerMessage`]s.
//! Payloads that are not JSON at all are treated as raw keystrokes.

use serde::{Deserialize, Deserializer, Serialize};

use crate::pty::{DEFAULT_COLS, DEFAULT_ROWS};

/// Byte written to the shell to emulate Ctrl-C.
pub const INTERRUPT: u8 = 0x03;

/// Messages sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Input {
        data: String,
    },
    Resize {
        #[serde(default, deserialize_with = "lenient_dimension")]
        cols: Option<u16>,
        #[serde(default, deserialize_with = "lenient_dimension")]
        rows: Option<u16>,
    },
    Signal {
        #[serde(default)]
        signal: Option<String>,
    },
    Kill,
}

impl ClientMessage {
    /// Resize dimensions with defaults applied, as `(cols, rows)`.
    pub fn resize_dimensions(cols: Option<u16>, rows: Option<u16>) -> (u16, u16) {
        (cols.unwrap_or(DEFAULT_COLS), rows.unwrap_or(DEFAULT_ROWS))
    }
}

/// Accept any JSON value for a dimension; only integers in `1..=u16::MAX`
/// count; everything else becomes `None`.
fn lenient_dimension<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| u16::try_from(n).ok()))
}

/// Result of interpreting one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(ClientMessage),
    /// Valid JSON that is not a message we understand (unknown `type`,
    /// wrong payload shape). Dropped.
    Ignored,
    /// Not JSON. Forwarded to the shell verbatim.
    Raw(String),
}

pub fn parse_inbound(text: &str) -> Inbound {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => match serde_json::from_value::<ClientMessage>(value) {
            Ok(msg) => Inbound::Message(msg),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unrecognized viewer message");
                Inbound::Ignored
            }
        },
        Err(_) => Inbound::Raw(text.to_string()),
    }
}

/// Messages sent to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent first on every attach.
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Stdout {
        text: String,
    },
    Exit {
        #[serde(rename = "exitCode")]
        exit_code: u32,
        signal: Option<String>,
    },
    /// Session creation failed; the connection is closed afterwards.
    Error {
        text: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Serialization of these variants cannot fail: all fields are
        // strings or integers.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Incremental UTF-8 decoder for PTY output.
///
/// PTY reads split the byte stream at arbitrary points. A multi-byte
/// character cut in half is held back until the next chunk completes it.
/// Genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    out.push_str(
                        std::str::from_utf8(&self.pending[start..valid_end]).unwrap_or_default(),
                    );
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            // Incomplete sequence at the end; keep it.
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }

    /// Flush any held-back bytes (lossily) at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
