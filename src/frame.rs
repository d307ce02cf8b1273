//! Wire codec for the one-byte-tagged binary messages exchanged over the
//! terminal WebSocket.
//!
//! Every application-level frame begins with a single ASCII command byte;
//! the remainder of the frame is the payload. This mirrors the tag table in
//! the protocol this crate's browser client speaks — the exact byte values
//! are a wire-compatibility detail, not a free design choice.

use serde::Deserialize;

/// Commands sent from the browser to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTag {
    Input,
    ResizeTerminal,
    JsonData,
}

/// Commands sent from the server to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerTag {
    Output,
    SetWindowTitle,
    SetPreferences,
    SetReconnect,
}

impl ClientTag {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'0' => Some(ClientTag::Input),
            b'1' => Some(ClientTag::ResizeTerminal),
            b'{' => Some(ClientTag::JsonData),
            _ => None,
        }
    }
}

impl ServerTag {
    fn as_byte(self) -> u8 {
        match self {
            ServerTag::Output => b'0',
            ServerTag::SetWindowTitle => b'1',
            ServerTag::SetPreferences => b'2',
            ServerTag::SetReconnect => b'3',
        }
    }
}

/// A decoded client->server frame.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Input(Vec<u8>),
    Resize { columns: u16, rows: u16 },
    JsonData(serde_json::Value),
    /// A recognized tag whose payload could not be parsed, or an
    /// unrecognized tag entirely. Both are logged and ignored per §4.3.
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ResizePayload {
    columns: u16,
    rows: u16,
}

/// Decode a complete, reassembled client message (tag byte + payload).
///
/// Returns `ClientFrame::Unknown` for tags the server doesn't recognize or
/// whose payload fails to parse, matching the "logged and ignored" policy
/// for malformed input.
pub fn decode_client_frame(bytes: &[u8]) -> ClientFrame {
    let Some((&tag_byte, payload)) = bytes.split_first() else {
        return ClientFrame::Unknown;
    };
    match ClientTag::from_byte(tag_byte) {
        Some(ClientTag::Input) => ClientFrame::Input(payload.to_vec()),
        Some(ClientTag::ResizeTerminal) => match serde_json::from_slice::<ResizePayload>(payload)
        {
            Ok(p) => ClientFrame::Resize {
                columns: p.columns,
                rows: p.rows,
            },
            Err(_) => ClientFrame::Unknown,
        },
        Some(ClientTag::JsonData) => {
            // The JSON_DATA tag byte *is* the opening brace of the JSON
            // object, so the whole message (tag included) is the payload.
            match serde_json::from_slice::<serde_json::Value>(bytes) {
                Ok(v) => ClientFrame::JsonData(v),
                Err(_) => ClientFrame::Unknown,
            }
        }
        None => ClientFrame::Unknown,
    }
}

/// Extract the `AuthToken` string field from a decoded `JSON_DATA` payload,
/// if present.
pub fn auth_token_of(payload: &serde_json::Value) -> Option<&str> {
    payload.get("AuthToken").and_then(|v| v.as_str())
}

/// Encode a server->client frame as a binary WebSocket payload.
pub fn encode_server_frame(tag: ServerTag, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(tag.as_byte());
    out.extend_from_slice(payload);
    out
}

pub fn output_frame(bytes: &[u8]) -> Vec<u8> {
    encode_server_frame(ServerTag::Output, bytes)
}

pub fn set_window_title_frame(argv0: &str, hostname: &str) -> Vec<u8> {
    let title = format!("{} ({})", argv0, hostname);
    encode_server_frame(ServerTag::SetWindowTitle, title.as_bytes())
}

pub fn set_reconnect_frame(seconds: u32) -> Vec<u8> {
    encode_server_frame(ServerTag::SetReconnect, seconds.to_string().as_bytes())
}

pub fn set_preferences_frame(prefs_json: &str) -> Vec<u8> {
    encode_server_frame(ServerTag::SetPreferences, prefs_json.as_bytes())
}
