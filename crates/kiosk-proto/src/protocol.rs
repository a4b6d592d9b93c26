//! mpv JSON IPC wire format.
//!
//! One JSON object per line in both directions.
//!
//! ```text
//!   → {"command": ["loadfile", "/path/v.mp4", "replace"], "request_id": 7}
//!   ← {"error": "success", "data": null, "request_id": 7}
//!   ← {"event": "file-loaded"}            (unsolicited, no request_id)
//! ```
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::history::ViewRecord;

/// The commands the kiosk sends to a player.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvCommand {
    /// Replace whatever is showing with this file.
    LoadFile { path: String },
    GetProperty { name: String },
    /// On-screen text, shown for `duration_ms`.
    ShowText { text: String, duration_ms: u64 },
}

impl MpvCommand {
    pub fn load_file(path: impl Into<String>) -> Self {
        Self::LoadFile { path: path.into() }
    }

    pub fn idle_active() -> Self {
        Self::GetProperty {
            name: "idle-active".to_string(),
        }
    }

    /// The positional `command` array mpv expects.
    pub fn to_args(&self) -> Value {
        match self {
            Self::LoadFile { path } => json!(["loadfile", path, "replace"]),
            Self::GetProperty { name } => json!(["get_property", name]),
            Self::ShowText { text, duration_ms } => json!(["show-text", text, duration_ms]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub command: Value,
    pub request_id: u64,
}

impl IpcRequest {
    /// Serialise to a single newline-terminated line.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut raw = serde_json::to_string(self)?;
        raw.push('\n');
        Ok(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub error: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub request_id: Option<u64>,
}

impl IpcResponse {
    pub fn is_success(&self) -> bool {
        self.error == "success"
    }

    pub fn data_bool(&self) -> Option<bool> {
        self.data.as_ref().and_then(Value::as_bool)
    }
}

/// A decoded line from the player.
#[derive(Debug, Clone, PartialEq)]
pub enum IpcMessage {
    Response(IpcResponse),
    /// Anything without a `request_id`, e.g. `{"event": "end-file"}`.
    Event(Value),
}

impl IpcMessage {
    pub fn decode(line: &str) -> anyhow::Result<Self> {
        let val: Value = serde_json::from_str(line.trim())?;
        if val.get("request_id").and_then(Value::as_u64).is_some() && val.get("error").is_some() {
            let resp: IpcResponse = serde_json::from_value(val)?;
            return Ok(Self::Response(resp));
        }
        Ok(Self::Event(val))
    }
}

/// JSON body of `GET /api/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub config: Config,
    pub recent_views: Vec<ViewRecord>,
    pub debug_lines: Vec<String>,
}
