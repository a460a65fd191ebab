//! obs-websocket 5.x wire messages.
//!
//! The message schema here follows the upstream obs-websocket protocol
//! document, which is the external contract for this module: Hello (op 0),
//! Identify (op 1), Identified (op 2), Event (op 5), Request (op 6) and
//! RequestResponse (op 7), all wrapped in an `{op, d}` envelope.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// The only RPC version this client speaks.
pub const RPC_VERSION: u32 = 1;

/// Event subscription bits we care about: General (ExitStarted),
/// Scenes (scene changes) and Outputs (record/stream state).
pub const EVENT_SUBSCRIPTIONS: u32 = (1 << 0) | (1 << 2) | (1 << 6);

/// WebSocket close code OBS uses for a rejected Identify authentication.
pub const CLOSE_AUTH_FAILED: u16 = 4009;

/// Message opcodes.
pub mod opcode {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// Generic `{op, d}` envelope every frame is wrapped in.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

/// Server greeting (op 0).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Authentication challenge carried in Hello when a password is set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Handshake confirmation (op 2).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// Response to a request (op 7).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

/// Status block of a response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Raw event frame (op 5) before demultiplexing into [`Event`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// Serializes an Identify frame (op 1).
#[must_use]
pub fn identify_frame(authentication: Option<&str>) -> String {
    let mut d = serde_json::json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": EVENT_SUBSCRIPTIONS,
    });
    if let Some(auth) = authentication {
        d["authentication"] = Value::String(auth.to_string());
    }
    serde_json::json!({ "op": opcode::IDENTIFY, "d": d }).to_string()
}

/// Serializes a Request frame (op 6).
#[must_use]
pub fn request_frame(request_id: &str, request_type: &str, data: Option<Value>) -> String {
    let mut d = serde_json::json!({
        "requestType": request_type,
        "requestId": request_id,
    });
    if let Some(data) = data {
        d["requestData"] = data;
    }
    serde_json::json!({ "op": opcode::REQUEST, "d": d }).to_string()
}

/// Computes the Identify authentication string:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
#[must_use]
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    let secret = BASE64.encode(hasher.finalize());

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(challenge.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Output lifecycle states carried by `RecordStateChanged` /
/// `StreamStateChanged` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Starting,
    Started,
    Stopping,
    Stopped,
    Paused,
    Resumed,
    Reconnecting,
    Reconnected,
    Unknown,
}

impl OutputState {
    fn parse(raw: &str) -> Self {
        match raw {
            "OBS_WEBSOCKET_OUTPUT_STARTING" => Self::Starting,
            "OBS_WEBSOCKET_OUTPUT_STARTED" => Self::Started,
            "OBS_WEBSOCKET_OUTPUT_STOPPING" => Self::Stopping,
            "OBS_WEBSOCKET_OUTPUT_STOPPED" => Self::Stopped,
            "OBS_WEBSOCKET_OUTPUT_PAUSED" => Self::Paused,
            "OBS_WEBSOCKET_OUTPUT_RESUMED" => Self::Resumed,
            "OBS_WEBSOCKET_OUTPUT_RECONNECTING" => Self::Reconnecting,
            "OBS_WEBSOCKET_OUTPUT_RECONNECTED" => Self::Reconnected,
            _ => Self::Unknown,
        }
    }
}

/// Unsolicited events demultiplexed from the frame stream. Everything the
/// bridge does not track maps to [`Event::Unknown`] and is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RecordStateChanged {
        active: bool,
        state: OutputState,
        output_path: Option<String>,
    },
    StreamStateChanged {
        active: bool,
        state: OutputState,
    },
    CurrentProgramSceneChanged {
        scene_name: String,
    },
    SceneListChanged {
        scenes: Vec<String>,
    },
    ExitStarted,
    Unknown,
}

impl Event {
    /// Parses a typed event from an op-5 frame. Unknown event types and
    /// payloads missing the fields we need degrade to [`Event::Unknown`].
    #[must_use]
    pub fn parse(event_type: &str, data: Option<&Value>) -> Self {
        let data = data.unwrap_or(&Value::Null);
        match event_type {
            "RecordStateChanged" => Self::RecordStateChanged {
                active: data["outputActive"].as_bool().unwrap_or(false),
                state: OutputState::parse(data["outputState"].as_str().unwrap_or("")),
                output_path: data["outputPath"].as_str().map(str::to_string),
            },
            "StreamStateChanged" => Self::StreamStateChanged {
                active: data["outputActive"].as_bool().unwrap_or(false),
                state: OutputState::parse(data["outputState"].as_str().unwrap_or("")),
            },
            "CurrentProgramSceneChanged" => match data["sceneName"].as_str() {
                Some(name) => Self::CurrentProgramSceneChanged {
                    scene_name: name.to_string(),
                },
                None => Self::Unknown,
            },
            "SceneListChanged" => {
                let scenes = data["scenes"]
                    .as_array()
                    .map(|scenes| {
                        scenes
                            .iter()
                            .filter_map(|s| s["sceneName"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                Self::SceneListChanged { scenes }
            }
            "ExitStarted" => Self::ExitStarted,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// Typed response payloads
// ============================================================================

/// `GetRecordStatus` response data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStatus {
    pub output_active: bool,
    #[serde(default)]
    pub output_paused: bool,
    /// Duration in milliseconds.
    #[serde(default)]
    pub output_duration: Option<u64>,
}

/// `GetStreamStatus` response data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub output_active: bool,
    #[serde(default)]
    pub output_reconnecting: bool,
    /// Duration in milliseconds.
    #[serde(default)]
    pub output_duration: Option<u64>,
}

/// `StopRecord` response data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPath {
    pub output_path: String,
}

/// `GetSceneList` response data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneList {
    #[serde(default)]
    pub current_program_scene_name: Option<String>,
    #[serde(default)]
    pub scenes: Vec<SceneEntry>,
}

/// Single entry in `GetSceneList`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntry {
    pub scene_name: String,
}

/// `GetStats` response data, as reported by OBS.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    #[serde(default)]
    pub available_disk_space: Option<f64>,
    pub active_fps: f64,
    pub average_frame_render_time: f64,
    #[serde(default)]
    pub render_skipped_frames: u64,
    #[serde(default)]
    pub render_total_frames: u64,
    #[serde(default)]
    pub output_skipped_frames: u64,
    #[serde(default)]
    pub output_total_frames: u64,
}
