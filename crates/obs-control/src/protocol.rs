//! Wire frames for the control protocol.
//!
//! The control endpoint speaks JSON frames over a message-oriented socket.
//! Every frame is an envelope `{"op": <int>, "d": {...}}` where the opcode
//! identifies the payload shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ControlError, Result};

/// RPC version this client negotiates.
pub const RPC_VERSION: u32 = 1;

/// Protocol opcodes.
pub mod opcode {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// Event-subscription bitmask values for the identify frame.
pub mod subscription {
    pub const NONE: u32 = 0;
    pub const GENERAL: u32 = 1 << 0;
    pub const CONFIG: u32 = 1 << 1;
    pub const SCENES: u32 = 1 << 2;
    pub const INPUTS: u32 = 1 << 3;
    pub const TRANSITIONS: u32 = 1 << 4;
    pub const FILTERS: u32 = 1 << 5;
    pub const OUTPUTS: u32 = 1 << 6;
    pub const SCENE_ITEMS: u32 = 1 << 7;
    pub const MEDIA_INPUTS: u32 = 1 << 8;
    pub const VENDORS: u32 = 1 << 9;
    pub const UI: u32 = 1 << 10;

    /// All non-high-volume event categories.
    pub const ALL: u32 = GENERAL
        | CONFIG
        | SCENES
        | INPUTS
        | TRANSITIONS
        | FILTERS
        | OUTPUTS
        | SCENE_ITEMS
        | MEDIA_INPUTS
        | VENDORS
        | UI;
}

/// Raw frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    pub d: Value,
}

/// Server hello (opcode 0).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    /// Present when the server requires password authentication.
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Authentication material carried in the hello frame.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Client identify (opcode 1).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

/// Server acknowledgment of identification (opcode 2).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// Server event (opcode 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub event_type: String,
    #[serde(default)]
    pub event_intent: Option<u32>,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// Client request (opcode 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    pub request_type: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

/// Outcome carried in a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Server response to a request (opcode 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

/// Decoded server-to-client frame.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Hello(Hello),
    Identified(Identified),
    Event(EventFrame),
    RequestResponse(ResponseFrame),
}

impl ServerFrame {
    /// Decode one frame from its JSON text.
    ///
    /// Unknown opcodes and payloads that do not match their opcode's shape
    /// are protocol errors; the connection itself stays usable.
    pub fn decode(text: &str) -> Result<Self> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| ControlError::protocol(format!("invalid frame: {e}")))?;
        match frame.op {
            opcode::HELLO => Ok(Self::Hello(decode_payload(frame.d, "hello")?)),
            opcode::IDENTIFIED => Ok(Self::Identified(decode_payload(frame.d, "identified")?)),
            opcode::EVENT => Ok(Self::Event(decode_payload(frame.d, "event")?)),
            opcode::REQUEST_RESPONSE => {
                Ok(Self::RequestResponse(decode_payload(frame.d, "response")?))
            }
            op => Err(ControlError::protocol(format!("unknown opcode {op}"))),
        }
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(d: Value, what: &str) -> Result<T> {
    serde_json::from_value(d).map_err(|e| ControlError::protocol(format!("invalid {what}: {e}")))
}

/// Encode one client-to-server frame as JSON text.
pub fn encode(op: u8, d: &impl Serialize) -> Result<String> {
    let frame = Frame {
        op,
        d: serde_json::to_value(d)?,
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Output state reported by `StreamStateChanged` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputState {
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STARTING")]
    Starting,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STARTED")]
    Started,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STOPPING")]
    Stopping,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_STOPPED")]
    Stopped,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_RECONNECTING")]
    Reconnecting,
    #[serde(rename = "OBS_WEBSOCKET_OUTPUT_RECONNECTED")]
    Reconnected,
}

/// Payload of the `StreamStateChanged` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStateChanged {
    pub output_active: bool,
    pub output_state: OutputState,
}

/// Response data of a `GetStreamStatus` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub output_active: bool,
    pub output_reconnecting: bool,
    pub output_timecode: String,
    /// Time the output has been active, in milliseconds.
    pub output_duration: u64,
    #[serde(default)]
    pub output_congestion: f64,
    pub output_bytes: u64,
    pub output_skipped_frames: u64,
    pub output_total_frames: u64,
}

/// Response data of a `GetVersion` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default)]
    pub obs_version: Option<String>,
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default)]
    pub available_requests: Vec<String>,
}
