//! Hub wire protocol
//!
//! Outbound frames are hub invocations `{H, M, A, I}`. Inbound frames are one of:
//! - `{I, R}` result of a call (`R` may be absent for void methods)
//! - `{I, E}` server-side hub error for a call
//! - `{I, D}` progress notification (ignored)
//! - `{C, M: [...]}` multicast of hub invocations (the data channel)
//! - `{}` keepalive

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server keepalive frame
pub const KEEPALIVE_FRAME: &str = "{}";

/// Message id correlating a call with its result frame
pub type MessageId = u64;

/// Outbound hub method invocation
#[derive(Debug, Clone, Serialize)]
pub struct HubInvocation<'a> {
    #[serde(rename = "H")]
    pub hub: &'a str,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A")]
    pub args: Vec<Value>,
    #[serde(rename = "I")]
    pub id: MessageId,
}

impl<'a> HubInvocation<'a> {
    /// Method names go over the wire lowercased
    pub fn new(hub: &'a str, method: &str, args: Vec<Value>, id: MessageId) -> Self {
        Self {
            hub,
            method: method.to_lowercase(),
            args,
            id,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One hub invocation pushed by the server
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HubMessage {
    #[serde(rename = "H", default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Result of a call; `Value::Null` for void methods
    Result { id: MessageId, result: Value },
    /// Hub error raised while executing a call
    Error { id: MessageId, message: String },
    /// Progress notification for a long-running call
    Progress { id: MessageId },
    /// Data channel; entries in server order
    Multicast(Vec<HubMessage>),
    KeepAlive,
    /// Well-formed JSON this client has no use for (init frames, groups token, ...)
    Other,
}

/// Frame that could not be classified
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid message id: {0}")]
    InvalidId(String),
}

/// Parse and classify a text frame
pub fn parse_frame(text: &str) -> Result<InboundFrame, FrameError> {
    if text == KEEPALIVE_FRAME {
        return Ok(InboundFrame::KeepAlive);
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Object(fields) = value else {
        return Ok(InboundFrame::Other);
    };

    if let Some(raw_id) = fields.get("I") {
        let id = parse_message_id(raw_id)?;
        if fields.contains_key("D") {
            return Ok(InboundFrame::Progress { id });
        }
        if let Some(error) = fields.get("E") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(InboundFrame::Error { id, message });
        }
        let result = fields.get("R").cloned().unwrap_or(Value::Null);
        return Ok(InboundFrame::Result { id, result });
    }

    match fields.get("M") {
        Some(Value::Array(entries)) => {
            let mut messages = Vec::with_capacity(entries.len());
            for entry in entries {
                match HubMessage::deserialize(entry) {
                    Ok(message) => messages.push(message),
                    Err(e) => {
                        tracing::debug!(target: "ws", error = %e, "skipping malformed hub entry");
                    }
                }
            }
            Ok(InboundFrame::Multicast(messages))
        }
        _ => Ok(InboundFrame::Other),
    }
}

/// Ids come back as JSON strings ("1") or numbers (1)
fn parse_message_id(raw: &Value) -> Result<MessageId, FrameError> {
    match raw {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| FrameError::InvalidId(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<MessageId>()
            .map_err(|_| FrameError::InvalidId(s.clone())),
        other => Err(FrameError::InvalidId(other.to_string())),
    }
}

/// Body of the negotiate response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiateResponse {
    pub connection_id: String,
    pub connection_token: String,
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Seconds, as a number or a numeric string
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub transport_connect_timeout: Option<f64>,
}

/// Any non-numeric value counts as absent
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
