//! Topic layout and inbound message parsing
//!
//! All topics live under `lockers/{locker_id}/`:
//! - `status`: status telemetry (publish)
//! - `request/boxes`: box-data request (subscribe)
//! - `response/boxes`: box-data response (publish)
//! - `command/unlock/{box_id}`: unlock command (subscribe, `#` filter)
//!
//! Inbound payloads carry no data; a non-empty payload must still be
//! valid JSON.

use locker_core::BoxId;
use thiserror::Error;

/// Root of every locker topic
pub const TOPIC_ROOT: &str = "lockers";

/// Errors in inbound message parsing and outbound encoding
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed topic {topic:?}: {reason}")]
    MalformedTopic { topic: String, reason: String },

    #[error("Malformed payload on {topic:?}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Request for the full box list
    BoxRequest,
    /// Unlock the box named in the topic
    UnlockCommand { box_id: BoxId },
    /// Topic this locker does not handle
    Unrecognized { topic: String },
}

/// Topic names for one locker
#[derive(Debug, Clone)]
pub struct Topics {
    locker_id: String,
    status: String,
    box_request: String,
    box_response: String,
    unlock_prefix: String,
}

impl Topics {
    pub fn new(locker_id: impl Into<String>) -> Self {
        let locker_id = locker_id.into();
        let base = format!("{}/{}", TOPIC_ROOT, locker_id);

        Self {
            status: format!("{}/status", base),
            box_request: format!("{}/request/boxes", base),
            box_response: format!("{}/response/boxes", base),
            unlock_prefix: format!("{}/command/unlock/", base),
            locker_id,
        }
    }

    pub fn locker_id(&self) -> &str {
        &self.locker_id
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn box_request(&self) -> &str {
        &self.box_request
    }

    pub fn box_response(&self) -> &str {
        &self.box_response
    }

    /// Unlock topic for one box
    pub fn unlock(&self, box_id: BoxId) -> String {
        format!("{}{}", self.unlock_prefix, box_id)
    }

    /// Wildcard filter catching every unlock command
    pub fn unlock_filter(&self) -> String {
        format!("{}#", self.unlock_prefix)
    }

    /// Filters the locker subscribes to
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.box_request.clone(), self.unlock_filter()]
    }

    /// Decode a topic/payload pair
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<InboundMessage, ProtocolError> {
        let message = if topic == self.box_request {
            InboundMessage::BoxRequest
        } else if let Some(suffix) = topic.strip_prefix(&self.unlock_prefix) {
            InboundMessage::UnlockCommand {
                box_id: parse_box_id(topic, suffix)?,
            }
        } else {
            return Ok(InboundMessage::Unrecognized {
                topic: topic.to_string(),
            });
        };

        check_payload(topic, payload)?;
        Ok(message)
    }
}

fn parse_box_id(topic: &str, suffix: &str) -> Result<BoxId, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    // The box id is the trailing segment
    let segment = suffix.rsplit('/').next().unwrap_or_default();
    if segment.is_empty() {
        return Err(malformed("missing box id"));
    }
    segment
        .parse::<BoxId>()
        .map_err(|e| malformed(&format!("box id {:?}: {}", segment, e)))
}

/// Empty payloads are plain triggers; anything else has to be JSON
fn check_payload(topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    serde_json::from_slice::<serde_json::Value>(payload)
        .map(|_| ())
        .map_err(|e| ProtocolError::MalformedPayload {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
}
