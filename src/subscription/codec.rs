//! Wire encoding for the notification feed.
//!
//! Inbound frames are JSON objects `{"event_id": ..., "message": ...}`; the
//! payload shape is picked by `event_id`, or by the payload itself when the
//! id is empty or unknown. Some servers double-encode the payload as a JSON
//! string, which is unwrapped before decoding. Outbound
//! subscription requests reuse the same envelope with `event_id` set to
//! `subscribe` or `unsubscribe` and the topic string as the message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::subscription::types::{InboundEvent, Topic};

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(alias = "event")]
    event_id: String,
    #[serde(default)]
    message: Value,
}

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    event_id: &'a str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockPayload {
    height: u64,
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NewBlockPayload {
    Flat(BlockPayload),
    Nested { block: BlockPayload },
}

#[derive(Debug, Deserialize)]
struct AddressPayload {
    address: String,
    tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is not a valid envelope: {0}")]
    Envelope(String),

    #[error("malformed '{event_id}' payload: {reason}")]
    Payload { event_id: String, reason: String },
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for well-formed frames of a kind this client does not
/// handle.
pub fn decode_frame(text: &str) -> Result<Option<InboundEvent>, DecodeError> {
    let frame: WireFrame =
        serde_json::from_str(text).map_err(|e| DecodeError::Envelope(e.to_string()))?;

    let event_id = frame.event_id.as_str();
    let event = match event_id {
        "ping" | "heartbeat" => InboundEvent::Heartbeat,
        "newblock" => {
            let block = match payload::<NewBlockPayload>(event_id, frame.message)? {
                NewBlockPayload::Flat(block) | NewBlockPayload::Nested { block } => block,
            };
            InboundEvent::NewBlock {
                height: block.height,
                hash: block.hash,
            }
        }
        id if id == "address" || id.starts_with("address:") => {
            let activity: AddressPayload = payload(event_id, frame.message)?;
            InboundEvent::AddressActivity {
                address: activity.address,
                tx_id: activity.tx_hash,
            }
        }
        _ => return Ok(by_shape(frame.message)),
    };

    Ok(Some(event))
}

/// Recognize a payload without a usable `event_id`. Address activity is
/// tried before blocks.
fn by_shape(message: Value) -> Option<InboundEvent> {
    let value = match message {
        Value::String(inner) => serde_json::from_str(&inner).ok()?,
        other => other,
    };

    if let Ok(activity) = AddressPayload::deserialize(&value) {
        return Some(InboundEvent::AddressActivity {
            address: activity.address,
            tx_id: activity.tx_hash,
        });
    }
    match NewBlockPayload::deserialize(&value) {
        Ok(NewBlockPayload::Flat(block)) | Ok(NewBlockPayload::Nested { block }) => {
            Some(InboundEvent::NewBlock {
                height: block.height,
                hash: block.hash,
            })
        }
        Err(_) => None,
    }
}

fn payload<T>(event_id: &str, message: Value) -> Result<T, DecodeError>
where
    T: serde::de::DeserializeOwned,
{
    let malformed = |reason: String| DecodeError::Payload {
        event_id: event_id.to_string(),
        reason,
    };

    let value = match message {
        Value::String(inner) => serde_json::from_str(&inner).map_err(|e| malformed(e.to_string()))?,
        other => other,
    };
    serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
}

fn request(event_id: &str, topic: &Topic) -> String {
    let frame = RequestFrame {
        event_id,
        message: topic.to_string(),
    };
    // Serializing two strings cannot fail.
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Frame asking the server to start sending `topic`.
pub fn subscribe_request(topic: &Topic) -> String {
    request("subscribe", topic)
}

/// Frame asking the server to stop sending `topic`.
pub fn unsubscribe_request(topic: &Topic) -> String {
    request("unsubscribe", topic)
}
