//! # Event Codec
//!
//! Converts [`Event`] values to and from the JSON envelope exchanged on the
//! channel:
//!
//! ```text
//! {
//!   "eventType": "<string, required>",
//!   "payload":   <any JSON value, optional>,
//!   "origin":    "<string, optional>",
//!   "timestamp": "<yyyy-MM-ddTHH:mm:ss+hhmm, optional>",
//!   "run":       { <optional object> }
//! }
//! ```
//!
//! Fields are written in the order above and only when set. Unknown
//! top-level fields are ignored on decode. An absent `payload` decodes to no
//! payload, an explicit `null` to [`Payload::Null`].
//!
//! Transport addressing (`from`, `to`, raw stanza) never appears in the
//! envelope.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::envelope::Event;
use super::payload::{Payload, PayloadMap};
use crate::timestamp::{Timestamp, TimestampError};

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "eventType", default)]
    event_type: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`; a missing key falls back
/// to the field default.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Serializes an event to envelope text.
///
/// The timestamp is written only if the event carries one; callers that want
/// send-time stamping go through the session, which fills it first.
pub fn encode(event: &Event) -> CodecResult<String> {
    if event.event_type().is_empty() {
        return Err(CodecError::EmptyEventType);
    }

    let envelope = Envelope {
        event_type: Some(Value::String(event.event_type().to_string())),
        payload: event.payload().map(Value::from),
        origin: event.origin().map(|o| Value::String(o.to_string())),
        timestamp: event.timestamp().map(|t| Value::String(t.to_wire())),
        run: event.run().map(|run| {
            Value::Object(
                run.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect::<Map<String, Value>>(),
            )
        }),
    };

    serde_json::to_string(&envelope).map_err(|e| CodecError::Malformed {
        message: e.to_string(),
    })
}

/// Parses envelope text into an event.
///
/// The decoded event has no delivery metadata and no invented timestamp.
pub fn decode(text: &str) -> CodecResult<Event> {
    let value: Value = serde_json::from_str(text).map_err(|e| CodecError::Malformed {
        message: e.to_string(),
    })?;

    if !value.is_object() {
        return Err(CodecError::NotAnEnvelope {
            found: json_kind(&value).to_string(),
        });
    }

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| CodecError::Malformed {
            message: e.to_string(),
        })?;

    let event_type = match envelope.event_type {
        None | Some(Value::Null) => return Err(CodecError::MissingEventType),
        Some(Value::String(s)) if s.is_empty() => return Err(CodecError::EmptyEventType),
        Some(Value::String(s)) => s,
        Some(other) => return Err(invalid_field("eventType", "a string", &other)),
    };

    let mut event = Event::new(event_type);

    if let Some(payload) = envelope.payload {
        event = event.with_payload(Payload::from(&payload));
    }

    match envelope.origin {
        None | Some(Value::Null) => {}
        Some(Value::String(origin)) => event = event.with_origin(origin),
        Some(other) => return Err(invalid_field("origin", "a string", &other)),
    }

    match envelope.timestamp {
        None | Some(Value::Null) => {}
        Some(Value::String(raw)) => event = event.with_timestamp(Timestamp::parse(&raw)?),
        Some(other) => return Err(invalid_field("timestamp", "a string", &other)),
    }

    match envelope.run {
        None | Some(Value::Null) => {}
        Some(Value::Object(run)) => {
            event = event.with_run(
                run.iter()
                    .map(|(k, v)| (k.clone(), Payload::from(v)))
                    .collect::<PayloadMap>(),
            )
        }
        Some(other) => return Err(invalid_field("run", "an object", &other)),
    }

    Ok(event)
}

fn invalid_field(field: &'static str, expected: &'static str, found: &Value) -> CodecError {
    CodecError::InvalidField {
        field,
        expected,
        found: json_kind(found).to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Malformed event text: {message}")]
    Malformed { message: String },

    #[error("Not a valid event envelope: expected an object, found {found}")]
    NotAnEnvelope { found: String },

    #[error("Event envelope is missing eventType")]
    MissingEventType,

    #[error("Event type must not be empty")]
    EmptyEventType,

    #[error("Envelope field '{field}' must be {expected}, found {found}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error(transparent)]
    InvalidTimestamp(#[from] TimestampError),

    #[error("Payload conversion failed: {message}")]
    Payload { message: String },
}

pub type CodecResult<T> = Result<T, CodecError>;
