use serde::de::DeserializeOwned;
use thiserror::Error;

use super::codec::CodecResult;
use super::payload::{Payload, PayloadMap};
use crate::timestamp::Timestamp;

/// Transport-assigned addressing for an event that arrived over the channel.
///
/// Never serialized: the receive loop fills it from the transport message,
/// not from the decoded JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sender address, e.g. `room@conference.host/Alice`.
    pub from: String,
    /// Recipient address of this agent.
    pub to: String,
    /// The protocol stanza exactly as the transport saw it.
    pub raw_stanza: String,
}

/// # Event
///
/// The unit of communication on the channel: a type name, an optional
/// schema-less payload and optional metadata.
///
/// ```rust,no_run
/// # use sail::event::{Event, Payload};
/// let event = Event::new("lookup")
///     .with_payload([("word", "organic")].into_iter().collect::<Payload>())
///     .with_origin("dictionary-client");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: String,
    payload: Option<Payload>,
    origin: Option<String>,
    timestamp: Option<Timestamp>,
    run: Option<PayloadMap>,
    delivery: Option<Delivery>,
}

impl Event {
    /// Creates a local event with no payload and no metadata. The timestamp
    /// stays unset until the event is sent.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
            origin: None,
            timestamp: None,
            run: None,
            delivery: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_run(mut self, run: PayloadMap) -> Self {
        self.run = Some(run);
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
    }

    pub fn run(&self) -> Option<&PayloadMap> {
        self.run.as_ref()
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        self.delivery.as_ref()
    }

    pub fn is_received(&self) -> bool {
        self.delivery.is_some()
    }

    /// Transport-level sender address.
    pub fn sender(&self) -> Option<&str> {
        self.delivery.as_ref().map(|d| d.from.as_str())
    }

    pub fn recipient(&self) -> Option<&str> {
        self.delivery.as_ref().map(|d| d.to.as_str())
    }

    pub fn raw_stanza(&self) -> Option<&str> {
        self.delivery.as_ref().map(|d| d.raw_stanza.as_str())
    }

    /// The resource part of the sender address (`room@host/Alice` → `Alice`).
    pub fn sender_nickname(&self) -> Option<&str> {
        self.sender()
            .and_then(|from| from.rsplit_once('/'))
            .map(|(_, nick)| nick)
            .filter(|nick| !nick.is_empty())
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> CodecResult<T> {
        self.payload
            .as_ref()
            .unwrap_or(&Payload::Null)
            .deserialize_into()
    }

    pub fn set_event_type(&mut self, event_type: impl Into<String>) -> EventResult<()> {
        self.ensure_local()?;
        self.event_type = event_type.into();
        Ok(())
    }

    pub fn set_payload(&mut self, payload: Option<Payload>) -> EventResult<()> {
        self.ensure_local()?;
        self.payload = payload;
        Ok(())
    }

    pub fn set_origin(&mut self, origin: Option<String>) -> EventResult<()> {
        self.ensure_local()?;
        self.origin = origin;
        Ok(())
    }

    pub fn set_timestamp(&mut self, timestamp: Option<Timestamp>) -> EventResult<()> {
        self.ensure_local()?;
        self.timestamp = timestamp;
        Ok(())
    }

    /// Fills the timestamp with the current time if none was set.
    pub(crate) fn stamp_if_unset(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(Timestamp::now());
        }
    }

    /// Attaches transport addressing. Only the first call has any effect.
    pub(crate) fn attach_delivery(&mut self, delivery: Delivery) {
        if self.delivery.is_none() {
            self.delivery = Some(delivery);
        }
    }

    fn ensure_local(&self) -> EventResult<()> {
        if self.is_received() {
            return Err(EventError::ReceivedEventImmutable {
                event_type: self.event_type.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Received event '{event_type}' cannot be modified")]
    ReceivedEventImmutable { event_type: String },
}

pub type EventResult<T> = Result<T, EventError>;
