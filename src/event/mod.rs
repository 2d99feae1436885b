//! # Events
//!
//! Agents talk by broadcasting typed events into a shared room. Every agent
//! in the room sees every event and reacts only to the types it has a
//! responder for.
//!
//! ## Components
//!
//! - **Payload**: the schema-less payload value ([`payload`])
//! - **Event**: type, payload and metadata plus transport addressing ([`envelope`])
//! - **Codec**: JSON envelope encoding with numeric tier inference ([`codec`])
//! - **ResponderRegistry**: event type → responder table ([`responder_registry`])
//!
//! ## Event Flow
//!
//! ```text
//!  outbound                                  inbound
//! ┌───────┐  encode  ┌─────────┐   raw text   ┌────────┐ decode ┌──────────┐
//! │ Event │─────────▶│Transport│─ ─ ─ ─ ─ ─ ─▶│ Session│───────▶│ Registry │
//! └───────┘          └─────────┘              └────────┘        └────┬─────┘
//!                                                                    │
//!                                                              ┌─────▼─────┐
//!                                                              │ Responder │
//!                                                              └───────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! # use sail::event::{codec, Event, ResponderRegistry};
//! let registry = ResponderRegistry::new();
//! registry
//!     .register("hello", |event| {
//!         println!("hello from {:?}", event.sender_nickname());
//!     })
//!     .unwrap();
//!
//! let event = codec::decode(r#"{"eventType":"hello"}"#).unwrap();
//! registry.dispatch(&event);
//! ```

pub mod codec;
pub mod envelope;
pub mod payload;
pub mod responder_registry;

pub use codec::{decode, encode, CodecError, CodecResult};
pub use envelope::{Delivery, Event, EventError, EventResult};
pub use payload::{Payload, PayloadMap};
pub use responder_registry::{RegistryError, RegistryResult, Responder, ResponderRegistry};
