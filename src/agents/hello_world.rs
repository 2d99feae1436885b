//! The greeter: answers `hello` with a `welcome` and `goodbye` with a
//! `farewell`, addressing the sender by nickname.
//!
//! ```text
//! in:  {"eventType":"hello"}      from room@host/Alice
//! out: {"eventType":"welcome","payload":"Hello Alice!"}
//!
//! in:  {"eventType":"goodbye"}    from room@host/Alice
//! out: {"eventType":"farewell","payload":{"msg":"Bye Alice!","time":"..."}}
//! ```

use std::sync::Arc;

use tracing::warn;

use crate::{
    agent::Agent,
    event::{Event, Payload, RegistryResult},
    session::ChannelSession,
    timestamp::Timestamp,
};

pub const HELLO: &str = "hello";
pub const GOODBYE: &str = "goodbye";
pub const WELCOME: &str = "welcome";
pub const FAREWELL: &str = "farewell";

pub fn install(agent: &Agent) -> RegistryResult<()> {
    let session = agent.session().clone();
    agent.on(HELLO, move |event| {
        reply(&session, event, welcome);
    })?;

    let session = agent.session().clone();
    agent.on(GOODBYE, move |event| {
        reply(&session, event, |nick| farewell(nick, &Timestamp::now()));
    })
}

pub fn welcome(nick: &str) -> Event {
    Event::new(WELCOME).with_payload(format!("Hello {}!", nick))
}

pub fn farewell(nick: &str, time: &Timestamp) -> Event {
    let payload: Payload = [
        ("msg", Payload::from(format!("Bye {}!", nick))),
        ("time", Payload::from(time.to_string())),
    ]
    .into_iter()
    .collect();
    Event::new(FAREWELL).with_payload(payload)
}

fn reply(session: &Arc<ChannelSession>, event: &Event, build: impl Fn(&str) -> Event) {
    let Some(nick) = event.sender_nickname() else {
        warn!("{} event without a sender nickname", event.event_type());
        return;
    };
    if let Err(e) = session.send(build(nick)) {
        warn!("Failed to answer {} from {}: {}", event.event_type(), nick, e);
    }
}
