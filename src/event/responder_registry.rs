use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use super::envelope::Event;

/// A responder reacts to one event type. It runs synchronously on the
/// receive loop, so long work should be handed off to its own task.
pub type Responder = Arc<dyn Fn(&Event) + Send + Sync>;

/// Event type → responder table.
///
/// Cloning yields another handle onto the same table, so responders may be
/// added after the receive loop has started and dispatch observes them.
#[derive(Clone, Default)]
pub struct ResponderRegistry {
    responders: Arc<DashMap<String, Responder>>,
}

impl ResponderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a responder, refusing to overwrite an existing one.
    pub fn register<F>(&self, event_type: &str, responder: F) -> RegistryResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if event_type.is_empty() {
            return Err(RegistryError::InvalidType);
        }

        match self.responders.entry(event_type.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateType {
                event_type: event_type.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(responder));
                debug!("Responder registered: {}", event_type);
                Ok(())
            }
        }
    }

    /// Adds a responder keyed by type, overwriting whatever was bound.
    pub fn insert<F>(&self, event_type: &str, responder: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self
            .responders
            .insert(event_type.to_string(), Arc::new(responder))
            .is_some()
        {
            debug!("Responder overwritten: {}", event_type);
        }
    }

    /// Drops any responder bound to `event_type`, then binds the new one.
    pub fn replace<F>(&self, event_type: &str, responder: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.responders.remove(event_type);
        self.responders
            .insert(event_type.to_string(), Arc::new(responder));
        debug!("Responder replaced: {}", event_type);
    }

    /// Invokes the responder bound to the event's type, if any.
    ///
    /// Unmatched events are dropped silently. Returns whether a responder ran.
    pub fn dispatch(&self, event: &Event) -> bool {
        // release the shard lock before running user code
        let responder = self
            .responders
            .get(event.event_type())
            .map(|entry| Arc::clone(entry.value()));

        match responder {
            Some(responder) => {
                trace!("Dispatching {} event", event.event_type());
                responder(event);
                true
            }
            None => {
                trace!("No responder for {} event", event.event_type());
                false
            }
        }
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.responders.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<String> {
        self.responders.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.responders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responders.is_empty()
    }
}

impl std::fmt::Debug for ResponderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Responder already registered for event type: {event_type}")]
    DuplicateType { event_type: String },

    #[error("Responder event type must not be empty")]
    InvalidType,
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Responder) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let make = move |label: &str| -> Responder {
            let calls = calls_clone.clone();
            let label = label.to_string();
            Arc::new(move |event: &Event| {
                calls
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", label, event.event_type()));
            })
        };
        (calls, make)
    }

    #[test]
    fn test_register_and_dispatch() {
        let registry = ResponderRegistry::new();
        let (calls, make) = recorder();
        let h1 = make("h1");
        registry.register("x", move |e| h1(e)).unwrap();

        assert!(registry.dispatch(&Event::new("x")));
        assert_eq!(*calls.lock().unwrap(), vec!["h1:x".to_string()]);
    }

    #[test]
    fn test_duplicate_register_keeps_first() {
        let registry = ResponderRegistry::new();
        let (calls, make) = recorder();
        let (h1, h2) = (make("h1"), make("h2"));
        registry.register("x", move |e| h1(e)).unwrap();

        let result = registry.register("x", move |e| h2(e));
        assert_eq!(
            result,
            Err(RegistryError::DuplicateType {
                event_type: "x".to_string()
            })
        );

        registry.dispatch(&Event::new("x"));
        assert_eq!(*calls.lock().unwrap(), vec!["h1:x".to_string()]);
    }

    #[test]
    fn test_replace_then_dispatch_invokes_new_only() {
        let registry = ResponderRegistry::new();
        let (calls, make) = recorder();
        let (h1, h2) = (make("h1"), make("h2"));
        registry.register("x", move |e| h1(e)).unwrap();
        registry.replace("x", move |e| h2(e));

        registry.dispatch(&Event::new("x"));
        assert_eq!(*calls.lock().unwrap(), vec!["h2:x".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_overwrites() {
        let registry = ResponderRegistry::new();
        let (calls, make) = recorder();
        let (h1, h2) = (make("h1"), make("h2"));
        registry.insert("x", move |e| h1(e));
        registry.insert("x", move |e| h2(e));

        registry.dispatch(&Event::new("x"));
        assert_eq!(*calls.lock().unwrap(), vec!["h2:x".to_string()]);
    }

    #[test]
    fn test_register_empty_type_fails() {
        let registry = ResponderRegistry::new();
        assert_eq!(
            registry.register("", |_| {}),
            Err(RegistryError::InvalidType)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispatch_unregistered_is_noop() {
        let registry = ResponderRegistry::new();
        let (calls, make) = recorder();
        let h1 = make("h1");
        registry.register("x", move |e| h1(e)).unwrap();

        assert!(!registry.dispatch(&Event::new("y")));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_responder_can_register_during_dispatch() {
        let registry = ResponderRegistry::new();
        let inner = registry.clone();
        registry
            .register("bootstrap", move |_| {
                inner.insert("late", |_| {});
            })
            .unwrap();

        registry.dispatch(&Event::new("bootstrap"));
        assert!(registry.contains("late"));
    }

    #[test]
    fn test_clone_shares_table() {
        let registry = ResponderRegistry::new();
        let handle = registry.clone();
        handle.insert("x", |_| {});
        assert!(registry.contains("x"));
        assert_eq!(registry.event_types(), vec!["x".to_string()]);
    }
}
