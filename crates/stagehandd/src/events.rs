//! Fan-out of server events to every connected client.
//!
//! Handlers publish through an [`EventBus`]; transports subscribe sinks that
//! frame the event for their wire format.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// A named notification with a JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    /// Event name, for example `stage_changed`.
    pub name: String,
    /// Event body.
    pub payload: Value,
}

/// Receives every published event.
pub trait EventSink: Send + Sync {
    /// Delivers `event`; failures are the sink's own concern.
    fn publish(&self, event: &ServerEvent);
}

/// Cloneable handle on the set of subscribed sinks.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl EventBus {
    /// Builds a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink that will see every later event.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        match self.sinks.write() {
            Ok(mut sinks) => sinks.push(sink),
            Err(_) => warn!(target: EVENTS_TARGET, "event sink list poisoned; subscription dropped"),
        }
    }

    /// Publishes an event to every subscribed sink.
    pub fn publish(&self, name: &str, payload: Value) {
        let event = ServerEvent {
            name: name.to_owned(),
            payload,
        };
        let sinks = match self.sinks.read() {
            Ok(sinks) => sinks.clone(),
            Err(_) => {
                warn!(target: EVENTS_TARGET, event = name, "event sink list poisoned; event dropped");
                return;
            }
        };
        debug!(target: EVENTS_TARGET, event = name, sinks = sinks.len(), "publishing event");
        for sink in sinks {
            sink.publish(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ServerEvent>>);

    impl EventSink for Collect {
        fn publish(&self, event: &ServerEvent) {
            self.0.lock().expect("collector lock").push(event.clone());
        }
    }

    #[rstest]
    fn every_sink_sees_every_event() {
        let bus = EventBus::new();
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        bus.publish("stage_changed", json!({"stage_id": 1}));

        for sink in [first, second] {
            let events = sink.0.lock().expect("collector lock");
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].name, "stage_changed");
            assert_eq!(events[0].payload["stage_id"], 1);
        }
    }

    #[rstest]
    fn publishing_without_sinks_is_harmless() {
        EventBus::new().publish("notes_changed", Value::Null);
    }
}
