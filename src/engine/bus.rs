//! Event emission and subscription
//!
//! Components emit into an [`EventSink`]. The [`EventBus`] fans events out
//! to handlers registered per [`EventKind`], in emission order.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use tracing::trace;

use crate::core::{Event, EventKind};

/// Fire-and-forget event destination
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

impl EventSink for Sender<Event> {
    fn emit(&mut self, event: Event) {
        if self.send(event).is_err() {
            trace!("event channel closed, dropping event");
        }
    }
}

/// Subscriber callback
pub type Handler = Box<dyn FnMut(&Event) + Send>;

/// Typed subscription registry
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Call every handler registered for the event's kind; returns how many ran
    pub fn deliver(&mut self, event: &Event) -> usize {
        match self.handlers.get_mut(&event.kind()) {
            Some(handlers) => {
                for handler in handlers.iter_mut() {
                    handler(event);
                }
                handlers.len()
            }
            None => 0,
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl EventSink for EventBus {
    fn emit(&mut self, event: Event) {
        self.deliver(&event);
    }
}
