//! In-process event bus for runtime lifecycle notifications
//!
//! Publishing never blocks: each subscriber has a bounded queue and an event
//! that does not fit is dropped for that subscriber with a warning.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::entities::event::WILDCARD;
use crate::domain::entities::Event;

pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Event>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receive every future event of `event_type`; `"*"` receives everything
    pub fn subscribe(&self, event_type: &str) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        match self.subscribers.lock() {
            Ok(mut subs) => subs.entry(event_type.to_string()).or_default().push(tx),
            Err(_) => tracing::error!(event_type, "Event bus lock poisoned, subscription dropped"),
        }
        rx
    }

    /// Publish to matching subscribers; returns how many accepted the event
    pub fn emit(&self, event: Event) -> usize {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(_) => {
                tracing::error!(event_type = %event.event_type, "Event bus lock poisoned, event dropped");
                return 0;
            }
        };

        let mut delivered = 0;
        for key in [event.event_type.as_str(), WILDCARD] {
            let Some(senders) = subs.get_mut(key) else {
                continue;
            };
            senders.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(event_type = %event.event_type, "Event bus subscriber queue full, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
            if event.event_type == WILDCARD {
                break;
            }
        }
        subs.retain(|_, senders| !senders.is_empty());
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
