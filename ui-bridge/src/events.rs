use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::logging::category_events;

pub const CATALOG_CHANGE_EVENT: &str = "CatalogChangeEvent";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One notification pushed to every open `/localEvents` stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub data: String,
}

#[derive(Serialize)]
struct CatalogChangePayload<'a> {
    databases: &'a [String],
}

impl Event {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn catalog_change(databases: &[String]) -> Self {
        let data = serde_json::to_string(&CatalogChangePayload { databases })
            .unwrap_or_else(|_| "{}".to_string());
        Self::new(CATALOG_CHANGE_EVENT, data)
    }
}

/// Fan-out hub for server-sent events.
///
/// Delivery is best-effort: a subscriber only sees events published while it is
/// subscribed. Closing drops the sender, which ends every subscriber's stream and makes
/// later subscriptions fail immediately.
pub struct EventDispatcher {
    sender: Mutex<Option<broadcast::Sender<Event>>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    pub fn subscribe(&self) -> Option<Subscriber> {
        let guard = self.sender.lock().expect("event dispatcher lock poisoned");
        guard.as_ref().map(|sender| Subscriber {
            receiver: sender.subscribe(),
        })
    }

    /// Returns how many subscribers the event was handed to.
    pub fn publish(&self, event: Event) -> usize {
        let guard = self.sender.lock().expect("event dispatcher lock poisoned");
        let Some(sender) = guard.as_ref() else {
            return 0;
        };
        sender.send(event).unwrap_or(0)
    }

    pub fn close(&self) -> bool {
        let mut guard = self.sender.lock().expect("event dispatcher lock poisoned");
        let Some(sender) = guard.take() else {
            return false;
        };
        info!(
            "{} dispatcher closed with {} subscriber(s)",
            category_events(),
            sender.receiver_count()
        );
        true
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .expect("event dispatcher lock poisoned")
            .is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .expect("event dispatcher lock poisoned")
            .as_ref()
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }
}

pub struct Subscriber {
    receiver: broadcast::Receiver<Event>,
}

impl Subscriber {
    /// Waits for the next event. `None` means the dispatcher was closed and the stream
    /// should end.
    pub async fn wait_event(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "{} subscriber lagged, skipped {skipped} event(s)",
                        category_events()
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
