// Engine notifications (evictions, pattern registration, index rebuilds)

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::cache::CacheCategory;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A state transition in one of the engines.
///
/// Exactly one event is published per transition, after the new state is
/// visible to subsequent reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    CacheEvicted {
        /// `None` for the main cache
        category: Option<CacheCategory>,
        key: String,
    },
    PatternRegistered {
        id: String,
        compiled: bool,
    },
    PatternUnregistered {
        id: String,
    },
    IndexUpdated {
        generation: u64,
        symbols: usize,
        relationships: usize,
    },
}

/// Broadcast channel that components publish their events on
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::PatternUnregistered { id: "x".into() });
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::PatternRegistered { id: "a".into(), compiled: true });
        bus.publish(EngineEvent::PatternUnregistered { id: "a".into() });

        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::PatternRegistered { id: "a".into(), compiled: true }
        );
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::PatternUnregistered { id: "a".into() });
        assert!(rx.try_recv().is_err());
    }
}
