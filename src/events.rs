//! Gateway fan-out for chat events.
//!
//! A chat client's gateway emits every [`ChatEvent`] via [`EventBus::emit`];
//! the session registry's dispatcher (and anything else interested) listens
//! via [`EventBus::subscribe`]. Built on [`tokio::sync::broadcast`] so
//! multiple listeners can react independently.

use tokio::sync::broadcast;

use crate::chat::ChatEvent;

/// A broadcast channel that any component can emit to or subscribe from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: ChatEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events. Returns a receiver that yields all
    /// future events (does not replay past ones).
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{IncomingMessage, SurfaceId, TriggerEvent};

    fn message(content: &str) -> ChatEvent {
        ChatEvent::MessageCreated(IncomingMessage {
            channel: 1,
            id: 2,
            author: 3,
            content: content.to_string(),
        })
    }

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(message("7"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, message("7"));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let trigger = ChatEvent::TriggerAdded(TriggerEvent {
            surface: SurfaceId::new(1, 10),
            user: 3,
            symbol: "\u{25b6}".to_string(),
        });
        bus.emit(trigger.clone());

        assert_eq!(rx1.recv().await.unwrap(), trigger);
        assert_eq!(rx2.recv().await.unwrap(), trigger);
    }

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(message("hi")), 0);
    }

    #[test]
    fn emit_with_subscriber_returns_count() {
        let bus = EventBus::default();
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();

        assert_eq!(bus.emit(message("hi")), 2);
    }
}
