//! Event system for real-time notifications
//!
//! The event bus fans emotion results and session state changes out to
//! WebSocket clients and any other subscriber.

pub mod types;

pub use types::{EmotionEvent, SystemEvent};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting system events
///
/// Uses tokio's broadcast channel: every active subscriber receives every
/// event. Delivery is best-effort.
///
/// # Example
///
/// ```no_run
/// use emotion_relay::events::{EventBus, SystemEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::Error {
///     message: "example".to_string(),
/// });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("Received event: {:?}", event);
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: SystemEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events
    ///
    /// Returns a receiver that will receive all future events.
    /// The receiver uses a ring buffer, so if a subscriber falls too far
    /// behind, it will receive a `Lagged` error and miss some events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
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
    use crate::webrtc::ConnectionState;

    fn state_event() -> SystemEvent {
        SystemEvent::SessionStateChanged {
            peer_id: "peer".to_string(),
            track_id: Some("track".to_string()),
            state: ConnectionState::Connected,
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(state_event()), 1);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SystemEvent::SessionStateChanged { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(SystemEvent::Error {
            message: "test message".to_string(),
        });

        let event1 = rx1.recv().await.unwrap();
        let event2 = rx2.recv().await.unwrap();

        assert!(matches!(event1, SystemEvent::Error { .. }));
        assert!(matches!(event2, SystemEvent::Error { .. }));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        // Dropped, not an error
        assert_eq!(bus.publish(state_event()), 0);
    }
}
