//! Event stream emitter.
//!
//! One bounded multi-subscriber feed of [`RecorderEvent`]s. The publisher is
//! on the encoder/rotation critical path, so publishing never blocks and
//! never fails; a subscriber that falls behind loses the oldest events
//! instead of stalling the producer. Delivery is in publish order,
//! at-most-once, with no replay for late subscribers.

use crate::types::RecorderEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct EventEmitter {
    tx: broadcast::Sender<RecorderEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.tx.subscribe()
    }

    /// Publish one event. An event with no subscribers is simply dropped.
    pub fn publish(&self, event: RecorderEvent) {
        tracing::debug!(?event, "recorder event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();

        emitter.publish(RecorderEvent::Ready);
        emitter.publish(RecorderEvent::Started);
        emitter.publish(RecorderEvent::Stopped);

        assert!(matches!(rx.recv().await, Ok(RecorderEvent::Ready)));
        assert!(matches!(rx.recv().await, Ok(RecorderEvent::Started)));
        assert!(matches!(rx.recv().await, Ok(RecorderEvent::Stopped)));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_fail() {
        let emitter = EventEmitter::new(2);
        emitter.publish(RecorderEvent::Ready);
        emitter.publish(RecorderEvent::Error {
            kind: ErrorKind::Write,
            message: "nobody listening".into(),
        });
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let emitter = EventEmitter::new(2);
        let mut rx = emitter.subscribe();

        emitter.publish(RecorderEvent::Ready);
        emitter.publish(RecorderEvent::Started);
        emitter.publish(RecorderEvent::Stopped);

        // Capacity 2: Ready was evicted, the receiver observes the lag and
        // then catches up with the newest events.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert!(matches!(rx.recv().await, Ok(RecorderEvent::Started)));
        assert!(matches!(rx.recv().await, Ok(RecorderEvent::Stopped)));
    }
}
