use tokio::sync::broadcast;

use crate::error::ErrorKind;

/// Apply lifecycle events. Caches subscribe and evict on completion instead
/// of running timers.
#[derive(Debug, Clone)]
pub enum Event {
    ApplyStarted {
        stack: String,
    },
    ApplyCompleted {
        stack: String,
        fingerprint: String,
    },
    ApplyFailed {
        stack: String,
        kind: ErrorKind,
    },
    StackMutated {
        stack: String,
    },
}

impl Event {
    pub fn stack(&self) -> &str {
        match self {
            Event::ApplyStarted { stack }
            | Event::ApplyCompleted { stack, .. }
            | Event::ApplyFailed { stack, .. }
            | Event::StackMutated { stack } => stack,
        }
    }
}

/// Process-wide broadcast bus for apply lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Dropped receivers are fine; publishing never fails.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
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

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::ApplyStarted { stack: "a".into() });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.stack(), "a");
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(Event::StackMutated { stack: "a".into() });
    }
}
