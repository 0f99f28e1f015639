//! Typed, topic-based publish/subscribe event bus.
//!
//! One [`tokio::sync::broadcast`] channel per topic. Publishing never waits:
//! a slow subscriber lags and loses the oldest events, and the tick loop
//! does not notice.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | One [`TickTelemetry`][arbiter_types::TickTelemetry] per tick |
//! | [`Topic::SystemAlerts`] | Rejections, degradation transitions, component faults |
//! | [`Topic::Decisions`] | Preemptions and other ladder transitions |

use arbiter_types::{ArbiterError, Event};
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per topic before a lagging subscriber starts losing the
/// oldest ones.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-tick monitoring records.
    Telemetry,
    /// Policy rejections, degradation transitions and component faults.
    SystemAlerts,
    /// Scheduling decisions made by the preemption ladder.
    Decisions,
}

/// Handle to the three topic channels. Clones publish into and subscribe
/// from the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
    decisions: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus. `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (telemetry, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        let (decisions, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            system_alerts,
            decisions,
        }
    }

    /// Publish `event` to the given [`Topic`].
    ///
    /// Returns the number of receivers handed the event, or
    /// [`ArbiterError::Channel`] when nobody is subscribed.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, ArbiterError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| ArbiterError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Fire-and-forget publish. A topic without subscribers is a normal
    /// condition for telemetry and is ignored.
    pub fn emit(&self, topic: Topic, event: Event) {
        if let Err(e) = self.publish_to(topic, event) {
            trace!(error = %e, "event dropped");
        }
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::SystemAlerts => &self.system_alerts,
            Topic::Decisions => &self.decisions,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Err(Lagged(n))` means this subscriber fell behind and `n` events were
    /// dropped; `Err(Closed)` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant used by tests and the CLI summary printer.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::{EventPayload, TickTelemetry};

    fn tick_event(tick: u64) -> Event {
        Event::new(
            "arbiter-middleware::test",
            EventPayload::Tick(TickTelemetry { tick, ..Default::default() }),
        )
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut s1 = bus.subscribe_to(Topic::Telemetry);
        let mut s2 = bus.subscribe_to(Topic::Telemetry);

        let event = tick_event(1);
        bus.publish_to(Topic::Telemetry, event.clone())?;

        assert_eq!(s1.recv().await?.id, event.id);
        assert_eq!(s2.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _telemetry = bus.subscribe_to(Topic::Telemetry);

        bus.publish_to(Topic::Telemetry, tick_event(2))?;

        let result = tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "SystemAlerts must not see Telemetry traffic");
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_an_error_but_emit_is_silent() {
        let bus = EventBus::default();
        assert!(bus.publish_to(Topic::Decisions, tick_event(3)).is_err());
        bus.emit(Topic::Decisions, tick_event(3));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_publisher() {
        let bus = EventBus::new(8);
        let mut slow = bus.subscribe_to(Topic::Telemetry);
        for i in 0..100 {
            bus.emit(Topic::Telemetry, tick_event(i));
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged, got {result:?}"
        );
    }
}
