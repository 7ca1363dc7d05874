//! Event bus for enrichment campaigns
//!
//! Tokio broadcast pub/sub. Publishing never fails: with no subscribers the
//! event is simply dropped, and slow subscribers see `Lagged` rather than
//! blocking the orchestrator.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::EnrichmentEvent;
use crate::types::Tier;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<EnrichmentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event; returns how many subscribers received it
    pub fn publish(&self, event: EnrichmentEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                count
            }
            Err(_) => 0,
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<EnrichmentEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events matching `filter`
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub target_id: Option<String>,
    pub tier: Option<Tier>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target_id: &str) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &EnrichmentEvent) -> bool {
        if let Some(ref tid) = self.target_id {
            if event.target_id() != Some(tid.as_str()) {
                return false;
            }
        }

        if let Some(tier) = self.tier {
            if event.tier() != Some(tier) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<EnrichmentEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<EnrichmentEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<EnrichmentEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, TerminalFlag};
    use chrono::Utc;

    fn recorded(target: &str, tier: Tier) -> EnrichmentEvent {
        EnrichmentEvent::AttemptRecorded {
            target_id: target.to_string(),
            attempt_id: "a-1".to_string(),
            tier,
            category: Category::NotFound,
            batch_id: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(recorded("d-1", Tier::Probe)), 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "attempt_recorded");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(recorded("d-1", Tier::Probe)), 0);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .target("d-1")
            .types(vec!["attempt_recorded", "target_finished"]);

        let finished_elsewhere = EnrichmentEvent::TargetFinished {
            target_id: "d-2".to_string(),
            tier: Tier::Probe,
            flag: TerminalFlag::Succeeded,
            reason: "accepted".to_string(),
            timestamp: Utc::now(),
        };

        assert!(filter.matches(&recorded("d-1", Tier::Rendered)));
        assert!(!filter.matches(&recorded("d-2", Tier::Rendered)));
        assert!(!filter.matches(&finished_elsewhere));

        let tier_filter = EventFilter::new().tier(Tier::Rendered);
        assert!(tier_filter.matches(&recorded("d-9", Tier::Rendered)));
        assert!(!tier_filter.matches(&recorded("d-9", Tier::Probe)));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().target("d-7"));

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            publisher.publish(recorded("d-1", Tier::Probe));
            publisher.publish(recorded("d-7", Tier::Document));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.target_id(), Some("d-7"));
        assert_eq!(event.tier(), Some(Tier::Document));
    }
}
