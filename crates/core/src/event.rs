//! Domain event system. Observe the loop without coupling to it.
//!
//! The agent loop publishes an event at each transition of a cycle.
//! Subscribers (logging sinks, tests, a UI) filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A task was accepted for a conversation
    RequestReceived {
        conversation_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The loop is about to ask the model for a decision
    RoundStarted {
        conversation_id: String,
        round: u32,
        tools_available: usize,
        timestamp: DateTime<Utc>,
    },

    /// The model answered a round
    DecisionMade {
        conversation_id: String,
        model: String,
        /// "final_text" or "tool_calls"
        decision: String,
        tool_calls: usize,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool call finished (successfully or not)
    ToolExecuted {
        conversation_id: String,
        call_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A loop cycle reached a terminal state
    LoopFinished {
        conversation_id: String,
        rounds: u32,
        /// "done" or the error kind
        outcome: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            conversation_id: "c".into(),
            call_id: "call_1".into(),
            tool_name: "search".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "search");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::LoopFinished {
            conversation_id: "c".into(),
            rounds: 1,
            outcome: "done".into(),
            timestamp: Utc::now(),
        });
    }
}
