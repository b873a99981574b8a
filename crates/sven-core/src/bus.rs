// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Process-wide publish/subscribe registry of [`crate::events::AgentEvent`]
//! (§4.1). `publish` returns only after every subscriber's channel send has
//! been attempted (synchronous-from-publisher semantics); it does not await
//! any work a subscriber schedules after receiving. Subscribers are
//! expected to be added once at startup — there is no ordering guarantee
//! across topics, only within a single publisher's sequence of publishes to
//! one topic.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::events::AgentEvent;

/// A handle a subscriber uses to receive events for the topics it
/// registered for.
pub type Subscription = mpsc::UnboundedReceiver<AgentEvent>;

/// The bus has no backpressure (§4.1): subscribers get an unbounded
/// channel and are responsible for buffering/dropping on their own if they
/// fall behind. A subscriber whose receiver has been dropped is pruned
/// lazily on the next publish to its topic.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<&'static str, Vec<mpsc::UnboundedSender<AgentEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a single topic (see [`AgentEvent::topic`] for the set
    /// used by the core: `text-delta`, `reasoning-delta`, `tool-start`,
    /// `tool-complete`, `tool-result`, `finish`, `error`).
    pub fn subscribe(&self, topic: &'static str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().entry(topic).or_default().push(tx);
        rx
    }

    /// Subscribe to every event regardless of topic — used by the watch
    /// server, which forwards the full bus to external observers.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(ALL_TOPICS_KEY)
    }

    /// Deliver `event` to every subscriber of its topic and to every
    /// `subscribe_all` subscriber. Dead channels (receiver dropped) are
    /// removed from the registry as they're discovered.
    pub fn publish(&self, event: AgentEvent) {
        let topic = event.topic();
        let mut subs = self.subscribers.lock().unwrap();
        for key in [topic, ALL_TOPICS_KEY] {
            if let Some(list) = subs.get_mut(key) {
                list.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.lock().unwrap().get(topic).map(|v| v.len()).unwrap_or(0)
    }
}

const ALL_TOPICS_KEY: &str = "__all__";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event_on_matching_topic() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("text-delta");
        bus.publish(AgentEvent::TextDelta("hi".into()));
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, AgentEvent::TextDelta(t) if t == "hi"));
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_topics() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("text-delta");
        bus.publish(AgentEvent::TurnComplete);
        // TurnComplete is on the "finish" topic; give the channel a chance
        // and confirm nothing arrived.
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_all_receives_every_topic() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_all();
        bus.publish(AgentEvent::TextDelta("a".into()));
        bus.publish(AgentEvent::TurnComplete);
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn multiple_subscribers_on_same_topic_all_receive() {
        let bus = EventBus::new();
        let mut s1 = bus.subscribe("finish");
        let mut s2 = bus.subscribe("finish");
        bus.publish(AgentEvent::TurnComplete);
        assert!(s1.recv().await.is_some());
        assert!(s2.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_publish() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe("finish");
            assert_eq!(bus.subscriber_count("finish"), 1);
        }
        bus.publish(AgentEvent::TurnComplete);
        assert_eq!(bus.subscriber_count("finish"), 0);
    }
}
