use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<M> {
    pub topic: String,
    pub message: M,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("no subscriber for topic {0}")]
    NoSubscribers(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Topic-keyed fan-out of cloneable messages.
///
/// Subscribers pick either one topic or every topic (`subscribe_all`). A
/// publish reaches both groups; topics nobody listens to are dropped.
#[derive(Debug)]
pub struct PushBus<M: Clone> {
    topics: RwLock<HashMap<String, broadcast::Sender<Delivery<M>>>>,
    all: broadcast::Sender<Delivery<M>>,
    capacity: usize,
}

impl<M: Clone + Send + 'static> Default for PushBus<M> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<M: Clone + Send + 'static> PushBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            topics: RwLock::new(HashMap::new()),
            all: broadcast::channel(capacity).0,
            capacity,
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Delivery<M>> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Delivery<M>> {
        self.sender_for(topic).subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Delivery<M>> {
        self.all.subscribe()
    }

    /// Returns how many receivers saw the message. Zero is not an error.
    pub fn publish(&self, topic: &str, message: M) -> usize {
        let delivery = Delivery {
            topic: topic.to_string(),
            message,
        };
        let mut delivered = 0;
        let topic_sender = self.topics.read().get(topic).cloned();
        if let Some(sender) = topic_sender {
            delivered += sender.send(delivery.clone()).unwrap_or(0);
        }
        delivered += self.all.send(delivery).unwrap_or(0);
        delivered
    }

    /// Like `publish`, but reports an error when nobody received the message.
    pub fn publish_required(&self, topic: &str, message: M) -> BusResult<usize> {
        match self.publish(topic, message) {
            0 => Err(BusError::NoSubscribers(topic.to_string())),
            n => Ok(n),
        }
    }

    /// Drops topic channels that no longer have receivers.
    pub fn prune(&self) {
        self.topics
            .write()
            .retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn topic_subscriber_receives_only_its_topic() {
        let bus: PushBus<u32> = PushBus::new();
        let mut sessions = bus.subscribe("set_session");
        let mut waypoints = bus.subscribe("waypoints");

        assert_eq!(bus.publish("set_session", 7), 1);
        let got = sessions.recv().await.expect("delivery");
        assert_eq!(got.topic, "set_session");
        assert_eq!(got.message, 7);
        assert!(waypoints.try_recv().is_err());
    }

    #[tokio::test]
    async fn wildcard_subscriber_sees_every_topic() {
        let bus: PushBus<&'static str> = PushBus::new();
        let mut all = bus.subscribe_all();
        let mut one = bus.subscribe("legs");

        assert_eq!(bus.publish("legs", "a"), 2);
        assert_eq!(bus.publish("tracks", "b"), 1);

        assert_eq!(all.recv().await.unwrap().message, "a");
        assert_eq!(all.recv().await.unwrap().topic, "tracks");
        assert_eq!(one.recv().await.unwrap().message, "a");
    }

    #[test]
    fn publish_required_reports_missing_subscribers() {
        let bus: PushBus<u8> = PushBus::new();
        assert_eq!(
            bus.publish_required("nobody", 1),
            Err(BusError::NoSubscribers("nobody".into()))
        );
    }

    #[test]
    fn prune_drops_abandoned_topics() {
        let bus: PushBus<u8> = PushBus::new();
        let rx = bus.subscribe("a");
        let _keep = bus.subscribe("b");
        assert_eq!(bus.topic_count(), 2);
        drop(rx);
        bus.prune();
        assert_eq!(bus.topic_count(), 1);
    }
}
