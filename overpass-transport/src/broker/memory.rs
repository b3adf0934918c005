//! In-memory loopback broker.
//!
//! A process-local [`BrokerClient`] for tests and the node's loopback mode:
//! topics fan deliveries out to every subscription, deliveries stay unacked
//! until acknowledged, and unacknowledged deliveries can be redelivered to
//! exercise the at-least-once contract. Failure switches let tests fail
//! provisioning or send calls on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use overpass_core::{Ack, WireMessage};

use crate::broker::{
    BrokerClient, BrokerConsumer, BrokerConsumerPtr, BrokerError, BrokerProducer,
    BrokerProducerPtr, BrokerResult,
};
use crate::command::{Command, CommandSender};

/// Default redelivery deadline for unacknowledged deliveries.
pub const DEFAULT_REDELIVERY_AFTER: Duration = Duration::from_secs(5);

#[derive(Default)]
struct TopicState {
    subscriptions: HashMap<String, Subscription>,
}

struct Subscription {
    inbox: CommandSender,
    unacked: HashMap<String, Unacked>,
}

struct Unacked {
    message: WireMessage,
    delivered_at: Instant,
}

struct State {
    topics: HashMap<String, TopicState>,
    next_message_id: u64,
    fail_provisioning: bool,
    fail_sends: bool,
    redelivery_after: Duration,
}

/// Process-local pub/sub broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                topics: HashMap::new(),
                next_message_id: 0,
                fail_provisioning: false,
                fail_sends: false,
                redelivery_after: DEFAULT_REDELIVERY_AFTER,
            })),
        }
    }

    /// Set the redelivery deadline for unacknowledged deliveries.
    pub fn with_redelivery_after(self, deadline: Duration) -> Self {
        self.state.lock().unwrap().redelivery_after = deadline;
        self
    }

    /// Pre-create a topic, as a real deployment with standing topics would.
    pub fn seed_topic(&self, topic: &str) {
        self.state
            .lock()
            .unwrap()
            .topics
            .entry(topic.to_string())
            .or_default();
    }

    /// Make provisioning calls fail until switched back.
    pub fn set_fail_provisioning(&self, fail: bool) {
        self.state.lock().unwrap().fail_provisioning = fail;
    }

    /// Make publish and acknowledge calls fail until switched back.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Redeliver every delivery whose acknowledgement is overdue.
    ///
    /// Returns the number of redeliveries pushed.
    pub fn redeliver_overdue(&self, now: Instant) -> usize {
        let mut state = self.state.lock().unwrap();
        let deadline = state.redelivery_after;

        let mut redelivered = 0;
        for topic in state.topics.values_mut() {
            for sub in topic.subscriptions.values_mut() {
                for unacked in sub.unacked.values_mut() {
                    if now.saturating_duration_since(unacked.delivered_at) >= deadline {
                        sub.inbox.send(Command::Inbound(unacked.message.clone()));
                        unacked.delivered_at = now;
                        redelivered += 1;
                    }
                }
            }
        }
        redelivered
    }

    /// Total unacknowledged deliveries across all subscriptions.
    pub fn unacked_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .topics
            .values()
            .flat_map(|t| t.subscriptions.values())
            .map(|s| s.unacked.len())
            .sum()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn list_topics(&self) -> BrokerResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_provisioning {
            return Err(BrokerError::Call("list_topics failed".to_string()));
        }
        let mut topics: Vec<String> = state.topics.keys().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    async fn create_topic(&self, topic: &str) -> BrokerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_provisioning {
            return Err(BrokerError::Call("create_topic failed".to_string()));
        }
        state.topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn open_producer(&self, topic: &str) -> BrokerResult<BrokerProducerPtr> {
        let state = self.state.lock().unwrap();
        if state.fail_provisioning {
            return Err(BrokerError::Call("open_producer failed".to_string()));
        }
        if !state.topics.contains_key(topic) {
            return Err(BrokerError::NoSuchTopic(topic.to_string()));
        }
        Ok(Arc::new(MemoryProducer {
            topic: topic.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn open_consumer(
        &self,
        topic: &str,
        subscription: &str,
        inbox: CommandSender,
    ) -> BrokerResult<BrokerConsumerPtr> {
        let mut state = self.state.lock().unwrap();
        if state.fail_provisioning {
            return Err(BrokerError::Call("open_consumer failed".to_string()));
        }
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::NoSuchTopic(topic.to_string()))?;

        // Re-opening a subscription replaces its inbox (reconnect).
        topic_state.subscriptions.insert(
            subscription.to_string(),
            Subscription {
                inbox,
                unacked: HashMap::new(),
            },
        );

        Ok(Arc::new(MemoryConsumer {
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct MemoryProducer {
    topic: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(&self, message: &WireMessage) -> BrokerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(BrokerError::Call("send failed".to_string()));
        }

        let id = state.next_message_id;
        state.next_message_id += 1;

        let topic = state
            .topics
            .get_mut(&self.topic)
            .ok_or_else(|| BrokerError::NoSuchTopic(self.topic.clone()))?;

        let now = Instant::now();
        for sub in topic.subscriptions.values_mut() {
            let mut delivery = message.clone();
            delivery.message_id = format!("m-{id}");
            sub.unacked.insert(
                delivery.message_id.clone(),
                Unacked {
                    message: delivery.clone(),
                    delivered_at: now,
                },
            );
            sub.inbox.send(Command::Inbound(delivery));
        }
        Ok(())
    }
}

struct MemoryConsumer {
    topic: String,
    subscription: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn acknowledge(&self, ack: &Ack) -> BrokerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(BrokerError::Call("acknowledge failed".to_string()));
        }
        if let Some(topic) = state.topics.get_mut(&self.topic) {
            if let Some(sub) = topic.subscriptions.get_mut(&self.subscription) {
                sub.unacked.remove(&ack.message_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandQueue;
    use overpass_core::{encode, VirtualMessage};

    fn wire() -> WireMessage {
        encode(&VirtualMessage::data("a", "b", 1, vec![7]))
    }

    #[tokio::test]
    async fn test_provisioning_lifecycle() {
        let broker = MemoryBroker::new();
        assert!(broker.list_topics().await.unwrap().is_empty());

        broker.create_topic("t1").await.unwrap();
        broker.create_topic("t1").await.unwrap();
        assert_eq!(broker.list_topics().await.unwrap(), vec!["t1"]);

        assert!(broker.open_producer("t1").await.is_ok());
        assert!(matches!(
            broker.open_producer("ghost").await,
            Err(BrokerError::NoSuchTopic(_))
        ));
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscriptions() {
        let broker = MemoryBroker::new();
        broker.seed_topic("t");

        let mut inbox_a = CommandQueue::new();
        let mut inbox_b = CommandQueue::new();
        broker.open_consumer("t", "a", inbox_a.sender()).await.unwrap();
        broker.open_consumer("t", "b", inbox_b.sender()).await.unwrap();

        let producer = broker.open_producer("t").await.unwrap();
        producer.send(&wire()).await.unwrap();

        assert!(matches!(inbox_a.try_next(), Some(Command::Inbound(_))));
        assert!(matches!(inbox_b.try_next(), Some(Command::Inbound(_))));
        assert_eq!(broker.unacked_count(), 2);
    }

    #[tokio::test]
    async fn test_ack_suppresses_redelivery() {
        let broker = MemoryBroker::new().with_redelivery_after(Duration::ZERO);
        broker.seed_topic("t");

        let mut inbox = CommandQueue::new();
        let consumer = broker.open_consumer("t", "s", inbox.sender()).await.unwrap();
        let producer = broker.open_producer("t").await.unwrap();
        producer.send(&wire()).await.unwrap();

        let delivered = match inbox.try_next() {
            Some(Command::Inbound(m)) => m,
            other => panic!("unexpected: {:?}", other),
        };
        consumer.acknowledge(&Ack::for_message(&delivered)).await.unwrap();

        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.redeliver_overdue(Instant::now()), 0);
        assert!(inbox.try_next().is_none());
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered() {
        let broker = MemoryBroker::new().with_redelivery_after(Duration::ZERO);
        broker.seed_topic("t");

        let mut inbox = CommandQueue::new();
        broker.open_consumer("t", "s", inbox.sender()).await.unwrap();
        let producer = broker.open_producer("t").await.unwrap();
        producer.send(&wire()).await.unwrap();

        assert!(inbox.try_next().is_some());
        assert_eq!(broker.redeliver_overdue(Instant::now()), 1);
        assert!(matches!(inbox.try_next(), Some(Command::Inbound(_))));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let broker = MemoryBroker::new();
        broker.seed_topic("t");
        let producer = broker.open_producer("t").await.unwrap();

        broker.set_fail_provisioning(true);
        assert!(broker.list_topics().await.is_err());
        assert!(broker.create_topic("x").await.is_err());

        broker.set_fail_sends(true);
        assert!(producer.send(&wire()).await.is_err());

        broker.set_fail_provisioning(false);
        broker.set_fail_sends(false);
        assert!(broker.list_topics().await.is_ok());
        assert!(producer.send(&wire()).await.is_ok());
    }
}
