use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use probe_common::{TestId, TopicRole};

use crate::consumer::ConsumerHandle;
use crate::error::StreamingError;
use crate::producer::ProducerHandle;

type RegistryKey = (TestId, String);

/// Process-wide routing table from `(testId, topic)` to the stream handles
/// user step code drives. Entries are inserted when a test reaches Loaded
/// and removed in ShuttingDown, so contention is low; at most one producer
/// and one consumer exist per key.
#[derive(Clone, Default)]
pub struct StreamingRegistry {
    producers: Arc<DashMap<RegistryKey, ProducerHandle>>,
    consumers: Arc<DashMap<RegistryKey, ConsumerHandle>>,
}

impl StreamingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_producer(&self, test_id: TestId, handle: ProducerHandle) {
        let key = (test_id, handle.topic().to_string());
        if self.producers.insert(key, handle).is_some() {
            warn!(test_id = %test_id, "replaced an existing producer registration");
        }
    }

    pub fn register_consumer(&self, test_id: TestId, handle: ConsumerHandle) {
        let key = (test_id, handle.topic().to_string());
        if self.consumers.insert(key, handle).is_some() {
            warn!(test_id = %test_id, "replaced an existing consumer registration");
        }
    }

    pub fn producer(&self, test_id: TestId, topic: &str) -> Result<ProducerHandle, StreamingError> {
        self.producers
            .get(&(test_id, topic.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or(StreamingError::ActorNotRegistered {
                test_id,
                topic: topic.to_string(),
                role: TopicRole::Producer,
            })
    }

    pub fn consumer(&self, test_id: TestId, topic: &str) -> Result<ConsumerHandle, StreamingError> {
        self.consumers
            .get(&(test_id, topic.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or(StreamingError::ActorNotRegistered {
                test_id,
                topic: topic.to_string(),
                role: TopicRole::Consumer,
            })
    }

    /// Remove every registration for a test, returning the handles so the
    /// owner can stop the agents after unregistering.
    pub fn remove_test(&self, test_id: TestId) -> (Vec<ProducerHandle>, Vec<ConsumerHandle>) {
        let producer_keys: Vec<RegistryKey> = self
            .producers
            .iter()
            .filter(|entry| entry.key().0 == test_id)
            .map(|entry| entry.key().clone())
            .collect();
        let consumer_keys: Vec<RegistryKey> = self
            .consumers
            .iter()
            .filter(|entry| entry.key().0 == test_id)
            .map(|entry| entry.key().clone())
            .collect();

        let producers = producer_keys
            .iter()
            .filter_map(|key| self.producers.remove(key).map(|(_, handle)| handle))
            .collect();
        let consumers = consumer_keys
            .iter()
            .filter_map(|key| self.consumers.remove(key).map(|(_, handle)| handle))
            .collect();

        (producers, consumers)
    }

    /// True when no stream is registered for the test (used to verify
    /// cleanup after ShuttingDown).
    pub fn is_empty_for(&self, test_id: TestId) -> bool {
        !self.producers.iter().any(|entry| entry.key().0 == test_id)
            && !self.consumers.iter().any(|entry| entry.key().0 == test_id)
    }
}

#[cfg(test)]
mod tests {
    use probe_common::TopicRole;
    use rdkafka::mocking::MockCluster;

    use super::*;
    use crate::conn::plaintext_security;
    use crate::producer::{spawn_producer, ProducerStreamConfig};

    fn spawn_test_producer(
        cluster: &MockCluster<'_, rdkafka::producer::DefaultProducerContext>,
        topic: &str,
    ) -> ProducerHandle {
        spawn_producer(
            topic.to_string(),
            ProducerStreamConfig {
                bootstrap_servers: cluster.bootstrap_servers(),
                security: plaintext_security(topic, TopicRole::Producer),
                message_timeout_ms: 5000,
                linger_ms: 0,
            },
        )
        .expect("failed to spawn producer")
    }

    #[tokio::test]
    async fn missing_entries_are_actor_not_registered() {
        let registry = StreamingRegistry::new();
        let test_id = TestId::generate();

        match registry.producer(test_id, "t") {
            Err(StreamingError::ActorNotRegistered { topic, role, .. }) => {
                assert_eq!(topic, "t");
                assert_eq!(role, TopicRole::Producer);
            }
            other => panic!("expected ActorNotRegistered, got {:?}", other.err()),
        }
        assert!(matches!(
            registry.consumer(test_id, "t"),
            Err(StreamingError::ActorNotRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn register_lookup_and_remove() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster.create_topic("t", 1, 1).expect("failed to create topic");

        let registry = StreamingRegistry::new();
        let test_id = TestId::generate();
        let other_test = TestId::generate();

        registry.register_producer(test_id, spawn_test_producer(&cluster, "t"));
        assert!(registry.producer(test_id, "t").is_ok());
        assert!(registry.producer(other_test, "t").is_err());
        assert!(!registry.is_empty_for(test_id));

        let (producers, consumers) = registry.remove_test(test_id);
        assert_eq!(producers.len(), 1);
        assert!(consumers.is_empty());
        assert!(registry.is_empty_for(test_id));
        assert!(registry.producer(test_id, "t").is_err());

        for producer in producers {
            producer.stop().await;
        }
    }
}
