use std::time::Duration;

use metrics::counter;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use probe_common::KafkaSecurityDirective;

use crate::conn::client_config;
use crate::error::StreamingError;

const MAILBOX_CAPACITY: usize = 64;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ProducerStreamConfig {
    pub bootstrap_servers: String,
    pub security: KafkaSecurityDirective,
    pub message_timeout_ms: u32,
    pub linger_ms: u32,
}

/// Broker acknowledgement for one produced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceAck {
    pub partition: i32,
    pub offset: i64,
}

enum ProducerCommand {
    Produce {
        key: Vec<u8>,
        value: Vec<u8>,
        headers: Vec<(String, Vec<u8>)>,
        reply: oneshot::Sender<Result<ProduceAck, StreamingError>>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// Cheap-clone handle to one producer stream agent. Registered in the
/// streaming registry for the duration of Testing.
#[derive(Clone)]
pub struct ProducerHandle {
    topic: String,
    tx: mpsc::Sender<ProducerCommand>,
}

impl ProducerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Produce pre-serialized key and value bytes; the caller runs them
    /// through the serialization dispatcher first.
    pub async fn produce(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        headers: Vec<(String, Vec<u8>)>,
    ) -> Result<ProduceAck, StreamingError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ProducerCommand::Produce {
                key,
                value,
                headers,
                reply,
            })
            .await
            .map_err(|_| StreamingError::StreamGone(self.topic.clone()))?;
        response
            .await
            .map_err(|_| StreamingError::StreamGone(self.topic.clone()))?
    }

    /// Flush and stop the agent. Returns once the flush finished.
    pub async fn stop(&self) {
        let (done, finished) = oneshot::channel();
        if self.tx.send(ProducerCommand::Stop { done }).await.is_ok() {
            _ = finished.await;
        }
    }
}

/// Open the Kafka producer for one topic directive and spawn its agent.
pub fn spawn_producer(
    topic: String,
    config: ProducerStreamConfig,
) -> Result<ProducerHandle, StreamingError> {
    let mut client_config = client_config(&config.bootstrap_servers, &config.security);
    client_config
        .set("message.timeout.ms", config.message_timeout_ms.to_string())
        .set("linger.ms", config.linger_ms.to_string());
    debug!(topic = %topic, "rdkafka producer configuration: {:?}", client_config);

    let producer: FutureProducer = client_config.create()?;
    info!(topic = %topic, brokers = %config.bootstrap_servers, "producer stream up");

    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    tokio::spawn(run_producer(topic.clone(), producer, rx));

    Ok(ProducerHandle { topic, tx })
}

async fn run_producer(
    topic: String,
    producer: FutureProducer,
    mut mailbox: mpsc::Receiver<ProducerCommand>,
) {
    while let Some(command) = mailbox.recv().await {
        match command {
            ProducerCommand::Produce {
                key,
                value,
                headers,
                reply,
            } => {
                let result = send_one(&producer, &topic, key, value, headers).await;
                match &result {
                    Ok(_) => counter!("probe_events_produced_total", "topic" => topic.clone())
                        .increment(1),
                    Err(e) => {
                        error!(topic = %topic, "failed to produce event: {}", e);
                        counter!("probe_produce_errors_total", "topic" => topic.clone())
                            .increment(1);
                    }
                }
                drop(reply.send(result));
            }
            ProducerCommand::Stop { done } => {
                if let Err(e) = producer.flush(FLUSH_TIMEOUT) {
                    error!(topic = %topic, "failed to flush producer on stop: {}", e);
                }
                info!(topic = %topic, "producer stream stopped");
                _ = done.send(());
                break;
            }
        }
    }
}

async fn send_one(
    producer: &FutureProducer,
    topic: &str,
    key: Vec<u8>,
    value: Vec<u8>,
    headers: Vec<(String, Vec<u8>)>,
) -> Result<ProduceAck, StreamingError> {
    let mut record = FutureRecord::to(topic).key(&key).payload(&value);
    if !headers.is_empty() {
        let mut owned = OwnedHeaders::new();
        for (header_key, header_value) in &headers {
            owned = owned.insert(Header {
                key: header_key,
                value: Some(header_value.as_slice()),
            });
        }
        record = record.headers(owned);
    }

    let delivery = match producer.send_result(record) {
        Ok(delivery) => delivery,
        Err((e, _)) => {
            return Err(StreamingError::Produce {
                topic: topic.to_string(),
                cause: e.to_string(),
            })
        }
    };

    match delivery.await {
        Ok(Ok((partition, offset))) => Ok(ProduceAck { partition, offset }),
        Ok(Err((e, _))) => Err(StreamingError::Produce {
            topic: topic.to_string(),
            cause: e.to_string(),
        }),
        // Cancelled while waiting for the broker, typically on timeout
        Err(_) => Err(StreamingError::Produce {
            topic: topic.to_string(),
            cause: "delivery cancelled before broker acknowledgement".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;

    use probe_common::TopicRole;

    use super::*;
    use crate::conn::plaintext_security;

    fn mocked_config(
        cluster: &MockCluster<'_, DefaultProducerContext>,
        topic: &str,
    ) -> ProducerStreamConfig {
        ProducerStreamConfig {
            bootstrap_servers: cluster.bootstrap_servers(),
            security: plaintext_security(topic, TopicRole::Producer),
            message_timeout_ms: 5000,
            linger_ms: 0,
        }
    }

    #[tokio::test]
    async fn produces_against_a_mocked_cluster() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        cluster
            .create_topic("t-events", 1, 1)
            .expect("failed to create topic");

        let handle = spawn_producer("t-events".to_string(), mocked_config(&cluster, "t-events"))
            .expect("failed to spawn producer");

        let ack = handle
            .produce(
                b"key".to_vec(),
                b"value".to_vec(),
                vec![("trace".to_string(), b"abc".to_vec())],
            )
            .await
            .expect("produce failed");
        assert!(ack.offset >= 0);

        handle.stop().await;

        // The agent is gone after stop; produce now reports it
        let result = handle.produce(b"k".to_vec(), b"v".to_vec(), Vec::new()).await;
        assert!(matches!(result, Err(StreamingError::StreamGone(_))));
    }
}
