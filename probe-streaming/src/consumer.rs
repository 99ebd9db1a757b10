use std::collections::{HashMap, VecDeque};

use metrics::counter;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use probe_common::directive::EventFilter;
use probe_common::{CloudEvent, KafkaSecurityDirective};

use crate::conn::client_config;
use crate::error::StreamingError;
use crate::serde::deserialize_cloud_event_key;

const MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ConsumerStreamConfig {
    pub bootstrap_servers: String,
    pub security: KafkaSecurityDirective,
    /// Test-scoped group id so runs never share offsets.
    pub group_id: String,
    pub event_filters: Vec<EventFilter>,
}

/// One record admitted into the consumed-event store: decoded CloudEvent
/// key, raw value bytes, and the record headers.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub key: CloudEvent,
    pub value: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
}

enum ConsumerCommand {
    Fetch {
        correlation_id: String,
        reply: oneshot::Sender<Option<ConsumedRecord>>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// Cheap-clone handle to one consumer stream agent.
#[derive(Clone)]
pub struct ConsumerHandle {
    topic: String,
    tx: mpsc::Sender<ConsumerCommand>,
}

impl ConsumerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Return the first-arrived record for a correlation id and remove it
    /// from the store, or `None` when nothing has arrived yet. Never blocks
    /// waiting for a record; poll-with-timeout is the caller's concern.
    pub async fn fetch(
        &self,
        correlation_id: &str,
    ) -> Result<Option<ConsumedRecord>, StreamingError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ConsumerCommand::Fetch {
                correlation_id: correlation_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| StreamingError::StreamGone(self.topic.clone()))?;
        response
            .await
            .map_err(|_| StreamingError::StreamGone(self.topic.clone()))
    }

    /// Unsubscribe and stop the agent.
    pub async fn stop(&self) {
        let (done, finished) = oneshot::channel();
        if self.tx.send(ConsumerCommand::Stop { done }).await.is_ok() {
            _ = finished.await;
        }
    }
}

/// Subscribe to one topic and spawn the consumer agent. Incoming records
/// are keyed by the CloudEvent `correlationid` after passing the
/// directive's event filters.
pub fn spawn_consumer(
    topic: String,
    config: ConsumerStreamConfig,
) -> Result<ConsumerHandle, StreamingError> {
    let mut client_config = client_config(&config.bootstrap_servers, &config.security);
    client_config
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "latest")
        .set("session.timeout.ms", "6000");
    debug!(topic = %topic, group = %config.group_id, "rdkafka consumer configuration");

    let consumer: StreamConsumer = client_config.create()?;
    consumer.subscribe(&[topic.as_str()])?;
    info!(topic = %topic, group = %config.group_id, "consumer stream up");

    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    tokio::spawn(run_consumer(topic.clone(), consumer, config.event_filters, rx));

    Ok(ConsumerHandle { topic, tx })
}

async fn run_consumer(
    topic: String,
    consumer: StreamConsumer,
    filters: Vec<EventFilter>,
    mut mailbox: mpsc::Receiver<ConsumerCommand>,
) {
    let mut store = ConsumedStore::default();

    loop {
        tokio::select! {
            command = mailbox.recv() => match command {
                Some(ConsumerCommand::Fetch { correlation_id, reply }) => {
                    drop(reply.send(store.fetch(&correlation_id)));
                }
                Some(ConsumerCommand::Stop { done }) => {
                    consumer.unsubscribe();
                    info!(topic = %topic, "consumer stream stopped");
                    _ = done.send(());
                    return;
                }
                None => {
                    consumer.unsubscribe();
                    return;
                }
            },
            incoming = consumer.recv() => match incoming {
                Ok(message) => {
                    let Some(key_bytes) = message.key() else {
                        warn!(topic = %topic, "skipping record without a key");
                        continue;
                    };
                    let key = match deserialize_cloud_event_key(&topic, key_bytes).await {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(topic = %topic, "skipping undecodable record key: {}", e);
                            counter!("probe_consume_decode_errors_total", "topic" => topic.clone())
                                .increment(1);
                            continue;
                        }
                    };
                    if !matches_filters(&filters, &key) {
                        // Filtered records are dropped silently
                        continue;
                    }

                    let headers = message
                        .headers()
                        .map(|headers| {
                            headers
                                .iter()
                                .map(|h| {
                                    (
                                        h.key.to_string(),
                                        h.value.map(|v| v.to_vec()).unwrap_or_default(),
                                    )
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    let record = ConsumedRecord {
                        value: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
                        headers,
                        key,
                    };

                    counter!("probe_events_consumed_total", "topic" => topic.clone()).increment(1);
                    store.insert(record);
                }
                Err(e) => {
                    warn!(topic = %topic, "consumer stream error: {}", e);
                }
            },
        }
    }
}

/// A consumer matches when the key's `(type, payloadversion)` appears in the
/// directive's filter list; an empty list accepts everything.
pub(crate) fn matches_filters(filters: &[EventFilter], key: &CloudEvent) -> bool {
    filters.is_empty()
        || filters
            .iter()
            .any(|f| key.matches(&f.event_type, &f.payload_version))
}

/// In-agent store of consumed records, keyed by correlation id. Arrival
/// order is preserved per key: fetch pops the oldest record and leaves any
/// later arrivals for subsequent fetches.
#[derive(Default)]
pub(crate) struct ConsumedStore {
    entries: HashMap<String, VecDeque<ConsumedRecord>>,
}

impl ConsumedStore {
    pub(crate) fn insert(&mut self, record: ConsumedRecord) {
        self.entries
            .entry(record.key.correlationid.clone())
            .or_default()
            .push_back(record);
    }

    pub(crate) fn fetch(&mut self, correlation_id: &str) -> Option<ConsumedRecord> {
        let queue = self.entries.get_mut(correlation_id)?;
        let record = queue.pop_front();
        if queue.is_empty() {
            self.entries.remove(correlation_id);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(correlation_id: &str, payload: &[u8]) -> ConsumedRecord {
        ConsumedRecord {
            key: CloudEvent::new("probe", "X", "s", correlation_id, "v1"),
            value: payload.to_vec(),
            headers: Vec::new(),
        }
    }

    fn filter(event_type: &str, payload_version: &str) -> EventFilter {
        EventFilter {
            event_type: event_type.to_string(),
            payload_version: payload_version.to_string(),
        }
    }

    #[test]
    fn fetch_before_any_arrival_returns_none() {
        let mut store = ConsumedStore::default();
        assert!(store.fetch("c1").is_none());
    }

    #[test]
    fn fetch_returns_the_first_arrival_and_keeps_the_second() {
        let mut store = ConsumedStore::default();
        store.insert(record("c1", b"first"));
        store.insert(record("c1", b"second"));
        store.insert(record("c2", b"other"));

        let first = store.fetch("c1").expect("expected the first record");
        assert_eq!(first.value, b"first");

        // The second arrival remains until a subsequent fetch
        let second = store.fetch("c1").expect("expected the second record");
        assert_eq!(second.value, b"second");
        assert!(store.fetch("c1").is_none());

        // Other correlation ids are untouched
        assert!(store.fetch("c2").is_some());
    }

    #[test]
    fn empty_filter_list_accepts_everything() {
        let key = CloudEvent::new("probe", "Anything", "s", "c", "v9");
        assert!(matches_filters(&[], &key));
    }

    #[test]
    fn filters_match_on_type_and_version_pairs() {
        let key = CloudEvent::new("probe", "X", "s", "c", "v1");
        assert!(matches_filters(&[filter("X", "v1")], &key));
        assert!(matches_filters(&[filter("Y", "v2"), filter("X", "v1")], &key));
        assert!(!matches_filters(&[filter("X", "v2")], &key));
        assert!(!matches_filters(&[filter("Y", "v1")], &key));
    }
}
