use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing::debug;

use probe_common::{CloudEvent, TestId};
use probe_streaming::consumer::ConsumedRecord;
use probe_streaming::producer::ProduceAck;
use probe_streaming::{serde as streaming_serde, StreamingRegistry};

use crate::error::DslError;

/// Everything user step code needs to reach the streams of the currently
/// executing test. Installed by the runner before a run, cleared after;
/// runs are sequential so one slot suffices.
#[derive(Clone)]
pub struct DslContext {
    pub test_id: TestId,
    pub registry: StreamingRegistry,
    /// CloudEvents `source` attribute stamped on produced keys.
    pub event_source: String,
    /// Deadline for one produce/fetch exchange in async step code.
    pub ask_timeout: Duration,
}

static CONTEXT: Lazy<RwLock<Option<Arc<DslContext>>>> = Lazy::new(|| RwLock::new(None));

pub fn install(context: DslContext) {
    let mut slot = CONTEXT.write().expect("poisoned dsl context lock");
    *slot = Some(Arc::new(context));
}

pub fn clear() {
    let mut slot = CONTEXT.write().expect("poisoned dsl context lock");
    *slot = None;
}

fn context() -> Result<Arc<DslContext>, DslError> {
    CONTEXT
        .read()
        .expect("poisoned dsl context lock")
        .clone()
        .ok_or(DslError::NotInitialized)
}

/// Serialize and produce one event: CloudEvent key via the topic's key
/// subject, payload via `{topic}-{eventType}`.
pub async fn produce_event(
    topic: &str,
    event_type: &str,
    payload_version: &str,
    correlation_id: &str,
    payload: &serde_json::Value,
) -> Result<ProduceAck, DslError> {
    let context = context()?;
    let producer = context.registry.producer(context.test_id, topic)?;

    let key = CloudEvent::new(
        &context.event_source,
        event_type,
        topic,
        correlation_id,
        payload_version,
    );
    let key_bytes = streaming_serde::serialize_cloud_event_key(topic, &key)
        .await
        .map_err(probe_streaming::StreamingError::from)?;
    let value_bytes = streaming_serde::serialize_event_payload(topic, event_type, payload)
        .await
        .map_err(probe_streaming::StreamingError::from)?;

    debug!(topic = topic, correlation_id = correlation_id, "producing event");
    let ack = producer.produce(key_bytes, value_bytes, Vec::new()).await?;
    Ok(ack)
}

/// Fetch the first-arrived consumed record for a correlation id, or `None`
/// when nothing has arrived. Never waits; wrap in a poll for blocking
/// semantics.
pub async fn fetch_event(
    topic: &str,
    correlation_id: &str,
) -> Result<Option<ConsumedRecord>, DslError> {
    let context = context()?;
    let consumer = context.registry.consumer(context.test_id, topic)?;
    Ok(consumer.fetch(correlation_id).await?)
}

/// Synchronous produce for step code on the runner thread. Blocks only the
/// runner; the streams make progress on the main runtime.
pub fn produce_blocking(
    topic: &str,
    event_type: &str,
    payload_version: &str,
    correlation_id: &str,
    payload: &serde_json::Value,
) -> Result<ProduceAck, DslError> {
    futures::executor::block_on(produce_event(
        topic,
        event_type,
        payload_version,
        correlation_id,
        payload,
    ))
}

/// Synchronous fetch with a poll-with-timeout loop around the non-blocking
/// fetch, as the streaming contract prescribes.
pub fn fetch_blocking(
    topic: &str,
    correlation_id: &str,
    timeout: Duration,
) -> Result<Option<ConsumedRecord>, DslError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(record) = futures::executor::block_on(fetch_event(topic, correlation_id))? {
            return Ok(Some(record));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// The ask timeout of the installed context, for steps that poll.
pub fn ask_timeout() -> Duration {
    context()
        .map(|c| c.ask_timeout)
        .unwrap_or(Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[tokio::test]
    #[serial]
    async fn dsl_requires_an_installed_context() {
        clear();
        let result = fetch_event("t", "c1").await;
        assert!(matches!(result, Err(DslError::NotInitialized)));

        let result = produce_event("t", "X", "v1", "c1", &serde_json::json!({})).await;
        assert!(matches!(result, Err(DslError::NotInitialized)));
    }

    #[tokio::test]
    #[serial]
    async fn installed_context_without_streams_reports_actor_not_registered() {
        install(DslContext {
            test_id: TestId::generate(),
            registry: StreamingRegistry::new(),
            event_source: "test-probe".to_string(),
            ask_timeout: Duration::from_secs(1),
        });

        let result = fetch_event("t", "c1").await;
        assert!(matches!(
            result,
            Err(DslError::Streaming(
                probe_streaming::StreamingError::ActorNotRegistered { .. }
            ))
        ));

        clear();
    }
}
