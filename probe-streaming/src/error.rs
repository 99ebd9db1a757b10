use thiserror::Error;

use probe_common::{TestId, TopicRole};

/// Enumeration of errors for the streaming layer. Produce and fetch
/// failures surface to the calling step code as Nacks; they never tear the
/// test down on their own.
#[derive(Error, Debug)]
pub enum StreamingError {
    #[error("no {role} stream registered for test {test_id} topic {topic}")]
    ActorNotRegistered {
        test_id: TestId,
        topic: String,
        role: TopicRole,
    },
    #[error("failed to produce to {topic}: {cause}")]
    Produce { topic: String, cause: String },
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("stream agent for {0} is no longer running")]
    StreamGone(String),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}

impl StreamingError {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamingError::ActorNotRegistered { .. } => "ActorNotRegistered",
            StreamingError::Produce { .. } => "KafkaProduce",
            StreamingError::Kafka(_) => "KafkaClient",
            StreamingError::StreamGone(_) => "StreamGone",
            StreamingError::Serde(e) => e.kind(),
        }
    }
}

/// Enumeration of errors for the serialization dispatcher. These propagate
/// to the DSL caller; a scenario that trips one fails.
#[derive(Error, Debug)]
pub enum SerdeError {
    #[error("schema registry client is not initialized")]
    SchemaRegistryNotInitialized,
    #[error("no schema registered for subject {0}")]
    SchemaNotFound(String),
    #[error("unsupported schema type {schema_type} for subject {subject}")]
    UnsupportedSchemaType {
        subject: String,
        schema_type: String,
    },
    #[error("schema registry error for subject {subject}: {message}")]
    Registry { subject: String, message: String },
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode value: {0}")]
    Decode(String),
}

impl SerdeError {
    pub fn kind(&self) -> &'static str {
        match self {
            SerdeError::SchemaRegistryNotInitialized => "SchemaRegistryNotInitialized",
            SerdeError::SchemaNotFound(_) => "SchemaNotFound",
            SerdeError::UnsupportedSchemaType { .. } => "UnsupportedSchemaType",
            SerdeError::Registry { .. } => "SchemaRegistry",
            SerdeError::Encode(_) => "SerializeError",
            SerdeError::Decode(_) => "DeserializeError",
        }
    }
}
