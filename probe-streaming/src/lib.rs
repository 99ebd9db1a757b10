//! Kafka streaming layer: one producer or consumer stream per topic
//! directive, a process-wide registry routing user step code to them, and
//! the schema-registry-driven serialization dispatcher.

pub(crate) mod conn;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod proto;
pub mod registry;
pub mod serde;

pub use consumer::{ConsumedRecord, ConsumerHandle, ConsumerStreamConfig};
pub use error::{SerdeError, StreamingError};
pub use producer::{ProducerHandle, ProducerStreamConfig};
pub use registry::StreamingRegistry;
