//! Vault credential pipeline: turns a `TopicDirective` plus a Rosetta
//! mapping configuration into a `KafkaSecurityDirective`.
//!
//! The mapping stages (template rendering, path extraction, transformations,
//! JAAS assembly) are pure functions over `serde_json::Value` so they can be
//! exercised without a vault; the transport lives in `client`.

pub mod client;
pub mod config;
pub mod error;
pub mod jaas;
pub mod paths;
pub mod pipeline;
pub mod template;
pub mod transform;

pub use client::{VaultClient, VaultProvider};
pub use config::{FieldMapping, RosettaConfig};
pub use error::VaultError;
pub use pipeline::{CredentialAssembler, OauthDefaults};
