use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The test package manifest, decoded from the `topic-directive` file that
/// ships alongside the feature tree in block storage. The file is YAML or
/// JSON; both decode through the same path since JSON is a YAML subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageDirective {
    /// Source location. Redundant with the Start argument, kept for wire
    /// compatibility with existing packages.
    pub bucket: String,
    /// Absolute path inside the scratch filesystem where feature files are
    /// materialized.
    pub jimfs_location: String,
    /// Absolute path where the BDD runner writes reports.
    pub evidence_dir: String,
    pub topic_directives: Vec<TopicDirective>,
    #[serde(default)]
    pub user_glue_packages: Vec<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

impl BlockStorageDirective {
    /// Decode a manifest from raw file bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DirectiveParseError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }
}

#[derive(Error, Debug)]
#[error("failed to decode topic directive: {0}")]
pub struct DirectiveParseError(#[from] serde_yaml::Error);

/// Per-topic wiring for one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDirective {
    pub topic: String,
    pub role: TopicRole,
    /// Identity used for the vault credential lookup.
    pub client_principal: String,
    #[serde(default)]
    pub event_filters: Vec<EventFilter>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Per-topic cluster override; the process default applies when absent.
    #[serde(default)]
    pub bootstrap_servers: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicRole {
    Producer,
    Consumer,
}

impl fmt::Display for TopicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicRole::Producer => write!(f, "producer"),
            TopicRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// `(eventType, payloadVersion)` pair a consumer stream will match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub event_type: String,
    pub payload_version: String,
}

/// Output of the vault stage: everything needed to open one Kafka
/// connection for `(topic, role)`.
#[derive(Debug, Clone, PartialEq)]
pub struct KafkaSecurityDirective {
    pub topic: String,
    pub role: TopicRole,
    pub security_protocol: SecurityProtocol,
    /// Fully formed JAAS string, escaped. Canonical wire/audit artifact;
    /// librdkafka is configured from the structured fields below instead.
    pub jaas_config: String,
    pub oauth: OauthBearerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    Plaintext,
    SaslSsl,
    // SSL and SASL_PLAINTEXT are reserved by the directive contract but not
    // produced by the vault stage today.
}

impl SecurityProtocol {
    /// The value librdkafka expects for `security.protocol`.
    pub fn as_kafka_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }
}

/// Structured SASL/OAUTHBEARER client configuration assembled by the vault
/// stage, mirrored by the JAAS string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OauthBearerConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_MANIFEST: &str = r#"
bucket: s3://probe-packages/orders
jimfsLocation: /work/features
evidenceDir: /work/evidence
topicDirectives:
  - topic: orders-events
    role: producer
    clientPrincipal: svc-orders
  - topic: orders-replies
    role: consumer
    clientPrincipal: svc-orders
    eventFilters:
      - eventType: OrderAccepted
        payloadVersion: v1
    bootstrapServers: broker-a:9092,broker-b:9092
userGluePackages:
  - orders
tags: "@smoke"
"#;

    #[test]
    fn decodes_yaml_manifest() {
        let directive =
            BlockStorageDirective::from_slice(YAML_MANIFEST.as_bytes()).expect("failed to decode");
        assert_eq!(directive.bucket, "s3://probe-packages/orders");
        assert_eq!(directive.topic_directives.len(), 2);
        assert_eq!(directive.topic_directives[0].role, TopicRole::Producer);
        assert_eq!(
            directive.topic_directives[1].bootstrap_servers.as_deref(),
            Some("broker-a:9092,broker-b:9092")
        );
        assert_eq!(
            directive.topic_directives[1].event_filters,
            vec![EventFilter {
                event_type: "OrderAccepted".to_string(),
                payload_version: "v1".to_string(),
            }]
        );
        assert_eq!(directive.tags.as_deref(), Some("@smoke"));
    }

    #[test]
    fn decodes_json_manifest() {
        let json = serde_json::json!({
            "bucket": "file:///tmp/pkg",
            "jimfsLocation": "/work/features",
            "evidenceDir": "/work/evidence",
            "topicDirectives": [
                {"topic": "t-events", "role": "producer", "clientPrincipal": "svc"}
            ]
        })
        .to_string();

        let directive =
            BlockStorageDirective::from_slice(json.as_bytes()).expect("failed to decode");
        assert_eq!(directive.topic_directives[0].topic, "t-events");
        assert!(directive.user_glue_packages.is_empty());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = serde_json::json!({
            "bucket": "file:///tmp/pkg",
            "jimfsLocation": "/work/features",
            "evidenceDir": "/work/evidence",
            "topicDirectives": [],
            "someFutureField": {"nested": true}
        })
        .to_string();

        assert!(BlockStorageDirective::from_slice(json.as_bytes()).is_ok());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let json = serde_json::json!({
            "bucket": "file:///tmp/pkg",
            "topicDirectives": []
        })
        .to_string();

        assert!(BlockStorageDirective::from_slice(json.as_bytes()).is_err());
    }
}
