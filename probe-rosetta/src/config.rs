use serde::Deserialize;
use serde_json::Value;

use crate::transform::Transformation;

/// The vault mapping document: which fields to pull out of the vault
/// response, how to massage them, and optionally how to shape the request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosettaConfig {
    pub mappings: Vec<FieldMapping>,
    /// JSON tree whose string leaves may contain `{{...}}` placeholders.
    #[serde(default)]
    pub request_template: Option<Value>,
}

impl RosettaConfig {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// One field extraction: evaluate `sourcePath` against the vault response,
/// fall back to `defaultValue`, then apply the transformation chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub target_field: String,
    pub source_path: String,
    #[serde(default)]
    pub transformations: Vec<Transformation>,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mapping_document() {
        let json = serde_json::json!({
            "mappings": [
                {
                    "targetField": "clientId",
                    "sourcePath": "$.data.client_id"
                },
                {
                    "targetField": "clientSecret",
                    "sourcePath": "$.data.client_secret",
                    "transformations": ["base64Decode"]
                },
                {
                    "targetField": "scope",
                    "sourcePath": "$.data.scope",
                    "defaultValue": "kafka"
                }
            ],
            "requestTemplate": {
                "principal": "{{clientPrincipal}}",
                "topic": "{{topic}}"
            }
        })
        .to_string();

        let config = RosettaConfig::from_slice(json.as_bytes()).expect("failed to decode");
        assert_eq!(config.mappings.len(), 3);
        assert_eq!(config.mappings[0].target_field, "clientId");
        assert_eq!(
            config.mappings[1].transformations,
            vec![Transformation::Base64Decode]
        );
        assert_eq!(config.mappings[2].default_value.as_deref(), Some("kafka"));
        assert!(config.request_template.is_some());
    }

    #[test]
    fn rejects_unknown_transformation() {
        let json = serde_json::json!({
            "mappings": [
                {
                    "targetField": "clientId",
                    "sourcePath": "$.id",
                    "transformations": ["rot13"]
                }
            ]
        })
        .to_string();

        assert!(RosettaConfig::from_slice(json.as_bytes()).is_err());
    }
}
