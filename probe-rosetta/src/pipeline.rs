use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use probe_common::{
    KafkaSecurityDirective, OauthBearerConfig, SecurityProtocol, TopicDirective,
};

use crate::client::VaultClient;
use crate::config::{FieldMapping, RosettaConfig};
use crate::error::VaultError;
use crate::{jaas, paths, template, transform};

/// Process-wide OAuth fallbacks, used when the vault mapping does not
/// provide a token endpoint or scope of its own.
#[derive(Debug, Clone)]
pub struct OauthDefaults {
    pub token_endpoint: String,
    pub scope: Option<String>,
}

/// Runs the full pipeline for one TopicDirective: request assembly →
/// transport → field mapping → JAAS assembly. Produces exactly one
/// `KafkaSecurityDirective` per directive.
pub struct CredentialAssembler {
    client: VaultClient,
    config: RosettaConfig,
    defaults: OauthDefaults,
    request_params: HashMap<String, String>,
}

impl CredentialAssembler {
    pub fn new(
        client: VaultClient,
        config: RosettaConfig,
        defaults: OauthDefaults,
        request_params: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            config,
            defaults,
            request_params,
        }
    }

    pub async fn assemble(
        &self,
        directive: &TopicDirective,
    ) -> Result<KafkaSecurityDirective, VaultError> {
        let request = self.build_request(directive)?;
        debug!(topic = %directive.topic, role = %directive.role, "requesting vault credentials");

        let response = self.client.fetch(&request).await?;
        let fields = apply_mappings(&self.config.mappings, &response)?;

        self.into_security_directive(directive, fields)
    }

    fn build_request(&self, directive: &TopicDirective) -> Result<Value, VaultError> {
        match &self.config.request_template {
            Some(tree) => template::render(tree, directive, &self.request_params),
            // Without a template the vault receives the directive identity as-is.
            None => Ok(serde_json::json!({
                "topic": directive.topic,
                "role": directive.role.to_string(),
                "clientPrincipal": directive.client_principal,
            })),
        }
    }

    fn into_security_directive(
        &self,
        directive: &TopicDirective,
        mut fields: HashMap<String, String>,
    ) -> Result<KafkaSecurityDirective, VaultError> {
        let client_id = fields
            .remove("clientId")
            .ok_or_else(|| VaultError::Mapping("missing required field clientId".to_string()))?;
        let client_secret = fields.remove("clientSecret").ok_or_else(|| {
            VaultError::Mapping("missing required field clientSecret".to_string())
        })?;

        let oauth = OauthBearerConfig {
            client_id,
            client_secret,
            token_endpoint: fields
                .remove("tokenEndpoint")
                .unwrap_or_else(|| self.defaults.token_endpoint.clone()),
            scope: fields.remove("scope").or_else(|| self.defaults.scope.clone()),
        };

        let security_protocol = match fields.remove("securityProtocol").as_deref() {
            None | Some("SASL_SSL") => SecurityProtocol::SaslSsl,
            Some("PLAINTEXT") => SecurityProtocol::Plaintext,
            Some(other) => {
                return Err(VaultError::Mapping(format!(
                    "unsupported security protocol {}",
                    other
                )))
            }
        };

        Ok(KafkaSecurityDirective {
            topic: directive.topic.clone(),
            role: directive.role,
            security_protocol,
            jaas_config: jaas::oauth_bearer_jaas(&oauth),
            oauth,
        })
    }
}

/// Evaluate every mapping against the vault response. Total: either all
/// fields resolve (directly, or through their default) or the first missing
/// field is named in the error.
pub fn apply_mappings(
    mappings: &[FieldMapping],
    response: &Value,
) -> Result<HashMap<String, String>, VaultError> {
    let mut fields = HashMap::with_capacity(mappings.len());

    for mapping in mappings {
        let resolved = paths::resolve(response, &mapping.source_path)?
            .map(paths::value_to_string)
            .or_else(|| mapping.default_value.clone())
            .ok_or_else(|| {
                VaultError::Mapping(format!(
                    "missing required field {} (path {})",
                    mapping.target_field, mapping.source_path
                ))
            })?;

        let value = transform::apply_chain(&mapping.transformations, resolved)?;
        fields.insert(mapping.target_field.clone(), value);
    }

    Ok(fields)
}
