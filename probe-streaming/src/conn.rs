use rdkafka::ClientConfig;

use probe_common::{KafkaSecurityDirective, SecurityProtocol};

/// Base librdkafka configuration for one stream: bootstrap servers from the
/// directive (or the process default) plus the security settings assembled
/// by the vault stage. librdkafka takes the structured OAuth fields, not the
/// JAAS string; the two are assembled from the same source.
pub(crate) fn client_config(
    bootstrap_servers: &str,
    security: &KafkaSecurityDirective,
) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", bootstrap_servers)
        .set("security.protocol", security.security_protocol.as_kafka_str());

    if security.security_protocol == SecurityProtocol::SaslSsl {
        config
            .set("sasl.mechanism", "OAUTHBEARER")
            .set("sasl.oauthbearer.method", "oidc")
            .set("sasl.oauthbearer.client.id", &security.oauth.client_id)
            .set(
                "sasl.oauthbearer.client.secret",
                &security.oauth.client_secret,
            )
            .set(
                "sasl.oauthbearer.token.endpoint.url",
                &security.oauth.token_endpoint,
            );
        if let Some(scope) = &security.oauth.scope {
            config.set("sasl.oauthbearer.scope", scope);
        }
    }

    config
}

#[cfg(test)]
pub(crate) fn plaintext_security(topic: &str, role: probe_common::TopicRole) -> KafkaSecurityDirective {
    use probe_common::OauthBearerConfig;

    KafkaSecurityDirective {
        topic: topic.to_string(),
        role,
        security_protocol: SecurityProtocol::Plaintext,
        jaas_config: String::new(),
        oauth: OauthBearerConfig {
            client_id: String::new(),
            client_secret: String::new(),
            token_endpoint: String::new(),
            scope: None,
        },
    }
}
