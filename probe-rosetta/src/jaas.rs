use probe_common::OauthBearerConfig;

/// Escape a value for inclusion inside a quoted JAAS option. Backslash,
/// double quote, newline and carriage return become `\\`, `\"`, `\n`, `\r`.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Build the SASL/OAUTHBEARER login module string the Kafka client contract
/// expects. Exactly one `;` terminates the string.
pub fn oauth_bearer_jaas(oauth: &OauthBearerConfig) -> String {
    let mut jaas = format!(
        "org.apache.kafka.common.security.oauthbearer.OAuthBearerLoginModule required \
         oauth.client.id=\"{}\" oauth.client.secret=\"{}\" oauth.token.endpoint.uri=\"{}\"",
        escape(&oauth.client_id),
        escape(&oauth.client_secret),
        escape(&oauth.token_endpoint),
    );
    if let Some(scope) = &oauth.scope {
        jaas.push_str(&format!(" oauth.scope=\"{}\"", escape(scope)));
    }
    jaas.push(';');
    jaas
}
