use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::directive::TopicDirective;

/// `host:port(,host:port)*` with a numeric port.
static BOOTSTRAP_SERVERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+:[0-9]+(,[A-Za-z0-9._-]+:[0-9]+)*$")
        .expect("invalid bootstrap servers regex")
});

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DirectiveValidationError {
    #[error("duplicate topics in directive: {}", .0.join(", "))]
    DuplicateTopics(Vec<String>),
    #[error("invalid bootstrap servers for topic {topic}: {message}")]
    InvalidBootstrapServers { topic: String, message: String },
}

/// Each topic may appear at most once across the directive list. All
/// duplicates are reported at once, with their counts.
pub fn validate_unique_topics(directives: &[TopicDirective]) -> Result<(), Vec<String>> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for directive in directives {
        *counts.entry(directive.topic.as_str()).or_default() += 1;
    }

    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(topic, count)| format!("{} appears {} times", topic, count))
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(duplicates)
    }
}

/// The optional per-topic override must be a comma-separated `host:port`
/// list. `None` passes; an empty string when present does not.
pub fn validate_bootstrap_servers(value: Option<&str>) -> Result<(), String> {
    match value {
        None => Ok(()),
        Some(s) if BOOTSTRAP_SERVERS.is_match(s) => Ok(()),
        Some(s) => Err(format!(
            "\"{}\" does not match host:port(,host:port)*",
            s
        )),
    }
}

/// Run every validator rule over the parsed directive list. No partial
/// success: the first rule family to fail decides the error.
pub fn validate_topic_directives(
    directives: &[TopicDirective],
) -> Result<(), DirectiveValidationError> {
    if let Err(duplicates) = validate_unique_topics(directives) {
        return Err(DirectiveValidationError::DuplicateTopics(duplicates));
    }

    for directive in directives {
        if let Err(message) = validate_bootstrap_servers(directive.bootstrap_servers.as_deref()) {
            return Err(DirectiveValidationError::InvalidBootstrapServers {
                topic: directive.topic.clone(),
                message,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::TopicRole;

    fn directive(topic: &str, bootstrap_servers: Option<&str>) -> TopicDirective {
        TopicDirective {
            topic: topic.to_string(),
            role: TopicRole::Producer,
            client_principal: "svc".to_string(),
            event_filters: Vec::new(),
            metadata: Default::default(),
            bootstrap_servers: bootstrap_servers.map(str::to_string),
        }
    }

    #[test]
    fn unique_topics_pass() {
        let list = vec![directive("a", None), directive("b", None)];
        assert!(validate_unique_topics(&list).is_ok());
    }

    #[test]
    fn duplicate_topics_are_all_reported_with_counts() {
        let list = vec![
            directive("t", None),
            directive("t", None),
            directive("u", None),
            directive("u", None),
            directive("u", None),
            directive("v", None),
        ];
        let errors = validate_unique_topics(&list).unwrap_err();
        assert_eq!(
            errors,
            vec!["t appears 2 times".to_string(), "u appears 3 times".to_string()]
        );
    }

    #[test]
    fn bootstrap_servers_format() {
        // Accepted
        assert!(validate_bootstrap_servers(Some("h:1")).is_ok());
        assert!(validate_bootstrap_servers(Some("h:1,h2:2")).is_ok());
        assert!(validate_bootstrap_servers(None).is_ok());

        // Rejected
        assert!(validate_bootstrap_servers(Some("")).is_err());
        assert!(validate_bootstrap_servers(Some("h")).is_err());
        assert!(validate_bootstrap_servers(Some("h:abc")).is_err());
        assert!(validate_bootstrap_servers(Some("h:")).is_err());
        assert!(validate_bootstrap_servers(Some(",h:1")).is_err());
    }

    #[test]
    fn combined_validation_reports_duplicates_first() {
        let list = vec![
            directive("t", Some("not-a-server")),
            directive("t", None),
        ];
        match validate_topic_directives(&list) {
            Err(DirectiveValidationError::DuplicateTopics(errors)) => {
                assert_eq!(errors, vec!["t appears 2 times".to_string()]);
            }
            other => panic!("expected duplicate topics, got {:?}", other),
        }
    }

    #[test]
    fn combined_validation_checks_bootstrap_format() {
        let list = vec![directive("t", Some("h:abc"))];
        match validate_topic_directives(&list) {
            Err(DirectiveValidationError::InvalidBootstrapServers { topic, .. }) => {
                assert_eq!(topic, "t");
            }
            other => panic!("expected bootstrap servers error, got {:?}", other),
        }
    }
}
