use std::collections::HashMap;

use serde_json::Value;

use probe_common::TopicDirective;

use crate::error::VaultError;

/// Render a request template by replacing `{{...}}` placeholders in every
/// string leaf. Supported placeholders:
///   - `{{topic}}`, `{{role}}`, `{{clientPrincipal}}`: directive fields
///   - `{{$^request-params.X}}`: caller-provided parameter map
///   - `{{'literal'}}`: the literal, verbatim
/// Anything else fails the render.
pub fn render(
    template: &Value,
    directive: &TopicDirective,
    request_params: &HashMap<String, String>,
) -> Result<Value, VaultError> {
    match template {
        Value::String(s) => Ok(Value::String(render_string(s, directive, request_params)?)),
        Value::Array(items) => {
            let rendered: Result<Vec<Value>, VaultError> = items
                .iter()
                .map(|item| render(item, directive, request_params))
                .collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render(value, directive, request_params)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(
    input: &str,
    directive: &TopicDirective,
    request_params: &HashMap<String, String>,
) -> Result<String, VaultError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            VaultError::InvalidTemplate(format!("unterminated placeholder in \"{}\"", input))
        })?;

        output.push_str(&rest[..start]);
        output.push_str(&expand(&after[..end], directive, request_params)?);
        rest = &after[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}

fn expand(
    placeholder: &str,
    directive: &TopicDirective,
    request_params: &HashMap<String, String>,
) -> Result<String, VaultError> {
    match placeholder {
        "topic" => Ok(directive.topic.clone()),
        "role" => Ok(directive.role.to_string()),
        "clientPrincipal" => Ok(directive.client_principal.clone()),
        other => {
            if let Some(name) = other.strip_prefix("$^request-params.") {
                request_params.get(name).cloned().ok_or_else(|| {
                    VaultError::InvalidTemplate(format!("unknown request param {}", name))
                })
            } else if let Some(literal) =
                other.strip_prefix('\'').and_then(|r| r.strip_suffix('\''))
            {
                Ok(literal.to_string())
            } else {
                Err(VaultError::InvalidTemplate(format!(
                    "unknown placeholder {{{{{}}}}}",
                    other
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_common::TopicRole;

    fn directive() -> TopicDirective {
        TopicDirective {
            topic: "orders-events".to_string(),
            role: TopicRole::Consumer,
            client_principal: "svc-orders".to_string(),
            event_filters: Vec::new(),
            metadata: Default::default(),
            bootstrap_servers: None,
        }
    }

    #[test]
    fn renders_directive_placeholders() {
        let template = serde_json::json!({
            "topic": "{{topic}}",
            "role": "{{role}}",
            "principal": "{{clientPrincipal}}",
            "nested": {"static": 7, "list": ["{{topic}}", true]}
        });

        let rendered = render(&template, &directive(), &HashMap::new()).unwrap();
        assert_eq!(
            rendered,
            serde_json::json!({
                "topic": "orders-events",
                "role": "consumer",
                "principal": "svc-orders",
                "nested": {"static": 7, "list": ["orders-events", true]}
            })
        );
    }

    #[test]
    fn renders_request_params_and_literals() {
        let template = serde_json::json!({
            "env": "{{$^request-params.environment}}",
            "kind": "{{'kafka-oauth'}}"
        });
        let params = HashMap::from([("environment".to_string(), "staging".to_string())]);

        let rendered = render(&template, &directive(), &params).unwrap();
        assert_eq!(rendered["env"], "staging");
        assert_eq!(rendered["kind"], "kafka-oauth");
    }

    #[test]
    fn placeholders_compose_within_a_leaf() {
        let template = serde_json::json!("{{clientPrincipal}}@{{topic}}");
        let rendered = render(&template, &directive(), &HashMap::new()).unwrap();
        assert_eq!(rendered, "svc-orders@orders-events");
    }

    #[test]
    fn unknown_placeholder_fails() {
        let template = serde_json::json!({"x": "{{bucket}}"});
        assert!(matches!(
            render(&template, &directive(), &HashMap::new()),
            Err(VaultError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn missing_request_param_fails() {
        let template = serde_json::json!({"x": "{{$^request-params.region}}"});
        assert!(matches!(
            render(&template, &directive(), &HashMap::new()),
            Err(VaultError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn unterminated_placeholder_fails() {
        let template = serde_json::json!("{{topic");
        assert!(matches!(
            render(&template, &directive(), &HashMap::new()),
            Err(VaultError::InvalidTemplate(_))
        ));
    }
}
