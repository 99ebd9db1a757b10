use serde_json::Value;

use crate::error::VaultError;

/// Evaluate a `$.a.b.c` path (the supported JSON-Path subset) against a
/// JSON tree. Returns `None` when any segment is absent or the final value
/// is null; errors only on malformed path syntax.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>, VaultError> {
    let rest = path
        .strip_prefix("$.")
        .or_else(|| (path == "$").then_some(""))
        .ok_or_else(|| {
            VaultError::Configuration(format!("source path must start with $.: {}", path))
        })?;

    if rest.is_empty() {
        return Ok(Some(root));
    }

    let mut current = root;
    for segment in rest.split('.') {
        if segment.is_empty() {
            return Err(VaultError::Configuration(format!(
                "empty segment in source path {}",
                path
            )));
        }
        match current.get(segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }

    if current.is_null() {
        Ok(None)
    } else {
        Ok(Some(current))
    }
}

/// Render a resolved JSON value as the string the mapping stage works on.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Value {
        serde_json::json!({
            "data": {
                "client_id": "svc-orders",
                "nested": {"deep": 42},
                "absent_value": null
            }
        })
    }

    #[test]
    fn resolves_nested_paths() {
        let root = fixture();
        let value = resolve(&root, "$.data.client_id").unwrap().unwrap();
        assert_eq!(value_to_string(value), "svc-orders");

        let deep = resolve(&root, "$.data.nested.deep").unwrap().unwrap();
        assert_eq!(value_to_string(deep), "42");
    }

    #[test]
    fn missing_segments_resolve_to_none() {
        let root = fixture();
        assert!(resolve(&root, "$.data.missing").unwrap().is_none());
        assert!(resolve(&root, "$.data.client_id.too_far").unwrap().is_none());
        // explicit null counts as missing
        assert!(resolve(&root, "$.data.absent_value").unwrap().is_none());
    }

    #[test]
    fn root_path_returns_whole_tree() {
        let root = fixture();
        assert_eq!(resolve(&root, "$").unwrap(), Some(&root));
    }

    #[test]
    fn malformed_paths_are_configuration_errors() {
        let root = fixture();
        assert!(matches!(
            resolve(&root, "data.client_id"),
            Err(VaultError::Configuration(_))
        ));
        assert!(matches!(
            resolve(&root, "$.data..client_id"),
            Err(VaultError::Configuration(_))
        ));
    }
}
