//! Payload path resolution.
//!
//! Path expressions are a restricted subset: dotted field names and numeric
//! array indices, e.g. `pull_request.labels.0.name`. Anything else is
//! rejected by the validator rather than guessed at.

use serde_json::Value;

/// Resolve a path expression against a payload value.
///
/// Returns `None` when any segment is missing, an index is out of bounds,
/// or the expression descends into a scalar.
pub fn resolve<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Check a path expression for syntactic validity: non-empty segments of
/// word characters, `-`, or digits, separated by single dots.
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path is empty".to_string());
    }
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(format!("path '{path}' has an empty segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "path segment '{segment}' contains unsupported characters"
            ));
        }
    }
    Ok(())
}

/// Render a payload value as the string used in comparisons. Scalars render
/// bare; null renders empty; compound values render as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Parse a value as a number for ordered comparisons. Strings holding
/// numbers count.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether a resolved value counts as empty: null, `""`, `[]`, or `{}`.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_fields_and_indices() {
        let payload = json!({
            "pull_request": {
                "labels": [ { "name": "bug" }, { "name": "urgent" } ],
                "number": 42
            }
        });

        assert_eq!(
            resolve(&payload, "pull_request.labels.1.name"),
            Some(&json!("urgent"))
        );
        assert_eq!(resolve(&payload, "pull_request.number"), Some(&json!(42)));
        assert_eq!(resolve(&payload, "pull_request.labels.5"), None);
        assert_eq!(resolve(&payload, "missing.field"), None);
        // descending into a scalar fails
        assert_eq!(resolve(&payload, "pull_request.number.deep"), None);
    }

    #[test]
    fn path_validation_rejects_unsupported_syntax() {
        assert!(validate_path("a.b.0.c").is_ok());
        assert!(validate_path("snake_case.kebab-case").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("a..b").is_err());
        assert!(validate_path("a[0]").is_err());
        assert!(validate_path("a.b ").is_err());
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(as_number(&json!(3)), Some(3.0));
        assert_eq!(as_number(&json!("2.5")), Some(2.5));
        assert_eq!(as_number(&json!("abc")), None);
        assert_eq!(as_number(&json!([1])), None);
    }

    #[test]
    fn emptiness() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
    }
}
