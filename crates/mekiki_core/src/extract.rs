//! Structured oracle output parsing.
//!
//! Responses are deserialized strictly first. Only when that fails do we try
//! the single fallback: the slice between the first opening and the last
//! closing delimiter, which covers prose or code fences wrapped around an
//! otherwise valid value.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CurationError, Result};

pub fn parse_object<T: DeserializeOwned>(text: &str) -> Result<T> {
    parse_delimited(text, '{', '}')
}

pub fn parse_array<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    parse_delimited(text, '[', ']')
}

fn parse_delimited<T: DeserializeOwned>(text: &str, open: char, close: char) -> Result<T> {
    match serde_json::from_str::<T>(text.trim()) {
        Ok(value) => Ok(value),
        Err(strict_err) => {
            let Some(slice) = delimited_slice(text, open, close) else {
                return Err(CurationError::Validation(format!(
                    "no JSON value in oracle output: {strict_err}"
                )));
            };
            serde_json::from_str::<T>(slice)
                .map_err(|err| CurationError::Validation(format!("malformed oracle output: {err}")))
        }
    }
}

/// Text form of an optional field. Null reads as empty.
pub fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// List form of an optional field. A lone string becomes a single entry;
/// other non-arrays read as empty.
pub fn value_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter(|item| !item.is_null())
            .map(value_text)
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}

/// Numeric form of an optional field. Numeric strings are accepted.
pub fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn delimited_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Out {
        score: f64,
        bucket: String,
    }

    #[test]
    fn strict_json_parses_directly() {
        let out: Out = parse_object(r#" {"score": 0.5, "bucket": "CORE"} "#).unwrap();
        assert_eq!(out.bucket, "CORE");
    }

    #[test]
    fn wrapped_json_uses_fallback() {
        let text = "Sure!\n```json\n{\"score\": 1, \"bucket\": \"WILDCARD\"}\n```";
        let out: Out = parse_object(text).unwrap();
        assert_eq!(out, Out { score: 1.0, bucket: "WILDCARD".to_string() });
    }

    #[test]
    fn arrays_use_the_same_fallback() {
        let tags: Vec<String> = parse_array("Tags: [\"rust\", \"llm\"]").unwrap();
        assert_eq!(tags, vec!["rust".to_string(), "llm".to_string()]);
    }

    #[test]
    fn loose_values_coerce_to_field_shapes() {
        assert_eq!(value_text(Value::Null), "");
        assert_eq!(value_text(serde_json::json!(3)), "3");
        assert_eq!(value_list(serde_json::json!("rust")), vec!["rust".to_string()]);
        assert_eq!(value_list(serde_json::json!(["a", null, 2])), vec!["a".to_string(), "2".to_string()]);
        assert!(value_list(serde_json::json!({"k": 1})).is_empty());
        assert_eq!(value_number(&serde_json::json!(" 0.8 ")), Some(0.8));
        assert_eq!(value_number(&serde_json::json!("high")), None);
        assert_eq!(value_number(&Value::Null), None);
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let err = parse_object::<Out>(r#"{"score": "high"}"#).unwrap_err();
        assert!(matches!(err, CurationError::Validation(_)));
        let err = parse_object::<Out>("no json here").unwrap_err();
        assert!(matches!(err, CurationError::Validation(_)));
    }
}
