//! Mandatory-field and validator checks, and validators built from declarative rules.

use crate::config::ValidationRule;
use crate::descriptor::{Operation, ResourceDescriptor, Validator};
use crate::error::{AppError, ConfigError};
use crate::store::Document;
use regex::Regex;
use serde_json::Value;

pub struct RequestValidator;

impl RequestValidator {
    /// Every field mandatory for `operation` must be present in the input (a null value counts as present).
    pub fn mandatory_fields(
        descriptor: &ResourceDescriptor,
        input: &Document,
        operation: Operation,
    ) -> Result<(), AppError> {
        let missing: Vec<&str> = descriptor
            .fields()
            .filter(|(name, field)| field.is_mandatory_for(operation.as_str()) && !input.contains_key(*name))
            .map(|(name, _)| name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Missing mandatory fields: {}",
                missing.join(", ")
            )))
        }
    }

    /// Runs the validator of every present field; failures are reported together.
    pub async fn validate_types(descriptor: &ResourceDescriptor, input: &Document) -> Result<(), AppError> {
        let mut invalid = Vec::new();
        for (name, field) in descriptor.fields() {
            let (Some(validator), Some(value)) = (&field.validator, input.get(name)) else {
                continue;
            };
            if !validator.check(value).await {
                invalid.push(name);
            }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Invalid field type(s): {}",
                invalid.join(", ")
            )))
        }
    }

    /// Compiles a rule into a validator. Null values always pass.
    pub fn from_rule(rule: &ValidationRule) -> Result<Validator, ConfigError> {
        let pattern = rule
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::Validation(format!("invalid pattern: {}", e)))?;
        if let Some(format) = &rule.format {
            if !matches!(format.to_lowercase().as_str(), "email" | "uuid" | "date" | "date-time") {
                return Err(ConfigError::Validation(format!("unknown format '{}'", format)));
            }
        }
        let rule = rule.clone();
        Ok(Validator::sync(move |v| check_rule(v, &rule, pattern.as_ref())))
    }
}

fn check_rule(v: &Value, rule: &ValidationRule, pattern: Option<&Regex>) -> bool {
    if v.is_null() {
        return true;
    }
    if let Some(kind) = &rule.kind {
        if !has_type(v, kind) {
            return false;
        }
    }
    if let Some(format) = &rule.format {
        if !matches_format(v, format) {
            return false;
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if rule.max_length.is_some_and(|max| len > max as usize) {
            return false;
        }
        if rule.min_length.is_some_and(|min| len < min as usize) {
            return false;
        }
        if pattern.is_some_and(|re| !re.is_match(s)) {
            return false;
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return false;
        }
    }
    if let Some(n) = v.as_f64() {
        if rule.minimum.is_some_and(|min| n < min) || rule.maximum.is_some_and(|max| n > max) {
            return false;
        }
    }
    true
}

fn has_type(v: &Value, kind: &str) -> bool {
    match kind {
        "string" => v.is_string(),
        "number" => v.is_number(),
        "integer" => v.is_i64() || v.is_u64(),
        "boolean" => v.is_boolean(),
        "array" => v.is_array(),
        "object" => v.is_object(),
        _ => true,
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn matches_format(v: &Value, format: &str) -> bool {
    let Some(s) = v.as_str() else {
        return false;
    };
    match format.to_lowercase().as_str() {
        "email" => s.len() >= 3 && s.contains('@'),
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AccessMode;
    use serde_json::json;

    fn orders() -> ResourceDescriptor {
        let mut d = ResourceDescriptor::new("orders");
        d.set_mode("customerEmail", AccessMode::ReadWrite)
            .set_mandatory("customerEmail", ["new"])
            .set_mode("total", AccessMode::ReadWrite)
            .set_mandatory("total", ["new", "edit"])
            .set_validator("total", Some(Validator::sync(|v| v.is_number())))
            .set_mode("note", AccessMode::ReadWrite)
            .set_validator(
                "note",
                Some(Validator::future(|v: Value| async move { v.as_str().is_some_and(|s| s.len() < 5) })),
            );
        d
    }

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_mandatory_fields_are_listed() {
        let d = orders();
        let err = RequestValidator::mandatory_fields(&d, &doc(json!({})), Operation::New).unwrap_err();
        assert_eq!(err.to_string(), "Missing mandatory fields: customerEmail, total");
        let err = RequestValidator::mandatory_fields(&d, &doc(json!({"total": 1})), Operation::New).unwrap_err();
        assert_eq!(err.to_string(), "Missing mandatory fields: customerEmail");
        assert!(RequestValidator::mandatory_fields(&d, &doc(json!({"total": 1})), Operation::Edit).is_ok());
    }

    #[tokio::test]
    async fn invalid_types_are_aggregated() {
        let d = orders();
        let err = RequestValidator::validate_types(&d, &doc(json!({"total": "x", "note": "too long"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid field type(s): total, note");
        assert!(RequestValidator::validate_types(&d, &doc(json!({"total": 3}))).await.is_ok());
    }

    #[tokio::test]
    async fn rules_compile_into_validators() {
        let rule = ValidationRule {
            format: Some("email".into()),
            max_length: Some(20),
            ..Default::default()
        };
        let v = RequestValidator::from_rule(&rule).unwrap();
        assert!(v.check(&json!("a@b.io")).await);
        assert!(!v.check(&json!("nope")).await);
        assert!(!v.check(&json!("someone@a-very-long-domain.example")).await);
        assert!(v.check(&Value::Null).await);

        let range = RequestValidator::from_rule(&ValidationRule {
            kind: Some("integer".into()),
            minimum: Some(1.0),
            maximum: Some(10.0),
            ..Default::default()
        })
        .unwrap();
        assert!(range.check(&json!(5)).await);
        assert!(!range.check(&json!(11)).await);
        assert!(!range.check(&json!(2.5)).await);

        let date = RequestValidator::from_rule(&ValidationRule {
            format: Some("date".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(date.check(&json!("2025-06-15")).await);
        assert!(!date.check(&json!("15/06/2025")).await);
    }

    #[test]
    fn bad_rules_are_config_errors() {
        let bad = ValidationRule {
            pattern: Some("(".into()),
            ..Default::default()
        };
        assert!(RequestValidator::from_rule(&bad).is_err());
        let unknown = ValidationRule {
            format: Some("phone".into()),
            ..Default::default()
        };
        assert!(RequestValidator::from_rule(&unknown).is_err());
    }
}
