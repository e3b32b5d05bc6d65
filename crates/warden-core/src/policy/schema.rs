//! JSON Schema validation for policy definitions.
//!
//! Definitions are checked against `schema/policy_definition.schema.json`
//! before they are deserialized, so structural mistakes are reported with
//! their location instead of as an opaque serde error.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded definition schema (loaded at compile time).
const DEFINITION_SCHEMA_JSON: &str = include_str!("../../schema/policy_definition.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(DEFINITION_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a definition JSON value against the schema.
///
/// Returns every violation as `"<message> at <path>"`.
pub fn validate_definition_schema(definition: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(definition)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_compiles() {
        assert!(get_validator().is_ok());
    }

    #[test]
    fn test_minimal_definition_is_valid() {
        assert!(validate_definition_schema(&json!({"name": "prod-guardrail"})).is_ok());
    }

    #[test]
    fn test_missing_name_is_reported() {
        let errors = validate_definition_schema(&json!({"description": "x"})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("name"));
    }

    #[test]
    fn test_rule_group_without_list_is_reported() {
        let errors = validate_definition_schema(&json!({
            "name": "prod-guardrail",
            "contentPolicyConfig": {}
        }))
        .unwrap_err();
        assert!(errors.iter().any(|e| e.contains("filters")));
    }
}
