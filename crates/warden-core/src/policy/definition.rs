//! Policy definition parsing from YAML/JSON and translation into the
//! full-replace request sent to the policy store.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_definition_schema;

lazy_static! {
    /// Names accepted by the remote store: 1-50 chars of `[0-9a-zA-Z_-]`.
    static ref POLICY_NAME_PATTERN: Regex = Regex::new(r"^[0-9a-zA-Z_-]{1,50}$").unwrap();
}

/// Errors from loading a policy definition or runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Definition failed schema validation: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unsupported definition format: {0}")]
    UnsupportedFormat(String),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Content-filter rules. Entries are opaque to this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPolicyConfig {
    pub filters: Vec<JsonValue>,
}

/// Restricted-topic rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicPolicyConfig {
    pub topics: Vec<JsonValue>,
}

/// Sensitive-entity rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensitiveInformationPolicyConfig {
    pub pii_entities: Vec<JsonValue>,
}

/// A declarative guardrail definition.
///
/// `name` is the unique key used to find an existing remote resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_input_messaging: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_outputs_messaging: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_policy_config: Option<ContentPolicyConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_policy_config: Option<TopicPolicyConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive_information_policy_config: Option<SensitiveInformationPolicyConfig>,
}

impl PolicyDefinition {
    /// Parse a definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a definition from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Load a definition file, choosing the parser by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "json" => Self::from_json(&fs::read_to_string(path)?),
            "yaml" | "yml" => Self::from_yaml(&fs::read_to_string(path)?),
            other => Err(ConfigError::UnsupportedFormat(format!(
                "{} (expected .json, .yaml or .yml, got '{}')",
                path.display(),
                other
            ))),
        }
    }

    /// Schema-check, deserialize and validate a raw JSON value.
    pub fn from_value(value: JsonValue) -> Result<Self, ConfigError> {
        validate_definition_schema(&value).map_err(ConfigError::SchemaViolation)?;
        let definition: PolicyDefinition = serde_json::from_value(value)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name".to_string()));
        }

        if !POLICY_NAME_PATTERN.is_match(&self.name) {
            return Err(ConfigError::invalid(
                "name",
                "must be 1-50 characters of letters, digits, '-' or '_'",
            ));
        }

        for (field, message) in [
            ("blockedInputMessaging", &self.blocked_input_messaging),
            ("blockedOutputsMessaging", &self.blocked_outputs_messaging),
        ] {
            if matches!(message, Some(m) if m.trim().is_empty()) {
                return Err(ConfigError::invalid(field, "must not be blank"));
            }
        }

        if matches!(&self.content_policy_config, Some(c) if c.filters.is_empty()) {
            return Err(ConfigError::invalid(
                "contentPolicyConfig.filters",
                "must contain at least one filter",
            ));
        }

        if matches!(&self.topic_policy_config, Some(t) if t.topics.is_empty()) {
            return Err(ConfigError::invalid(
                "topicPolicyConfig.topics",
                "must contain at least one topic",
            ));
        }

        if matches!(&self.sensitive_information_policy_config, Some(s) if s.pii_entities.is_empty())
        {
            return Err(ConfigError::invalid(
                "sensitiveInformationPolicyConfig.piiEntities",
                "must contain at least one entity",
            ));
        }

        Ok(())
    }
}

/// Values substituted for fields a definition omits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyDefaults {
    pub description: String,
    pub blocked_input_message: String,
    pub blocked_output_message: String,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            description: String::new(),
            blocked_input_message: "I cannot process this request.".to_string(),
            blocked_output_message: "I cannot provide this information.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FiltersConfig {
    pub filters_config: Vec<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopicsConfig {
    pub topics_config: Vec<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PiiEntitiesConfig {
    pub pii_entities_config: Vec<JsonValue>,
}

/// Complete create/update payload.
///
/// Every field is populated, so an update replaces the remote resource
/// wholesale rather than patching it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
    pub name: String,
    pub description: String,
    pub blocked_input_messaging: String,
    pub blocked_outputs_messaging: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_policy_config: Option<FiltersConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_policy_config: Option<TopicsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive_information_policy_config: Option<PiiEntitiesConfig>,
}

impl PolicyRequest {
    pub fn from_definition(definition: &PolicyDefinition, defaults: &PolicyDefaults) -> Self {
        Self {
            name: definition.name.clone(),
            description: definition
                .description
                .clone()
                .unwrap_or_else(|| defaults.description.clone()),
            blocked_input_messaging: definition
                .blocked_input_messaging
                .clone()
                .unwrap_or_else(|| defaults.blocked_input_message.clone()),
            blocked_outputs_messaging: definition
                .blocked_outputs_messaging
                .clone()
                .unwrap_or_else(|| defaults.blocked_output_message.clone()),
            content_policy_config: definition.content_policy_config.as_ref().map(|c| {
                FiltersConfig {
                    filters_config: c.filters.clone(),
                }
            }),
            topic_policy_config: definition.topic_policy_config.as_ref().map(|t| TopicsConfig {
                topics_config: t.topics.clone(),
            }),
            sensitive_information_policy_config: definition
                .sensitive_information_policy_config
                .as_ref()
                .map(|s| PiiEntitiesConfig {
                    pii_entities_config: s.pii_entities.clone(),
                }),
        }
    }
}
