//! Runtime configuration.
//!
//! Loaded from YAML; every field has a default, so an empty document is a
//! valid configuration.
//!
//! ```yaml
//! reconcile:
//!   poll_interval: 10s
//!   timeout: 5m
//! verify:
//!   min_pass_rate: 0.8
//! benchmark:
//!   models:
//!     - { id: anthropic.claude-v2, family: completion }
//! store:
//!   endpoint: https://guardrails.internal/v1
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use warden_core::{ConfigError, GenerationParams, ModelFamily, ModelSpec, PolicyDefaults};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub reconcile: ReconcilerConfig,
    pub verify: VerifierConfig,
    pub benchmark: BenchmarkConfig,
    pub store: StoreConfig,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile.poll_interval.is_zero() {
            return Err(invalid("reconcile.poll_interval", "must be greater than zero"));
        }
        if self.reconcile.timeout.is_zero() {
            return Err(invalid("reconcile.timeout", "must be greater than zero"));
        }
        if let Some(rate) = self.verify.min_pass_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid("verify.min_pass_rate", "must be between 0 and 1"));
            }
        }
        if self.benchmark.models.is_empty() {
            return Err(invalid("benchmark.models", "must list at least one model"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Reconciliation timing and request defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,

    #[serde(with = "humantime_duration")]
    pub timeout: Duration,

    pub default_description: String,
    pub default_blocked_input_message: String,
    pub default_blocked_output_message: String,
}

impl ReconcilerConfig {
    pub fn defaults(&self) -> PolicyDefaults {
        PolicyDefaults {
            description: self.default_description.clone(),
            blocked_input_message: self.default_blocked_input_message.clone(),
            blocked_output_message: self.default_blocked_output_message.clone(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        let defaults = PolicyDefaults::default();
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
            default_description: defaults.description,
            default_blocked_input_message: defaults.blocked_input_message,
            default_blocked_output_message: defaults.blocked_output_message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Model the adversarial prompts are sent to.
    pub reference_model: ModelSpec,
    pub policy_version: String,
    pub max_tokens: u32,

    /// Absent means the report is advisory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pass_rate: Option<f64>,
}

impl VerifierConfig {
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: None,
            top_p: None,
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            reference_model: ModelSpec::new("anthropic.claude-v2", ModelFamily::Completion),
            policy_version: "DRAFT".to_string(),
            max_tokens: 100,
            min_pass_rate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub models: Vec<ModelSpec>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl BenchmarkConfig {
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            models: vec![
                ModelSpec::new("anthropic.claude-v2", ModelFamily::Completion),
                ModelSpec::new("amazon.titan-text-express-v1", ModelFamily::TextGeneration),
            ],
            max_tokens: 300,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// Remote store connection settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Falls back to the `WARDEN_API_KEY` environment variable.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    #[serde(with = "humantime_duration")]
    pub timeout: Duration,

    pub max_retries: usize,

    /// First backoff delay; doubles per attempt unless the service sends
    /// `Retry-After`.
    #[serde(with = "humantime_duration")]
    pub retry_delay: Duration,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Durations as human-readable strings (`10s`, `5m`).
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
