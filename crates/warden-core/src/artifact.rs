//! Structured run artifacts consumed by downstream pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::report::ModelReport;
use crate::scorer::PASS_THRESHOLD;
use crate::selector::{Recommendation, Standing};
use crate::verification::VerificationReport;

/// Default artifact file names.
pub const DEPLOYMENT_ARTIFACT: &str = "guardrail_deployment_result.json";
pub const BENCHMARK_ARTIFACT: &str = "model_selection_results.json";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to write artifact: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to serialize artifact: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// Machine-readable failure; `kind` is what automation branches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl FailureReason {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            reasons: Vec::new(),
        }
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }
}

/// Result of a reconcile run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentArtifact {
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub policy_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl DeploymentArtifact {
    pub fn succeeded(
        policy_name: impl Into<String>,
        policy_id: impl Into<String>,
        verification: Option<VerificationReport>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            status: RunStatus::Success,
            policy_name: policy_name.into(),
            policy_id: Some(policy_id.into()),
            verification,
            failure: None,
        }
    }

    pub fn failed(policy_name: impl Into<String>, failure: FailureReason) -> Self {
        Self {
            timestamp: Utc::now(),
            status: RunStatus::Failure,
            policy_name: policy_name.into(),
            policy_id: None,
            verification: None,
            failure: Some(failure),
        }
    }
}

/// Result of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkArtifact {
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub suite_version: String,
    pub test_results: BTreeMap<String, ModelReport>,
    pub recommended_models: BTreeMap<String, String>,
    pub standings: BTreeMap<String, Vec<Standing>>,

    /// Models whose success rate reached the pass threshold.
    pub passing_models: Vec<String>,
}

impl BenchmarkArtifact {
    /// Overall success requires at least one passing model.
    pub fn new(
        suite_version: impl Into<String>,
        reports: BTreeMap<String, ModelReport>,
        recommendation: Recommendation,
    ) -> Self {
        let passing_models: Vec<String> = reports
            .iter()
            .filter(|(_, report)| report.succeeded(PASS_THRESHOLD))
            .map(|(id, _)| id.clone())
            .collect();

        Self {
            timestamp: Utc::now(),
            status: if passing_models.is_empty() {
                RunStatus::Failure
            } else {
                RunStatus::Success
            },
            suite_version: suite_version.into(),
            test_results: reports,
            recommended_models: recommendation.selections,
            standings: recommendation.standings,
            passing_models,
        }
    }
}

/// Serialize `artifact` as pretty JSON to `path`.
pub fn write_artifact<T: Serialize>(path: impl AsRef<Path>, artifact: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_string_pretty(artifact)?;
    fs::write(path, json)?;
    Ok(())
}
