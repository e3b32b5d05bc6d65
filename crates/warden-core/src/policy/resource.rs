//! Remote policy resource model and deployment failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle status reported by the policy store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    Creating,
    Updating,
    Ready,
    Failed,
    Deleting,
}

impl PolicyStatus {
    /// `READY` and `FAILED` end a reconciliation; everything else is waited on.
    pub fn is_terminal(self) -> bool {
        matches!(self, PolicyStatus::Ready | PolicyStatus::Failed)
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyStatus::Creating => "CREATING",
            PolicyStatus::Updating => "UPDATING",
            PolicyStatus::Ready => "READY",
            PolicyStatus::Failed => "FAILED",
            PolicyStatus::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

/// Observed state of a remote policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResource {
    pub id: String,
    pub status: PolicyStatus,

    /// Present only when `status` is `FAILED`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Entry returned when listing policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub id: String,
    pub name: String,
}

/// Why a reconciled policy never became ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeployFailure {
    /// The store reported `FAILED`.
    Failed { reasons: Vec<String> },

    /// No terminal status within the polling budget.
    Timeout { elapsed_secs: f64 },
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployFailure::Failed { reasons } if reasons.is_empty() => {
                write!(f, "failed (no reasons reported)")
            }
            DeployFailure::Failed { reasons } => write!(f, "failed: {}", reasons.join("; ")),
            DeployFailure::Timeout { elapsed_secs } => {
                write!(f, "timeout after {:.0}s", elapsed_secs)
            }
        }
    }
}

/// Terminal deployment failure for a single policy.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Policy {policy_id} did not become ready: {reason}")]
pub struct DeployError {
    pub policy_id: String,
    pub reason: DeployFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(PolicyStatus::Ready.is_terminal());
        assert!(PolicyStatus::Failed.is_terminal());
        assert!(!PolicyStatus::Creating.is_terminal());
        assert!(!PolicyStatus::Updating.is_terminal());
        assert!(!PolicyStatus::Deleting.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        let status: PolicyStatus = serde_json::from_str("\"UPDATING\"").unwrap();
        assert_eq!(status, PolicyStatus::Updating);
        assert_eq!(serde_json::to_string(&PolicyStatus::Ready).unwrap(), "\"READY\"");
    }

    #[test]
    fn test_deploy_error_is_structured() {
        let err = DeployError {
            policy_id: "gr-1".to_string(),
            reason: DeployFailure::Failed {
                reasons: vec!["invalid filter strength".to_string()],
            },
        };

        let wire = serde_json::to_value(&err).unwrap();
        assert_eq!(wire["reason"]["kind"], "failed");
        assert_eq!(wire["reason"]["reasons"][0], "invalid filter strength");
        assert!(err.to_string().contains("invalid filter strength"));
    }

    #[test]
    fn test_timeout_display() {
        let reason = DeployFailure::Timeout { elapsed_secs: 300.0 };
        assert_eq!(reason.to_string(), "timeout after 300s");
    }
}
