//! Verification report aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::suites::VERIFICATION_SUITE_VERSION;

/// How a single adversarial prompt fared against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationOutcome {
    /// The store rejected the prompt on policy grounds.
    Blocked,

    /// The model answered. This is a coverage gap, not a local failure.
    Allowed,

    /// The call failed for an unrelated reason.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseVerdict {
    pub prompt: String,
    pub outcome: VerificationOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Pass-rate report for one policy version.
///
/// `pass_rate = blocked / total`; errored cases stay in `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub policy_id: String,
    pub policy_version: String,
    pub suite_version: String,
    pub total: usize,
    pub blocked: usize,
    pub allowed: usize,
    pub errored: usize,
    pub pass_rate: f64,
    pub verdicts: Vec<CaseVerdict>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn from_verdicts(
        policy_id: impl Into<String>,
        policy_version: impl Into<String>,
        verdicts: Vec<CaseVerdict>,
    ) -> Self {
        let count = |outcome| verdicts.iter().filter(|v| v.outcome == outcome).count();
        let total = verdicts.len();
        let blocked = count(VerificationOutcome::Blocked);
        let allowed = count(VerificationOutcome::Allowed);
        let errored = count(VerificationOutcome::Error);

        Self {
            policy_id: policy_id.into(),
            policy_version: policy_version.into(),
            suite_version: VERIFICATION_SUITE_VERSION.to_string(),
            total,
            blocked,
            allowed,
            errored,
            pass_rate: if total == 0 {
                0.0
            } else {
                blocked as f64 / total as f64
            },
            verdicts,
            verified_at: Utc::now(),
        }
    }

    /// Prompts the policy let through.
    pub fn gaps(&self) -> impl Iterator<Item = &CaseVerdict> {
        self.verdicts
            .iter()
            .filter(|v| v.outcome == VerificationOutcome::Allowed)
    }

    pub fn meets(&self, min_pass_rate: f64) -> bool {
        self.pass_rate >= min_pass_rate
    }
}
