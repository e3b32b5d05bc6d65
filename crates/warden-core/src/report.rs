//! Per-model benchmark reports.

use serde::{Deserialize, Serialize};

use crate::family::{ModelFamily, ModelSpec};
use crate::scorer::QualityScore;
use crate::suites::BenchmarkCase;

/// A successful invocation, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub model_id: String,
    pub case_index: usize,
    pub response: String,

    /// Wall-clock seconds from dispatch to full body read.
    pub latency_secs: f64,

    /// Exact when reported by the service, else estimated.
    pub tokens: u64,
}

/// What happened to one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaseOutcome {
    Scored {
        response: String,
        latency_secs: f64,
        tokens: u64,
        quality: QualityScore,
        passed: bool,
    },
    Errored {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_index: usize,
    pub category: String,
    pub prompt: String,

    #[serde(flatten)]
    pub outcome: CaseOutcome,
}

impl CaseResult {
    pub fn scored(case: &BenchmarkCase, invocation: InvocationResult, quality: QualityScore) -> Self {
        Self {
            case_index: invocation.case_index,
            category: case.category.clone(),
            prompt: case.prompt.clone(),
            outcome: CaseOutcome::Scored {
                response: invocation.response,
                latency_secs: invocation.latency_secs,
                tokens: invocation.tokens,
                passed: quality.passed(),
                quality,
            },
        }
    }

    pub fn errored(case_index: usize, case: &BenchmarkCase, error: impl Into<String>) -> Self {
        Self {
            case_index,
            category: case.category.clone(),
            prompt: case.prompt.clone(),
            outcome: CaseOutcome::Errored {
                error: error.into(),
            },
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self.outcome, CaseOutcome::Scored { passed: true, .. })
    }

    /// `(quality, latency)` for scored cases.
    pub fn measurement(&self) -> Option<(f64, f64)> {
        match &self.outcome {
            CaseOutcome::Scored {
                quality,
                latency_secs,
                ..
            } => Some((quality.total, *latency_secs)),
            CaseOutcome::Errored { .. } => None,
        }
    }
}

/// Aggregated results for one model. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model_id: String,
    pub family: ModelFamily,
    pub total_cases: usize,
    pub passed_cases: usize,
    pub failed_cases: usize,

    /// Mean over scored cases; 0 when none were scored.
    pub average_latency_secs: f64,
    pub total_tokens: u64,

    /// `passed / scored`; `None` when no case produced a score.
    pub success_rate: Option<f64>,

    /// Set when the model's task died before finishing its cases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub results: Vec<CaseResult>,
}

impl ModelReport {
    pub fn from_results(model: &ModelSpec, results: Vec<CaseResult>) -> Self {
        let total_cases = results.len();
        let passed_cases = results.iter().filter(|r| r.passed()).count();
        let measurements: Vec<(f64, f64)> = results.iter().filter_map(CaseResult::measurement).collect();
        let total_tokens = results
            .iter()
            .map(|r| match r.outcome {
                CaseOutcome::Scored { tokens, .. } => tokens,
                CaseOutcome::Errored { .. } => 0,
            })
            .sum();

        let (average_latency_secs, success_rate) = if measurements.is_empty() {
            (0.0, None)
        } else {
            let scored = measurements.len() as f64;
            (
                measurements.iter().map(|(_, latency)| latency).sum::<f64>() / scored,
                Some(passed_cases as f64 / scored),
            )
        };

        Self {
            model_id: model.id.clone(),
            family: model.family,
            total_cases,
            passed_cases,
            failed_cases: total_cases - passed_cases,
            average_latency_secs,
            total_tokens,
            success_rate,
            error: None,
            results,
        }
    }

    /// Report for a model whose task failed outright: every case is failed.
    pub fn task_failed(model: &ModelSpec, cases: &[BenchmarkCase], error: impl Into<String>) -> Self {
        let error = error.into();
        let results = cases
            .iter()
            .enumerate()
            .map(|(i, case)| CaseResult::errored(i, case, error.clone()))
            .collect();

        Self {
            error: Some(error),
            ..Self::from_results(model, results)
        }
    }

    /// Whether this model clears `threshold`.
    pub fn succeeded(&self, threshold: f64) -> bool {
        self.success_rate.is_some_and(|rate| rate >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(total: f64) -> QualityScore {
        QualityScore {
            length_fit: 0.0,
            keyword_relevance: 0.0,
            well_formedness: 0.0,
            total,
        }
    }

    fn invocation(case_index: usize, latency_secs: f64, tokens: u64) -> InvocationResult {
        InvocationResult {
            model_id: "m".to_string(),
            case_index,
            response: "ok".to_string(),
            latency_secs,
            tokens,
        }
    }

    fn model() -> ModelSpec {
        ModelSpec::new("m", ModelFamily::Completion)
    }

    #[test]
    fn test_errored_cases_excluded_from_aggregates() {
        let case = BenchmarkCase::new("p", "customer_service", 10, "");
        let results = vec![
            CaseResult::scored(&case, invocation(0, 1.0, 10), quality(0.9)),
            CaseResult::scored(&case, invocation(1, 3.0, 20), quality(0.5)),
            CaseResult::errored(2, &case, "throttled"),
        ];

        let report = ModelReport::from_results(&model(), results);
        assert_eq!(report.total_cases, 3);
        assert_eq!(report.passed_cases, 1);
        assert_eq!(report.failed_cases, 2);
        assert_eq!(report.average_latency_secs, 2.0);
        assert_eq!(report.total_tokens, 30);
        assert_eq!(report.success_rate, Some(0.5));
        assert!(!report.succeeded(0.7));
    }

    #[test]
    fn test_task_failure_marks_every_case_failed() {
        let cases = vec![
            BenchmarkCase::new("a", "customer_service", 10, ""),
            BenchmarkCase::new("b", "customer_service", 10, ""),
        ];
        let report = ModelReport::task_failed(&model(), &cases, "access denied");

        assert_eq!(report.passed_cases, 0);
        assert_eq!(report.failed_cases, 2);
        assert_eq!(report.success_rate, None);
        assert_eq!(report.error.as_deref(), Some("access denied"));
        assert_eq!(report.results[1].prompt, "b");
    }

    #[test]
    fn test_case_result_wire_format() {
        let case = BenchmarkCase::new("p", "customer_service", 10, "");
        let json = serde_json::to_value(CaseResult::errored(0, &case, "boom")).unwrap();
        assert_eq!(json["outcome"], "errored");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["category"], "customer_service");
    }
}
