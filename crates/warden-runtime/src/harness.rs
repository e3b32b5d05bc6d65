//! Concurrent model benchmarking.
//!
//! One task per model, cases sequential within a task. Tasks share nothing
//! mutable; each returns a complete [`ModelReport`] and the reports are
//! merged only after every task has finished or failed.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use warden_core::{
    BenchmarkCase, CaseResult, EnvelopeError, GenerationParams, InvocationResult, ModelReport,
    ModelSpec, ResponseScorer,
};

use crate::store::{InvokeRequest, PolicyBinding, PolicyStore, StoreError};

/// A single case's invocation failure. Isolated to that case.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

pub struct BenchmarkHarness {
    store: Arc<dyn PolicyStore>,
    scorer: Arc<ResponseScorer>,
    params: GenerationParams,
    binding: Option<PolicyBinding>,
}

impl BenchmarkHarness {
    pub fn new(store: Arc<dyn PolicyStore>, params: GenerationParams) -> Self {
        Self {
            store,
            scorer: Arc::new(ResponseScorer::default()),
            params,
            binding: None,
        }
    }

    pub fn with_scorer(mut self, scorer: ResponseScorer) -> Self {
        self.scorer = Arc::new(scorer);
        self
    }

    /// Benchmark through a policy instead of the bare models.
    pub fn with_policy(mut self, binding: PolicyBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Run `cases` against every model, keyed by model id.
    ///
    /// Duplicate model ids are benchmarked once.
    pub async fn run(
        &self,
        models: &[ModelSpec],
        cases: &[BenchmarkCase],
    ) -> BTreeMap<String, ModelReport> {
        let unique: BTreeMap<&str, &ModelSpec> =
            models.iter().map(|m| (m.id.as_str(), m)).collect();
        let cases: Arc<[BenchmarkCase]> = cases.into();

        tracing::info!(models = unique.len(), cases = cases.len(), "Starting benchmark");

        let (specs, handles): (Vec<ModelSpec>, Vec<_>) = unique
            .into_values()
            .map(|model| {
                let task = ModelTask {
                    store: Arc::clone(&self.store),
                    scorer: Arc::clone(&self.scorer),
                    params: self.params.clone(),
                    binding: self.binding.clone(),
                    model: model.clone(),
                    cases: Arc::clone(&cases),
                };
                (model.clone(), tokio::spawn(task.run()))
            })
            .unzip();

        let joined = join_all(handles).await;

        specs
            .into_iter()
            .zip(joined)
            .map(|(model, outcome)| {
                let report = outcome.unwrap_or_else(|err| {
                    tracing::error!(model = %model.id, error = %err, "Benchmark task failed");
                    ModelReport::task_failed(&model, &cases, format!("benchmark task failed: {err}"))
                });
                (model.id, report)
            })
            .collect()
    }
}

/// Everything one model's task owns.
struct ModelTask {
    store: Arc<dyn PolicyStore>,
    scorer: Arc<ResponseScorer>,
    params: GenerationParams,
    binding: Option<PolicyBinding>,
    model: ModelSpec,
    cases: Arc<[BenchmarkCase]>,
}

impl ModelTask {
    async fn run(self) -> ModelReport {
        let mut results = Vec::with_capacity(self.cases.len());

        for (index, case) in self.cases.iter().enumerate() {
            let result = match self.invoke(index, case).await {
                Ok(invocation) => {
                    let quality = self.scorer.score(&invocation.response, case);
                    tracing::debug!(
                        model = %self.model.id,
                        case = index,
                        latency_secs = invocation.latency_secs,
                        quality = quality.total,
                        "Case scored"
                    );
                    CaseResult::scored(case, invocation, quality)
                }
                Err(err) => {
                    tracing::warn!(model = %self.model.id, case = index, error = %err, "Case errored");
                    CaseResult::errored(index, case, err.to_string())
                }
            };
            results.push(result);
        }

        let report = ModelReport::from_results(&self.model, results);
        tracing::info!(
            model = %report.model_id,
            passed = report.passed_cases,
            failed = report.failed_cases,
            average_latency_secs = report.average_latency_secs,
            "Model benchmarked"
        );
        report
    }

    async fn invoke(
        &self,
        index: usize,
        case: &BenchmarkCase,
    ) -> Result<InvocationResult, InvocationError> {
        let request = InvokeRequest {
            model_id: self.model.id.clone(),
            body: self.model.family.request_body(&case.prompt, &self.params),
            binding: self.binding.clone(),
        };

        // Latency of the answering attempt only, never the backoff before it.
        let response = self.store.invoke_model(&request).await?;
        let parsed = self.model.family.parse_response(&response.body)?;
        Ok(InvocationResult {
            model_id: self.model.id.clone(),
            case_index: index,
            response: parsed.text,
            latency_secs: response.latency.as_secs_f64(),
            tokens: parsed.tokens,
        })
    }
}
