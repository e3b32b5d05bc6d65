//! # warden-core
//!
//! Deterministic pieces of guardrail operations and model benchmarking.
//!
//! This crate answers, without any network I/O:
//! - Is this guardrail definition well-formed, and what request does it become?
//! - How good is this response for this benchmark case?
//! - Given per-model reports, which model should serve each category?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: scoring and selection depend only on their inputs
//! 2. **Full replace**: every [`PolicyRequest`] is complete; omitted fields take fixed defaults
//! 3. **Structured failures**: errors and artifacts carry typed reasons, not bare messages
//!
//! ## Example
//!
//! ```rust,ignore
//! use warden_core::{benchmark_suite, ResponseScorer};
//!
//! let scorer = ResponseScorer::default();
//! let case = &benchmark_suite()[0];
//! let score = scorer.score("Happy to help with your order status.", case);
//! println!("quality {:.2}, passed {}", score.total, score.passed());
//! ```

pub mod artifact;
pub mod family;
pub mod policy;
pub mod report;
pub mod scorer;
pub mod selector;
pub mod suites;
pub mod verification;

pub use artifact::{
    write_artifact, ArtifactError, BenchmarkArtifact, DeploymentArtifact, FailureReason,
    RunStatus, BENCHMARK_ARTIFACT, DEPLOYMENT_ARTIFACT,
};
pub use family::{
    estimate_tokens, EnvelopeError, GenerationParams, ModelFamily, ModelSpec, ParsedResponse,
};
pub use policy::{
    ConfigError, DeployError, DeployFailure, PolicyDefaults, PolicyDefinition, PolicyRequest,
    PolicyResource, PolicyStatus, PolicySummary,
};
pub use report::{CaseOutcome, CaseResult, InvocationResult, ModelReport};
pub use scorer::{KeywordCatalog, QualityScore, ResponseScorer, PASS_THRESHOLD};
pub use selector::{combined_score, ModelSelector, Recommendation, Standing};
pub use suites::{
    benchmark_suite, verification_suite, BenchmarkCase, ExpectedOutcome, VerificationCase,
    BENCHMARK_SUITE_VERSION, VERIFICATION_SUITE_VERSION,
};
pub use verification::{CaseVerdict, VerificationOutcome, VerificationReport};
