//! # warden-runtime
//!
//! Async side of Warden: everything that talks to the remote guardrail
//! service.
//!
//! - [`Reconciler`]: create-or-update a policy, then poll it to a terminal state
//! - [`PolicyVerifier`]: fire the adversarial battery through a ready policy
//! - [`BenchmarkHarness`]: run the benchmark suite against models concurrently
//!
//! Scoring and selection stay in `warden-core` and never perform I/O.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_runtime::{InMemoryPolicyStore, Reconciler, RuntimeConfig};
//!
//! let config = RuntimeConfig::default();
//! let store = Arc::new(InMemoryPolicyStore::new());
//! let reconciler = Reconciler::new(store, config.reconcile);
//!
//! let resource = reconciler.reconcile(&definition).await?;
//! ```

pub mod cache;
pub mod config;
pub mod harness;
pub mod reconciler;
pub mod store;
pub mod verifier;

pub use cache::ResourceCache;
pub use config::{BenchmarkConfig, ReconcilerConfig, RuntimeConfig, StoreConfig, VerifierConfig};
pub use harness::{BenchmarkHarness, InvocationError};
pub use reconciler::{PollOutcome, ReconcileError, Reconciler};
pub use store::{
    ApiCredential, CredentialSource, InMemoryPolicyStore, InvokeRequest, InvokeResponse,
    PolicyBinding, PolicyStore, PollStep, StoreError,
};
pub use verifier::PolicyVerifier;

#[cfg(feature = "http")]
pub use store::{HttpPolicyStore, API_KEY_ENV};
