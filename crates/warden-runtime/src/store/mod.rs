//! Policy store abstractions for warden-runtime.
//!
//! The policy store is the only remote collaborator: it creates, updates,
//! reads and lists guardrail policies, and invokes models optionally bound
//! to a policy version.
//!
//! ## Security
//!
//! Remote implementations use the [`secrets`] module for credential handling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use warden_core::{PolicyRequest, PolicyResource, PolicySummary};

mod memory;
pub mod secrets;

#[cfg(feature = "http")]
mod http;

pub use memory::{InMemoryPolicyStore, InvokeHandler, PollStep};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "http")]
pub use http::{HttpPolicyStore, API_KEY_ENV};

/// Errors from the policy store.
///
/// Callers branch on the variant, never on the message text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Blocked by policy {policy_id}: {message}")]
    Blocked { policy_id: String, message: String },

    #[error("Throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Store not configured: {0}")]
    NotConfigured(String),
}

impl StoreError {
    /// The resource has not propagated yet (or does not exist).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// A policy intervened on the invocation.
    pub fn is_blocked(&self) -> bool {
        matches!(self, StoreError::Blocked { .. })
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Worth retrying at the transport level.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Throttled { .. } | StoreError::HttpError(_) | StoreError::Timeout(_) => true,
            StoreError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Policy attached to a model invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub policy_id: String,
    pub version: String,
}

impl PolicyBinding {
    pub fn new(policy_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            version: version.into(),
        }
    }
}

/// A single model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub model_id: String,

    /// Family-specific envelope, see [`warden_core::ModelFamily`].
    pub body: JsonValue,

    pub binding: Option<PolicyBinding>,
}

/// A model's raw response body.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResponse {
    pub body: JsonValue,

    /// Dispatch to full body read of the attempt that produced `body`.
    /// Time spent backing off between attempts is not included.
    pub latency: Duration,
}

/// Remote guardrail service capability.
///
/// Calls are not cancellable mid-flight; callers enforce time budgets
/// around them.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Create a policy, returning its id.
    async fn create_policy(&self, request: &PolicyRequest) -> Result<String, StoreError>;

    /// Replace an existing policy wholesale, returning its id.
    async fn update_policy(&self, id: &str, request: &PolicyRequest) -> Result<String, StoreError>;

    /// Current status of a policy.
    async fn get_policy(&self, id: &str) -> Result<PolicyResource, StoreError>;

    /// All policies visible to the caller.
    async fn list_policies(&self) -> Result<Vec<PolicySummary>, StoreError>;

    /// Invoke a model and return its raw response body.
    ///
    /// A policy intervention is reported as [`StoreError::Blocked`].
    async fn invoke_model(&self, request: &InvokeRequest) -> Result<InvokeResponse, StoreError>;

    /// Store name for logs.
    fn name(&self) -> &str;
}
