//! Guardrail reconciliation.
//!
//! `reconcile` brings the remote policy named by a definition in line with
//! it: look up by name, update (full replace) or create, then poll until
//! the policy is `READY`, `FAILED`, or the timeout elapses.
//!
//! ## Concurrency
//!
//! A reconcile call is not re-entrant. Callers must not reconcile the same
//! policy name concurrently; nothing here enforces that.

use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use warden_core::{
    ConfigError, DeployError, DeployFailure, FailureReason, PolicyDefinition, PolicyRequest,
    PolicyResource, PolicyStatus,
};

use crate::cache::ResourceCache;
use crate::config::ReconcilerConfig;
use crate::store::{PolicyStore, StoreError};

/// Errors that end a reconciliation.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("Policy store error: {0}")]
    Remote(#[from] StoreError),
}

impl ReconcileError {
    /// Structured reason for run artifacts.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            ReconcileError::Config(err) => FailureReason::new("config", err.to_string()),
            ReconcileError::Deploy(err) => match &err.reason {
                DeployFailure::Failed { reasons } => {
                    FailureReason::new("deploy_failed", err.to_string()).with_reasons(reasons.clone())
                }
                DeployFailure::Timeout { .. } => FailureReason::new("deploy_timeout", err.to_string()),
            },
            ReconcileError::Remote(err) => FailureReason::new("remote", err.to_string()),
        }
    }
}

/// Decision over one status fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ready(PolicyResource),
    Failed(Vec<String>),
    InProgress(PolicyStatus),

    /// The policy has not propagated yet; keep polling.
    NotYetVisible,

    /// Anything else ends the loop.
    OtherError(StoreError),
}

impl PollOutcome {
    pub fn classify(result: Result<PolicyResource, StoreError>) -> Self {
        match result {
            Ok(resource) if !resource.status.is_terminal() => {
                PollOutcome::InProgress(resource.status)
            }
            Ok(resource) if resource.status == PolicyStatus::Ready => PollOutcome::Ready(resource),
            Ok(resource) => PollOutcome::Failed(resource.failure_reasons),
            Err(err) if err.is_not_found() => PollOutcome::NotYetVisible,
            Err(err) => PollOutcome::OtherError(err),
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn PolicyStore>,
    config: ReconcilerConfig,
    cache: ResourceCache,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PolicyStore>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            config,
            cache: ResourceCache::default(),
        }
    }

    /// Ensure the remote policy matches `definition` and is ready.
    pub async fn reconcile(
        &self,
        definition: &PolicyDefinition,
    ) -> Result<PolicyResource, ReconcileError> {
        definition.validate()?;
        let request = PolicyRequest::from_definition(definition, &self.config.defaults());

        let id = match self.find_existing(&definition.name).await? {
            Some(existing) => {
                tracing::info!(policy = %definition.name, policy_id = %existing, "Updating policy");
                self.store.update_policy(&existing, &request).await?
            }
            None => {
                tracing::info!(policy = %definition.name, "Creating policy");
                self.store.create_policy(&request).await?
            }
        };

        self.wait_until_ready(&id).await
    }

    /// Id of the policy named `name`, if one exists.
    pub async fn find_existing(&self, name: &str) -> Result<Option<String>, StoreError> {
        let policies = self.store.list_policies().await?;
        Ok(policies.into_iter().find(|p| p.name == name).map(|p| p.id))
    }

    /// Poll `id` until it reaches a terminal status or the timeout elapses.
    pub async fn wait_until_ready(&self, id: &str) -> Result<PolicyResource, ReconcileError> {
        let started = Instant::now();

        loop {
            let result = self.store.get_policy(id).await;
            if let Ok(resource) = &result {
                self.cache.insert(resource.clone()).await;
            }

            match PollOutcome::classify(result) {
                PollOutcome::Ready(resource) => {
                    tracing::info!(
                        policy_id = %id,
                        version = ?resource.version,
                        elapsed = ?started.elapsed(),
                        "Policy ready"
                    );
                    return Ok(resource);
                }
                PollOutcome::Failed(reasons) => {
                    tracing::error!(policy_id = %id, reasons = ?reasons, "Policy failed");
                    return Err(DeployError {
                        policy_id: id.to_string(),
                        reason: DeployFailure::Failed { reasons },
                    }
                    .into());
                }
                PollOutcome::OtherError(err) => return Err(err.into()),
                PollOutcome::InProgress(status) => {
                    tracing::debug!(policy_id = %id, status = %status, "Waiting for policy");
                }
                PollOutcome::NotYetVisible => {
                    tracing::debug!(policy_id = %id, "Policy not visible yet");
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.timeout {
                tracing::error!(policy_id = %id, elapsed = ?elapsed, "Timed out waiting for policy");
                return Err(DeployError {
                    policy_id: id.to_string(),
                    reason: DeployFailure::Timeout {
                        elapsed_secs: elapsed.as_secs_f64(),
                    },
                }
                .into());
            }

            tokio::time::sleep(self.config.poll_interval.min(self.config.timeout - elapsed)).await;
        }
    }

    /// Last observed state of `id`. The remote store remains authoritative.
    pub async fn cached(&self, id: &str) -> Option<PolicyResource> {
        self.cache.get(id).await
    }
}
