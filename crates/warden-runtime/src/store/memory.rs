//! In-process policy store.
//!
//! Holds policies in memory and answers model invocations from registered
//! handlers. Status progressions can be scripted per policy name, which is
//! how the reconciler's polling behavior is exercised without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use warden_core::{PolicyRequest, PolicyResource, PolicyStatus, PolicySummary};

use super::{InvokeRequest, InvokeResponse, PolicyStore, StoreError};

/// Produces the response body for an invocation.
pub type InvokeHandler =
    Arc<dyn Fn(&InvokeRequest) -> Result<JsonValue, StoreError> + Send + Sync>;

/// One answer to `get_policy`.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    Status(PolicyStatus, Vec<String>),
    NotFound,
    Error(StoreError),
}

impl PollStep {
    pub fn status(status: PolicyStatus) -> Self {
        PollStep::Status(status, Vec::new())
    }

    pub fn failed(reasons: &[&str]) -> Self {
        PollStep::Status(
            PolicyStatus::Failed,
            reasons.iter().map(|r| r.to_string()).collect(),
        )
    }
}

struct StoredPolicy {
    request: PolicyRequest,
    version: u64,

    /// Remaining scripted answers; the last one repeats.
    steps: VecDeque<PollStep>,
}

struct ModelEndpoint {
    delay: Duration,
    handler: InvokeHandler,
}

#[derive(Default)]
struct State {
    policies: BTreeMap<String, StoredPolicy>,
    scripts: HashMap<String, Vec<PollStep>>,
    models: HashMap<String, Arc<ModelEndpoint>>,
    invocations: Vec<InvokeRequest>,
    next_id: u64,
    create_count: usize,
    update_count: usize,
    list_failure: Option<StoreError>,
}

/// Policy store backed by process memory.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    state: Mutex<State>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the `get_policy` answers for the policy named `name`.
    ///
    /// The script is attached on the next create or update of that name.
    /// Without a script a policy reports `READY` immediately.
    pub fn script_status(&self, name: impl Into<String>, steps: Vec<PollStep>) {
        self.state.lock().scripts.insert(name.into(), steps);
    }

    /// Register a model. `delay` is slept before the handler runs.
    pub fn on_invoke<F>(&self, model_id: impl Into<String>, delay: Duration, handler: F)
    where
        F: Fn(&InvokeRequest) -> Result<JsonValue, StoreError> + Send + Sync + 'static,
    {
        self.state.lock().models.insert(
            model_id.into(),
            Arc::new(ModelEndpoint {
                delay,
                handler: Arc::new(handler),
            }),
        );
    }

    /// Make the next `list_policies` call fail with `error`.
    pub fn fail_next_list(&self, error: StoreError) {
        self.state.lock().list_failure = Some(error);
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().create_count
    }

    pub fn update_count(&self) -> usize {
        self.state.lock().update_count
    }

    /// Invocations seen so far, in arrival order.
    pub fn invocations(&self) -> Vec<InvokeRequest> {
        self.state.lock().invocations.clone()
    }

    /// Last request stored under `id`.
    pub fn request_for(&self, id: &str) -> Option<PolicyRequest> {
        self.state
            .lock()
            .policies
            .get(id)
            .map(|p| p.request.clone())
    }

    fn steps_for(state: &mut State, name: &str) -> VecDeque<PollStep> {
        match state.scripts.remove(name) {
            Some(steps) if !steps.is_empty() => steps.into(),
            _ => VecDeque::from(vec![PollStep::status(PolicyStatus::Ready)]),
        }
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn create_policy(&self, request: &PolicyRequest) -> Result<String, StoreError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        state.create_count += 1;

        let id = format!("gr-{:04}", state.next_id);
        let steps = Self::steps_for(&mut state, &request.name);
        state.policies.insert(
            id.clone(),
            StoredPolicy {
                request: request.clone(),
                version: 1,
                steps,
            },
        );
        Ok(id)
    }

    async fn update_policy(&self, id: &str, request: &PolicyRequest) -> Result<String, StoreError> {
        let mut state = self.state.lock();
        if !state.policies.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        state.update_count += 1;

        let steps = Self::steps_for(&mut state, &request.name);
        if let Some(policy) = state.policies.get_mut(id) {
            policy.request = request.clone();
            policy.version += 1;
            policy.steps = steps;
        }
        Ok(id.to_string())
    }

    async fn get_policy(&self, id: &str) -> Result<PolicyResource, StoreError> {
        let mut state = self.state.lock();
        let policy = state
            .policies
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let step = if policy.steps.len() > 1 {
            policy.steps.pop_front()
        } else {
            policy.steps.front().cloned()
        };

        match step.unwrap_or_else(|| PollStep::status(PolicyStatus::Ready)) {
            PollStep::Status(status, failure_reasons) => Ok(PolicyResource {
                id: id.to_string(),
                status,
                failure_reasons,
                version: Some(policy.version.to_string()),
            }),
            PollStep::NotFound => Err(StoreError::NotFound(id.to_string())),
            PollStep::Error(err) => Err(err),
        }
    }

    async fn list_policies(&self) -> Result<Vec<PolicySummary>, StoreError> {
        let mut state = self.state.lock();
        if let Some(err) = state.list_failure.take() {
            return Err(err);
        }

        Ok(state
            .policies
            .iter()
            .map(|(id, policy)| PolicySummary {
                id: id.clone(),
                name: policy.request.name.clone(),
            })
            .collect())
    }

    async fn invoke_model(&self, request: &InvokeRequest) -> Result<InvokeResponse, StoreError> {
        let endpoint = {
            let mut state = self.state.lock();
            state.invocations.push(request.clone());
            state.models.get(&request.model_id).cloned()
        };

        let endpoint = endpoint.ok_or_else(|| {
            StoreError::NotFound(format!("model {}", request.model_id))
        })?;

        let started = tokio::time::Instant::now();
        if !endpoint.delay.is_zero() {
            tokio::time::sleep(endpoint.delay).await;
        }
        let body = (endpoint.handler)(request)?;
        Ok(InvokeResponse {
            body,
            latency: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
