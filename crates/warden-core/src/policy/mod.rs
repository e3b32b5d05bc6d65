//! Guardrail policy definitions and the remote resource model.
//!
//! Definitions are structured data validated against JSON Schema, then
//! translated into full-replace requests for the policy store.

mod definition;
mod resource;
mod schema;

pub use definition::{
    ConfigError, ContentPolicyConfig, FiltersConfig, PiiEntitiesConfig, PolicyDefaults,
    PolicyDefinition, PolicyRequest, SensitiveInformationPolicyConfig, TopicPolicyConfig,
    TopicsConfig,
};
pub use resource::{DeployError, DeployFailure, PolicyResource, PolicyStatus, PolicySummary};
pub use schema::validate_definition_schema;
