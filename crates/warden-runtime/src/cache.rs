//! Read-only view of the policy resources the reconciler has observed.
//!
//! The remote store stays the source of truth; entries expire and are
//! overwritten on every poll.

use moka::future::Cache;
use std::time::Duration;
use warden_core::PolicyResource;

/// Last observed resource per policy id.
#[derive(Clone)]
pub struct ResourceCache {
    cache: Cache<String, PolicyResource>,
}

impl ResourceCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, id: &str) -> Option<PolicyResource> {
        self.cache.get(id).await
    }

    pub async fn insert(&self, resource: PolicyResource) {
        self.cache.insert(resource.id.clone(), resource).await;
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3600))
    }
}
