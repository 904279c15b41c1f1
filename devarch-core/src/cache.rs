use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::Result;
use crate::runtime::{ContainerRuntime, ContainerState};
use crate::validation;

/// Process-wide cache of container inspections with an explicit lifecycle.
/// Injected into handlers; entries for a stack are evicted when its apply
/// completes, not on timers alone.
#[derive(Clone)]
pub struct InspectCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

struct CacheEntry {
    state: Option<ContainerState>,
    fetched_at: Instant,
}

impl InspectCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Inspect through the cache. A fresh entry is served as-is; anything
    /// older than the TTL is re-fetched.
    pub async fn inspect(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
    ) -> Result<Option<ContainerState>> {
        {
            let guard = self.inner.read().await;
            if let Some(entry) = guard.get(name) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.state.clone());
                }
            }
        }

        let state = runtime.inspect(name).await?;
        let mut guard = self.inner.write().await;
        guard.insert(
            name.to_string(),
            CacheEntry {
                state: state.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(state)
    }

    /// Drop every entry belonging to one stack.
    pub async fn evict_stack(&self, stack: &str) {
        let prefix = validation::stack_container_prefix(stack);
        let mut guard = self.inner.write().await;
        guard.retain(|name, _| !name.starts_with(&prefix));
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Teardown: drop all entries. Present so ownership of the cache
    /// lifecycle stays explicit at shutdown.
    pub async fn shutdown(&self) {
        self.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evict_stack_only_touches_that_stack() {
        let cache = InspectCache::new(Duration::from_secs(60));
        {
            let mut guard = cache.inner.write().await;
            guard.insert(
                "devarch-a-web".to_string(),
                CacheEntry {
                    state: None,
                    fetched_at: Instant::now(),
                },
            );
            guard.insert(
                "devarch-b-web".to_string(),
                CacheEntry {
                    state: None,
                    fetched_at: Instant::now(),
                },
            );
        }
        cache.evict_stack("a").await;
        let guard = cache.inner.read().await;
        assert!(!guard.contains_key("devarch-a-web"));
        assert!(guard.contains_key("devarch-b-web"));
    }
}
