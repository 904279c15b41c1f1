use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use devarch_core::apply::ApplyEngine;
use devarch_core::cache::InspectCache;
use devarch_core::config::Settings;
use devarch_core::events::{Event, EventBus};
use devarch_core::plan::Plan;
use devarch_core::runtime::ContainerRuntime;
use devarch_core::store::Store;

/// Latest plan per stack. Explicit lifecycle, evicted by apply-completion
/// and mutation events rather than timers.
#[derive(Clone, Default)]
pub struct PlanCache {
    inner: Arc<RwLock<HashMap<String, Plan>>>,
}

impl PlanCache {
    pub async fn put(&self, plan: Plan) {
        self.inner.write().await.insert(plan.stack.clone(), plan);
    }

    pub async fn get(&self, stack: &str) -> Option<Plan> {
        self.inner.read().await.get(stack).cloned()
    }

    pub async fn evict(&self, stack: &str) {
        self.inner.write().await.remove(stack);
    }
}

/// Everything the handlers need, injected rather than global.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub settings: Settings,
    pub events: EventBus,
    pub inspect_cache: InspectCache,
    pub plans: PlanCache,
    pub apply: Arc<ApplyEngine>,
}

impl AppState {
    pub fn new(store: Store, runtime: Arc<dyn ContainerRuntime>, settings: Settings) -> Self {
        let events = EventBus::default();
        let apply = Arc::new(ApplyEngine::new(
            store.clone(),
            runtime.clone(),
            events.clone(),
            &settings,
        ));
        Self {
            store,
            runtime,
            settings,
            events,
            inspect_cache: InspectCache::new(Duration::from_secs(5)),
            plans: PlanCache::default(),
            apply,
        }
    }

    /// Background eviction: apply completion and stack mutations drop that
    /// stack's cached inspections and plan.
    pub fn spawn_eviction_task(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.events.subscribe();
        let inspect_cache = self.inspect_cache.clone();
        let plans = self.plans.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let stack = event.stack().to_string();
                match event {
                    Event::ApplyCompleted { .. }
                    | Event::ApplyFailed { .. }
                    | Event::StackMutated { .. } => {
                        debug!(stack = %stack, "evicting caches for stack");
                        inspect_cache.evict_stack(&stack).await;
                        plans.evict(&stack).await;
                    }
                    Event::ApplyStarted { .. } => {}
                }
            }
        })
    }

    pub fn publish_mutation(&self, stack: &str) {
        self.events.publish(Event::StackMutated {
            stack: stack.to_string(),
        });
    }

    pub async fn shutdown(&self) {
        self.inspect_cache.shutdown().await;
    }
}
