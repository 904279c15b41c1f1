use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compose;
use crate::config::Settings;
use crate::error::{Error, ErrorKind, Result};
use crate::events::{Event, EventBus};
use crate::materialize::Materializer;
use crate::plan::{self, ActionKind};
use crate::resolver;
use crate::runtime::{ComposeOptions, ContainerRuntime};
use crate::store::Store;
use crate::types::{Diagnostic, EffectiveConfig, LockfileEntry, Stack};

/// Phases of one apply, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyPhase {
    Locking,
    EnsuringNetwork,
    MaterializingConfigs,
    Composing,
    RecordingLockfile,
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub stack: String,
    pub fingerprint: String,
    pub actions: Vec<plan::PlanAction>,
    pub diagnostics: Vec<Diagnostic>,
    pub lockfile_instances: Vec<String>,
    pub duration_ms: u64,
}

/// Ordered reconciliation of one stack against the engine, guarded by the
/// per-stack advisory lock.
pub struct ApplyEngine {
    store: Store,
    runtime: Arc<dyn ContainerRuntime>,
    materializer: Materializer,
    events: EventBus,
    lock_ttl_secs: u64,
    engine_timeout: Duration,
    apply_timeout: Duration,
    host_project_root: Option<std::path::PathBuf>,
}

impl ApplyEngine {
    pub fn new(
        store: Store,
        runtime: Arc<dyn ContainerRuntime>,
        events: EventBus,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            runtime,
            materializer: Materializer::new(settings.compose_root_path()),
            events,
            lock_ttl_secs: settings.lock_ttl_secs,
            engine_timeout: Duration::from_secs(settings.engine_timeout_secs),
            apply_timeout: Duration::from_secs(settings.apply_timeout_secs),
            host_project_root: settings.host_project_root_path(),
        }
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Execute a previously returned plan, identified by its fingerprint.
    ///
    /// LOCKING -> ENSURING_NETWORK -> MATERIALIZING_CONFIGS -> COMPOSING ->
    /// RECORDING_LOCKFILE, with rollback on any failure after
    /// materialization. The lock is always released on the way out.
    pub async fn apply(&self, stack_name: &str, submitted_fingerprint: &str) -> Result<ApplyReport> {
        let started = std::time::Instant::now();
        let stack = self.store.require_stack(stack_name).await?;

        debug!(stack = %stack.name, phase = ?ApplyPhase::Locking, "acquiring stack lock");
        let holder = Uuid::new_v4().to_string();
        let lock = self
            .store
            .acquire_lock(&stack.id, &holder, self.lock_ttl_secs)
            .await?;

        self.events.publish(Event::ApplyStarted {
            stack: stack.name.clone(),
        });

        let result = self.locked_apply(&stack, submitted_fingerprint).await;

        if let Err(e) = self.store.release_lock(&stack.id, &lock.holder).await {
            warn!(stack = %stack.name, error = %e, "failed to release stack lock");
        }

        match &result {
            Ok(report) => {
                info!(
                    stack = %stack.name,
                    actions = report.actions.len(),
                    "apply completed"
                );
                self.events.publish(Event::ApplyCompleted {
                    stack: stack.name.clone(),
                    fingerprint: report.fingerprint.clone(),
                });
            }
            Err(e) => {
                warn!(stack = %stack.name, error = %e, "apply failed");
                self.events.publish(Event::ApplyFailed {
                    stack: stack.name.clone(),
                    kind: e.kind,
                });
            }
        }

        result.map(|mut report| {
            report.duration_ms = started.elapsed().as_millis() as u64;
            report
        })
    }

    async fn locked_apply(&self, stack: &Stack, submitted_fingerprint: &str) -> Result<ApplyReport> {
        // Staleness: the plan must still describe the current stack.
        let configs = resolver::resolve_stack(&self.store, &stack.name).await?;
        let current_fingerprint = plan::fingerprint(stack, &configs)?;
        if current_fingerprint != submitted_fingerprint {
            return Err(Error::plan_stale(
                "the stack changed after the plan was created",
            )
            .with_suggestion("re-plan and submit the new fingerprint"));
        }

        let generated = compose::generate(stack, &configs, self.host_project_root.as_deref())?;
        let enabled: Vec<&EffectiveConfig> = configs.iter().filter(|c| c.enabled).collect();

        // Unmanaged containers occupying derived names are a conflict, never
        // adopted.
        for config in &enabled {
            if let Some(state) = self.engine_call(self.runtime.inspect(&config.container_name)).await? {
                if !state.is_managed() {
                    return Err(Error::conflict(format!(
                        "container '{}' exists but is not managed by devarch",
                        config.container_name
                    ))
                    .with_suggestion(format!(
                        "remove or rename the container '{}'",
                        config.container_name
                    )));
                }
            }
        }

        debug!(stack = %stack.name, phase = ?ApplyPhase::EnsuringNetwork, "ensuring stack network");
        self.ensure_network(stack).await?;

        // Stop and remove containers for instances that left the desired set.
        let plan_actions = self.removal_actions(stack, &configs).await?;
        for action in &plan_actions {
            let name = crate::validation::container_name(&stack.name, &action.instance_id);
            debug!(container = %name, "removing container");
            self.engine_call(self.runtime.stop(&name, Duration::from_secs(10)))
                .await
                .ok();
            self.engine_call(self.runtime.remove(&name, true)).await?;
        }

        debug!(stack = %stack.name, phase = ?ApplyPhase::MaterializingConfigs, "materializing configs");
        let guard = self.materializer.materialize(&stack.name, &configs).await?;

        let compose_path = self.materializer.compose_file(&stack.name);
        if let Err(e) = write_atomic(&compose_path, generated.yaml.as_bytes()).await {
            guard.rollback().await.ok();
            return Err(e);
        }

        debug!(stack = %stack.name, phase = ?ApplyPhase::Composing, "running compose up");
        let wait_budget = enabled
            .iter()
            .filter_map(|c| c.healthcheck.as_ref())
            .map(|hc| hc.wait_budget_secs())
            .max()
            .map(Duration::from_secs);
        let opts = ComposeOptions {
            project: stack.name.clone(),
            file: compose_path,
            wait_timeout: wait_budget,
            remove_orphans: true,
        };

        let compose_result = match timeout(self.apply_timeout, self.runtime.compose_up(&opts)).await
        {
            Ok(result) => result,
            Err(elapsed) => Err(Error::from(elapsed)),
        };
        if let Err(e) = compose_result {
            debug!(stack = %stack.name, phase = ?ApplyPhase::Rollback, "restoring previous materialization");
            guard.rollback().await.ok();
            return Err(attribute_conflict(e, &generated.diagnostics));
        }

        debug!(stack = %stack.name, phase = ?ApplyPhase::RecordingLockfile, "recording lockfile");
        let entries = self.snapshot_lockfile(stack, &enabled).await?;
        let lockfile_instances = entries.iter().map(|e| e.instance_id.clone()).collect();
        self.store.replace_lockfile(&stack.id, &entries).await?;
        self.store
            .set_last_applied_checksum(&stack.id, &current_fingerprint)
            .await?;
        guard.commit().await?;

        let mut actions = plan_actions;
        for instance_id in &generated.service_order {
            actions.push(plan::PlanAction {
                kind: ActionKind::Add,
                instance_id: instance_id.clone(),
                reason: "reconciled by compose".to_string(),
                changed_fields: vec![],
            });
        }

        Ok(ApplyReport {
            stack: stack.name.clone(),
            fingerprint: current_fingerprint,
            actions,
            diagnostics: generated.diagnostics,
            lockfile_instances,
            duration_ms: 0,
        })
    }

    /// Idempotent network ensure, with a single retry when the engine is
    /// momentarily unavailable.
    async fn ensure_network(&self, stack: &Stack) -> Result<()> {
        let network = stack.network();
        let mut labels = std::collections::BTreeMap::new();
        labels.insert(
            crate::validation::LABEL_MANAGED_BY.to_string(),
            crate::validation::MANAGED_BY_VALUE.to_string(),
        );
        labels.insert(
            crate::validation::LABEL_STACK_ID.to_string(),
            stack.name.clone(),
        );

        match self
            .engine_call(self.runtime.network_create(&network, &labels))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind == ErrorKind::EngineUnavailable => {
                warn!(network = %network, "engine unavailable, retrying network ensure once");
                tokio::time::sleep(Duration::from_millis(500)).await;
                self.engine_call(self.runtime.network_create(&network, &labels))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Remove actions for containers whose instances are disabled or gone.
    async fn removal_actions(
        &self,
        stack: &Stack,
        configs: &[EffectiveConfig],
    ) -> Result<Vec<plan::PlanAction>> {
        let mut actions = Vec::new();
        let mut candidates: Vec<(String, String)> = configs
            .iter()
            .filter(|c| !c.enabled)
            .map(|c| {
                (
                    c.instance_id.clone(),
                    format!("instance '{}' is disabled", c.instance_id),
                )
            })
            .collect();

        let desired: std::collections::HashSet<&str> =
            configs.iter().map(|c| c.instance_id.as_str()).collect();
        for entry in self.store.get_lockfile(&stack.id).await? {
            if !desired.contains(entry.instance_id.as_str()) {
                candidates.push((
                    entry.instance_id.clone(),
                    format!("instance '{}' no longer exists", entry.instance_id),
                ));
            }
        }

        candidates.sort();
        candidates.dedup_by(|a, b| a.0 == b.0);
        for (instance_id, reason) in candidates {
            let name = crate::validation::container_name(&stack.name, &instance_id);
            if self.engine_call(self.runtime.inspect(&name)).await?.is_some() {
                actions.push(plan::PlanAction {
                    kind: ActionKind::Remove,
                    instance_id,
                    reason,
                    changed_fields: vec![],
                });
            }
        }
        Ok(actions)
    }

    /// Snapshot chosen host ports, observed image digests, and template
    /// versions after a successful compose.
    async fn snapshot_lockfile(
        &self,
        stack: &Stack,
        enabled: &[&EffectiveConfig],
    ) -> Result<Vec<LockfileEntry>> {
        let now = Utc::now();
        let mut entries = Vec::with_capacity(enabled.len());
        for config in enabled {
            let observed = self
                .engine_call(self.runtime.inspect(&config.container_name))
                .await?;
            let mut host_ports: Vec<u16> = match &observed {
                Some(state) if !state.host_ports.is_empty() => state.host_ports.clone(),
                _ => config.ports.iter().filter_map(|p| p.host).collect(),
            };
            host_ports.sort_unstable();
            host_ports.dedup();

            entries.push(LockfileEntry {
                stack_id: stack.id.clone(),
                instance_id: config.instance_id.clone(),
                host_ports,
                image_digest: observed.and_then(|s| s.image_digest),
                template_version: config.template_version,
                config_hash: resolver::effective_hash(config)?,
                config_snapshot: serde_json::to_string(config)?,
                recorded_at: now,
            });
        }
        Ok(entries)
    }

    /// Every engine RPC runs under the configured deadline.
    async fn engine_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(self.engine_timeout, fut).await {
            Ok(result) => result,
            Err(elapsed) => Err(Error::from(elapsed)),
        }
    }
}

/// A port-bind conflict reported by the engine is attributed to the
/// instance the generator already flagged for that collision.
fn attribute_conflict(err: Error, diagnostics: &[Diagnostic]) -> Error {
    if err.kind != ErrorKind::Conflict {
        return err;
    }
    let collided: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.kind == crate::types::DiagnosticKind::PortCollision)
        .filter_map(|d| d.instance_id.as_deref())
        .collect();
    if collided.is_empty() {
        return err;
    }
    let message = format!("{} (instances: {})", err.message, collided.join(", "));
    Error::conflict(message)
        .with_suggestion("change the colliding host port override")
        .with_cause(err)
}

/// Write-temp-and-rename so partial files are never observable.
pub async fn write_atomic(path: &std::path::Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::internal(format!("no parent for '{}'", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    ));
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compose.yaml");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!dir.path().join(".compose.yaml.tmp").exists());
    }
}
