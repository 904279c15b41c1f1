use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::InspectCache;
use crate::compose;
use crate::error::Result;
use crate::resolver;
use crate::runtime::ContainerRuntime;
use crate::store::Store;
use crate::types::{Diagnostic, DiagnosticKind, EffectiveConfig, LockfileEntry, Stack};
use crate::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Add,
    Modify,
    Remove,
}

/// One step of a plan, referencing an instance and carrying both a human
/// reason and the machine-readable changed fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    pub kind: ActionKind,
    pub instance_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub changed_fields: Vec<String>,
}

/// Ephemeral proposal for one stack. Invalidated by any stack mutation via
/// the fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub stack: String,
    pub fingerprint: String,
    pub actions: Vec<PlanAction>,
    pub diagnostics: Vec<Diagnostic>,
    pub created_at: DateTime<Utc>,
}

/// Stable hash over the semantic content of a stack: metadata plus the
/// sorted (instance id, enabled, effective-config hash, template version)
/// tuples. Map-key ordering and list positions are canonicalized by the
/// effective config itself.
pub fn fingerprint(stack: &Stack, configs: &[EffectiveConfig]) -> Result<String> {
    let mut instances: Vec<(String, bool, String, i64)> = Vec::with_capacity(configs.len());
    for config in configs {
        instances.push((
            config.instance_id.clone(),
            config.enabled,
            resolver::effective_hash(config)?,
            config.template_version,
        ));
    }
    instances.sort();

    let canonical = serde_json::json!({
        "stack": {
            "name": stack.name,
            "description": stack.description,
            "network": stack.network(),
            "enabled": stack.enabled,
        },
        "instances": instances,
    });

    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&canonical)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the differences between the desired state (effective configs of
/// enabled instances) and the observed state (engine containers plus the
/// last lockfile), as an ordered action list.
pub async fn build_plan(
    store: &Store,
    runtime: &dyn ContainerRuntime,
    cache: &InspectCache,
    stack_name: &str,
) -> Result<Plan> {
    let stack = store.require_stack(stack_name).await?;
    let configs = resolver::resolve_stack(store, stack_name).await?;
    let plan_fingerprint = fingerprint(&stack, &configs)?;

    let generated = compose::generate(&stack, &configs, None)?;
    let mut diagnostics = generated.diagnostics.clone();

    let lockfile: HashMap<String, LockfileEntry> = store
        .get_lockfile(&stack.id)
        .await?
        .into_iter()
        .map(|e| (e.instance_id.clone(), e))
        .collect();

    let mut actions = Vec::new();

    // Removals first: containers recorded or running for instances that are
    // no longer enabled or no longer exist.
    let desired: BTreeMap<&str, &EffectiveConfig> = configs
        .iter()
        .filter(|c| c.enabled)
        .map(|c| (c.instance_id.as_str(), c))
        .collect();

    let mut remove_candidates: BTreeMap<String, String> = BTreeMap::new();
    for config in configs.iter().filter(|c| !c.enabled) {
        remove_candidates.insert(
            config.instance_id.clone(),
            format!("instance '{}' is disabled", config.instance_id),
        );
    }
    for (instance_id, _) in &lockfile {
        if !desired.contains_key(instance_id.as_str())
            && !remove_candidates.contains_key(instance_id)
        {
            remove_candidates.insert(
                instance_id.clone(),
                format!("instance '{}' no longer exists in the stack", instance_id),
            );
        }
    }

    for (instance_id, reason) in remove_candidates {
        let name = validation::container_name(&stack.name, &instance_id);
        let observed = cache.inspect(runtime, &name).await?;
        if observed.is_some() {
            actions.push(PlanAction {
                kind: ActionKind::Remove,
                instance_id,
                reason,
                changed_fields: vec![],
            });
        }
    }

    // Adds and modifies in dependency order.
    for instance_id in &generated.service_order {
        let config = match desired.get(instance_id.as_str()) {
            Some(c) => *c,
            None => continue,
        };
        let name = &config.container_name;
        let observed = cache.inspect(runtime, name).await?;
        let pinned = lockfile.get(instance_id.as_str());

        match observed {
            None => {
                actions.push(PlanAction {
                    kind: ActionKind::Add,
                    instance_id: instance_id.clone(),
                    reason: format!("container '{}' does not exist", name),
                    changed_fields: vec![],
                });
            }
            Some(state) if !state.is_managed() => {
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::UnmanagedContainer,
                        format!(
                            "container '{}' exists but is not managed by devarch; apply will fail with a conflict",
                            name
                        ),
                    )
                    .for_instance(instance_id),
                );
                actions.push(PlanAction {
                    kind: ActionKind::Add,
                    instance_id: instance_id.clone(),
                    reason: format!("unmanaged container '{}' occupies the derived name", name),
                    changed_fields: vec![],
                });
            }
            Some(state) => {
                let current_hash = resolver::effective_hash(config)?;
                match pinned {
                    None => {
                        actions.push(PlanAction {
                            kind: ActionKind::Modify,
                            instance_id: instance_id.clone(),
                            reason: format!(
                                "container '{}' exists but has no lockfile record",
                                name
                            ),
                            changed_fields: vec![],
                        });
                    }
                    Some(entry) if entry.config_hash != current_hash => {
                        let changed = changed_fields(&entry.config_snapshot, config)?;
                        actions.push(PlanAction {
                            kind: ActionKind::Modify,
                            instance_id: instance_id.clone(),
                            reason: format!(
                                "configuration changed since last apply ({})",
                                changed.join(", ")
                            ),
                            changed_fields: changed,
                        });
                    }
                    Some(entry) => {
                        // Config unchanged; check the engine drifted from the pin.
                        if let (Some(pinned_digest), Some(observed_digest)) =
                            (&entry.image_digest, &state.image_digest)
                        {
                            if pinned_digest != observed_digest {
                                diagnostics.push(
                                    Diagnostic::new(
                                        DiagnosticKind::LockfileDrift,
                                        format!(
                                            "image digest of '{}' drifted from the lockfile pin",
                                            name
                                        ),
                                    )
                                    .for_instance(instance_id),
                                );
                            }
                        }
                        if entry.template_version != config.template_version {
                            diagnostics.push(
                                Diagnostic::new(
                                    DiagnosticKind::LockfileDrift,
                                    format!(
                                        "template '{}' moved from version {} to {} since last apply",
                                        config.template_name,
                                        entry.template_version,
                                        config.template_version
                                    ),
                                )
                                .for_instance(instance_id),
                            );
                            actions.push(PlanAction {
                                kind: ActionKind::Modify,
                                instance_id: instance_id.clone(),
                                reason: "template version changed since last apply".to_string(),
                                changed_fields: vec!["template_version".to_string()],
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(Plan {
        stack: stack.name.clone(),
        fingerprint: plan_fingerprint,
        actions,
        diagnostics,
        created_at: Utc::now(),
    })
}

/// Top-level effective-config fields whose value differs between the stored
/// snapshot and the current config.
fn changed_fields(snapshot_json: &str, current: &EffectiveConfig) -> Result<Vec<String>> {
    let previous: serde_json::Value = serde_json::from_str(snapshot_json)?;
    let current_value = serde_json::to_value(current)?;

    let mut changed = Vec::new();
    if let (Some(prev_map), Some(cur_map)) = (previous.as_object(), current_value.as_object()) {
        for (key, cur) in cur_map {
            if matches!(key.as_str(), "stack_name" | "instance_id" | "container_name") {
                continue;
            }
            if prev_map.get(key) != Some(cur) {
                changed.push(key.clone());
            }
        }
        for key in prev_map.keys() {
            if !cur_map.contains_key(key) && !changed.contains(key) {
                changed.push(key.clone());
            }
        }
    }
    changed.sort();
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn stack() -> Stack {
        let now = Utc::now();
        Stack {
            id: "s1".into(),
            name: "x".into(),
            description: "dev".into(),
            network_name: None,
            enabled: true,
            last_applied_checksum: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn config(id: &str) -> EffectiveConfig {
        EffectiveConfig {
            stack_name: "x".into(),
            instance_id: id.into(),
            container_name: format!("devarch-x-{}", id),
            template_name: "tpl".into(),
            template_version: 1,
            enabled: true,
            image: "img".into(),
            restart_policy: None,
            command: None,
            user: None,
            ports: vec![],
            volumes: vec![],
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            domains: vec![],
            healthcheck: None,
            config_files: vec![],
            depends_on: vec![],
        }
    }

    #[test]
    fn fingerprint_ignores_instance_order() {
        let stack = stack();
        let a = vec![config("web"), config("db")];
        let b = vec![config("db"), config("web")];
        assert_eq!(
            fingerprint(&stack, &a).unwrap(),
            fingerprint(&stack, &b).unwrap()
        );
    }

    #[test]
    fn fingerprint_tracks_semantic_changes() {
        let stack = stack();
        let base = vec![config("web")];
        let mut changed = vec![config("web")];
        changed[0].env.insert("K".into(), "v".into());
        assert_ne!(
            fingerprint(&stack, &base).unwrap(),
            fingerprint(&stack, &changed).unwrap()
        );

        let mut disabled = vec![config("web")];
        disabled[0].enabled = false;
        assert_ne!(
            fingerprint(&stack, &base).unwrap(),
            fingerprint(&stack, &disabled).unwrap()
        );
    }

    #[test]
    fn changed_fields_reports_the_difference() {
        let before = config("web");
        let snapshot = serde_json::to_string(&before).unwrap();
        let mut after = config("web");
        after.image = "img:2".into();
        after.env.insert("K".into(), "v".into());

        let changed = changed_fields(&snapshot, &after).unwrap();
        assert_eq!(changed, vec!["env".to_string(), "image".to_string()]);
    }
}
