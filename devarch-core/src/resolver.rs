use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::store::Store;
use crate::types::{EffectiveConfig, Instance, OverrideSet, Stack, Template};
use crate::validation;

/// Merge a template with an instance's overrides into the effective
/// deployment spec.
///
/// Scalars (image, restart policy, command, user): an override replaces the
/// template value when present. Ports, volumes, domains, healthcheck: full
/// replacement once the instance declares any. Environment and labels:
/// key-based merge, instance wins; an empty env value deletes the key.
/// Config files: path-based merge. Dependencies: template-declared plus
/// instance-declared, deduplicated.
pub fn resolve(
    stack: &Stack,
    instance: &Instance,
    template: &Template,
    overrides: &OverrideSet,
) -> EffectiveConfig {
    let ports = overrides
        .ports
        .clone()
        .unwrap_or_else(|| template.ports.clone());
    let volumes = overrides
        .volumes
        .clone()
        .unwrap_or_else(|| template.volumes.clone());
    let domains = overrides
        .domains
        .clone()
        .unwrap_or_else(|| template.domains.clone());
    let healthcheck = overrides
        .healthcheck
        .clone()
        .or_else(|| template.healthcheck.clone());

    let mut env: BTreeMap<String, String> = BTreeMap::new();
    for var in &template.env {
        env.insert(var.key.clone(), var.value.clone());
    }
    for var in &overrides.env {
        if var.value.is_empty() {
            env.remove(&var.key);
        } else {
            env.insert(var.key.clone(), var.value.clone());
        }
    }

    let mut labels = template.labels.clone();
    for (key, value) in &overrides.labels {
        labels.insert(key.clone(), value.clone());
    }
    inject_identity_labels(&mut labels, stack, instance, template);

    let mut config_files: BTreeMap<String, crate::types::ConfigFileSpec> = template
        .config_files
        .iter()
        .map(|f| (f.path.clone(), f.clone()))
        .collect();
    for file in &overrides.config_files {
        config_files.insert(file.path.clone(), file.clone());
    }

    let mut depends_on = template.depends_on.clone();
    for dep in &overrides.depends_on {
        if !depends_on.contains(dep) {
            depends_on.push(dep.clone());
        }
    }

    EffectiveConfig {
        stack_name: stack.name.clone(),
        instance_id: instance.instance_id.clone(),
        container_name: validation::container_name(&stack.name, &instance.instance_id),
        template_name: template.name.clone(),
        template_version: template.version,
        enabled: instance.enabled,
        image: overrides
            .scalars
            .image
            .clone()
            .unwrap_or_else(|| template.image.clone()),
        restart_policy: overrides
            .scalars
            .restart_policy
            .clone()
            .or_else(|| template.restart_policy.clone()),
        command: overrides
            .scalars
            .command
            .clone()
            .or_else(|| template.command.clone()),
        user: overrides
            .scalars
            .user
            .clone()
            .or_else(|| template.user.clone()),
        ports,
        volumes,
        env,
        labels,
        domains,
        healthcheck,
        config_files: config_files.into_values().collect(),
        depends_on,
    }
}

/// Reserved identity labels are set after the merge and win over any value a
/// template or instance tried to carry for them.
fn inject_identity_labels(
    labels: &mut BTreeMap<String, String>,
    stack: &Stack,
    instance: &Instance,
    template: &Template,
) {
    labels.insert(
        validation::LABEL_STACK_ID.to_string(),
        stack.name.clone(),
    );
    labels.insert(
        validation::LABEL_INSTANCE_ID.to_string(),
        instance.instance_id.clone(),
    );
    labels.insert(
        validation::LABEL_TEMPLATE_SERVICE_ID.to_string(),
        template.name.clone(),
    );
    labels.insert(
        validation::LABEL_MANAGED_BY.to_string(),
        validation::MANAGED_BY_VALUE.to_string(),
    );
}

/// Sha-256 over the canonical JSON of the effective config. Maps are ordered
/// and lists keep declaration order, so equal semantic content hashes equal.
pub fn effective_hash(config: &EffectiveConfig) -> Result<String> {
    let canonical = serde_json::to_vec(config)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Resolve one instance of a stack straight out of the store.
pub async fn resolve_instance(
    store: &Store,
    stack_name: &str,
    instance_id: &str,
) -> Result<EffectiveConfig> {
    let stack = store.require_stack(stack_name).await?;
    let instance = store.require_instance(stack_name, instance_id).await?;
    let template = store
        .get_template(&instance.template_id)
        .await?
        .ok_or_else(|| {
            crate::error::Error::internal(format!(
                "instance '{}' references missing template '{}'",
                instance.instance_id, instance.template_id
            ))
        })?;
    let overrides = store.get_overrides(&instance.id).await?;
    Ok(resolve(&stack, &instance, &template, &overrides))
}

/// Resolve every active instance of a stack, ordered by instance id.
/// Disabled instances are included with `enabled = false`; callers decide
/// whether to filter.
pub async fn resolve_stack(store: &Store, stack_name: &str) -> Result<Vec<EffectiveConfig>> {
    let stack = store.require_stack(stack_name).await?;
    let instances = store.list_instances(&stack.id).await?;
    let mut configs = Vec::with_capacity(instances.len());
    for instance in &instances {
        let template = store
            .get_template(&instance.template_id)
            .await?
            .ok_or_else(|| {
                crate::error::Error::internal(format!(
                    "instance '{}' references missing template '{}'",
                    instance.instance_id, instance.template_id
                ))
            })?;
        let overrides = store.get_overrides(&instance.id).await?;
        configs.push(resolve(&stack, instance, &template, &overrides));
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnvVar, PortSpec, Protocol};
    use chrono::Utc;

    fn fixture() -> (Stack, Instance, Template) {
        let now = Utc::now();
        let stack = Stack {
            id: "s1".into(),
            name: "a".into(),
            description: String::new(),
            network_name: None,
            enabled: true,
            last_applied_checksum: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let instance = Instance {
            id: "i1".into(),
            stack_id: "s1".into(),
            instance_id: "web".into(),
            template_id: "t1".into(),
            enabled: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let mut labels = BTreeMap::new();
        labels.insert("com.example.tier".to_string(), "app".to_string());
        labels.insert("devarch.stack_id".to_string(), "forged".to_string());
        let template = Template {
            id: "t1".into(),
            name: "php".into(),
            version: 3,
            image: "php:8.3-fpm".into(),
            restart_policy: Some("unless-stopped".into()),
            command: None,
            user: None,
            ports: vec![PortSpec {
                host: Some(9000),
                container: 9000,
                protocol: Protocol::Tcp,
            }],
            volumes: vec![],
            env: vec![
                EnvVar {
                    key: "APP_ENV".into(),
                    value: "local".into(),
                    secret: false,
                },
                EnvVar {
                    key: "DROP_ME".into(),
                    value: "x".into(),
                    secret: false,
                },
            ],
            labels,
            domains: vec![],
            healthcheck: None,
            config_files: vec![],
            depends_on: vec!["db".into()],
            created_at: now,
            updated_at: now,
        };
        (stack, instance, template)
    }

    #[test]
    fn template_values_pass_through_without_overrides() {
        let (stack, instance, template) = fixture();
        let cfg = resolve(&stack, &instance, &template, &OverrideSet::default());
        assert_eq!(cfg.container_name, "devarch-a-web");
        assert_eq!(cfg.image, "php:8.3-fpm");
        assert_eq!(cfg.ports.len(), 1);
        assert_eq!(cfg.env.get("APP_ENV").map(String::as_str), Some("local"));
        assert_eq!(cfg.depends_on, vec!["db".to_string()]);
    }

    #[test]
    fn scalar_overrides_replace_template_values() {
        let (stack, instance, template) = fixture();
        let overrides = OverrideSet {
            scalars: crate::types::ScalarOverrides {
                image: Some("php:8.4-fpm".into()),
                user: Some("www-data".into()),
                command: Some(vec!["php-fpm".into(), "-F".into()]),
                restart_policy: None,
            },
            ..Default::default()
        };
        let cfg = resolve(&stack, &instance, &template, &overrides);
        assert_eq!(cfg.image, "php:8.4-fpm");
        assert_eq!(cfg.user.as_deref(), Some("www-data"));
        assert_eq!(
            cfg.command,
            Some(vec!["php-fpm".to_string(), "-F".to_string()])
        );
        // Absent scalars still come from the template.
        assert_eq!(cfg.restart_policy.as_deref(), Some("unless-stopped"));
    }

    #[test]
    fn ports_are_full_replacement() {
        let (stack, instance, template) = fixture();
        let overrides = OverrideSet {
            ports: Some(vec![PortSpec {
                host: Some(8080),
                container: 80,
                protocol: Protocol::Tcp,
            }]),
            ..Default::default()
        };
        let cfg = resolve(&stack, &instance, &template, &overrides);
        assert_eq!(cfg.ports.len(), 1);
        assert_eq!(cfg.ports[0].host, Some(8080));
        assert_eq!(cfg.ports[0].container, 80);
    }

    #[test]
    fn env_merges_by_key_with_tombstones() {
        let (stack, instance, template) = fixture();
        let overrides = OverrideSet {
            env: vec![
                EnvVar {
                    key: "APP_ENV".into(),
                    value: "production".into(),
                    secret: false,
                },
                EnvVar {
                    key: "DROP_ME".into(),
                    value: String::new(),
                    secret: false,
                },
                EnvVar {
                    key: "EXTRA".into(),
                    value: "1".into(),
                    secret: false,
                },
            ],
            ..Default::default()
        };
        let cfg = resolve(&stack, &instance, &template, &overrides);
        assert_eq!(
            cfg.env.get("APP_ENV").map(String::as_str),
            Some("production")
        );
        assert!(!cfg.env.contains_key("DROP_ME"));
        assert_eq!(cfg.env.get("EXTRA").map(String::as_str), Some("1"));
    }

    #[test]
    fn identity_labels_win_over_forged_values() {
        let (stack, instance, template) = fixture();
        let mut labels = BTreeMap::new();
        labels.insert("devarch.managed_by".to_string(), "me".to_string());
        let overrides = OverrideSet {
            labels,
            ..Default::default()
        };
        let cfg = resolve(&stack, &instance, &template, &overrides);
        assert_eq!(cfg.labels.get("devarch.stack_id").map(String::as_str), Some("a"));
        assert_eq!(
            cfg.labels.get("devarch.instance_id").map(String::as_str),
            Some("web")
        );
        assert_eq!(
            cfg.labels
                .get("devarch.template_service_id")
                .map(String::as_str),
            Some("php")
        );
        assert_eq!(
            cfg.labels.get("devarch.managed_by").map(String::as_str),
            Some("devarch")
        );
        assert_eq!(
            cfg.labels.get("com.example.tier").map(String::as_str),
            Some("app")
        );
    }

    #[test]
    fn effective_hash_is_stable_and_content_sensitive() {
        let (stack, instance, template) = fixture();
        let a = resolve(&stack, &instance, &template, &OverrideSet::default());
        let b = resolve(&stack, &instance, &template, &OverrideSet::default());
        assert_eq!(effective_hash(&a).unwrap(), effective_hash(&b).unwrap());

        let overrides = OverrideSet {
            env: vec![EnvVar {
                key: "APP_ENV".into(),
                value: "prod".into(),
                secret: false,
            }],
            ..Default::default()
        };
        let c = resolve(&stack, &instance, &template, &overrides);
        assert_ne!(effective_hash(&a).unwrap(), effective_hash(&c).unwrap());
    }
}
