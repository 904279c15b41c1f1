use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::secrets;
use crate::types::VolumeKind;
use crate::validation;

use super::{now_rfc3339, Store};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub stack: String,
    pub created_stack: bool,
    pub created_instances: Vec<String>,
    pub updated_instances: Vec<String>,
}

impl Store {
    /// Import a manifest, create-update style: instances present in the
    /// manifest are created or have their override sets replaced; anything
    /// else in the store is left untouched. The whole import is one
    /// transaction — a missing template or invalid name rolls everything
    /// back.
    pub async fn import_manifest(&self, manifest: &Manifest) -> Result<ImportReport> {
        let stack_name = manifest.stack.name.as_str();
        validation::validate_stack_name(stack_name)?;
        for instance_id in manifest.instances.keys() {
            validation::validate_instance_id(stack_name, instance_id)?;
        }

        // Resolve templates up front so the error names the missing one.
        let mut template_ids: HashMap<&str, String> = HashMap::new();
        for (instance_id, m_instance) in &manifest.instances {
            match self.get_template_by_name(&m_instance.template).await? {
                Some(template) => {
                    template_ids.insert(m_instance.template.as_str(), template.id);
                }
                None => {
                    return Err(Error::not_found(format!(
                        "template '{}' (wanted by instance '{}') not found",
                        m_instance.template, instance_id
                    ))
                    .with_field("template"));
                }
            }
        }

        let existing_stack = self.get_stack(stack_name).await?;
        let mut report = ImportReport {
            stack: stack_name.to_string(),
            ..Default::default()
        };

        let now = now_rfc3339();
        let mut tx = self.pool().begin().await?;

        let stack_id = match &existing_stack {
            Some(stack) => {
                sqlx::query(
                    "UPDATE stacks SET description = ?, network_name = ?, enabled = ?, updated_at = ? WHERE id = ?",
                )
                .bind(&manifest.stack.description)
                .bind(&manifest.stack.network)
                .bind(manifest.stack.enabled as i64)
                .bind(&now)
                .bind(&stack.id)
                .execute(&mut *tx)
                .await?;
                stack.id.clone()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO stacks (id, name, description, network_name, enabled, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(stack_name)
                .bind(&manifest.stack.description)
                .bind(&manifest.stack.network)
                .bind(manifest.stack.enabled as i64)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                report.created_stack = true;
                id
            }
        };

        for (instance_id, m_instance) in &manifest.instances {
            let template_id = &template_ids[m_instance.template.as_str()];

            let existing_pk = sqlx::query_as::<_, (String,)>(
                "SELECT id FROM instances WHERE stack_id = ? AND instance_id = ? AND deleted_at IS NULL",
            )
            .bind(&stack_id)
            .bind(instance_id)
            .fetch_optional(&mut *tx)
            .await?;

            let instance_pk = match existing_pk {
                Some((pk,)) => {
                    sqlx::query(
                        "UPDATE instances SET template_id = ?, enabled = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(template_id)
                    .bind(m_instance.enabled as i64)
                    .bind(&now)
                    .bind(&pk)
                    .execute(&mut *tx)
                    .await?;
                    report.updated_instances.push(instance_id.clone());
                    pk
                }
                None => {
                    let pk = Uuid::new_v4().to_string();
                    sqlx::query(
                        "INSERT INTO instances (id, stack_id, instance_id, template_id, enabled, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&pk)
                    .bind(&stack_id)
                    .bind(instance_id)
                    .bind(template_id)
                    .bind(m_instance.enabled as i64)
                    .bind(&now)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                    report.created_instances.push(instance_id.clone());
                    pk
                }
            };

            // Stored env values, so `${secret:<key>}` placeholders keep the
            // existing (sealed) value instead of erasing it.
            let stored_env: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
                "SELECT key, value FROM override_env WHERE instance_pk = ?",
            )
            .bind(&instance_pk)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

            for table in [
                "override_scalars",
                "override_ports",
                "override_volumes",
                "override_env",
                "override_labels",
                "override_domains",
                "override_healthcheck",
                "override_deps",
                "override_config_files",
            ] {
                sqlx::query(&format!("DELETE FROM {} WHERE instance_pk = ?", table))
                    .bind(&instance_pk)
                    .execute(&mut *tx)
                    .await?;
            }

            let ov = &m_instance.overrides;
            if ov.image.is_some()
                || ov.restart_policy.is_some()
                || ov.command.is_some()
                || ov.user.is_some()
            {
                let command_json = ov.command.as_ref().map(serde_json::to_string).transpose()?;
                sqlx::query(
                    "INSERT INTO override_scalars (instance_pk, image, restart_policy, command, run_as) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&instance_pk)
                .bind(&ov.image)
                .bind(&ov.restart_policy)
                .bind(&command_json)
                .bind(&ov.user)
                .execute(&mut *tx)
                .await?;
            }
            if let Some(ports) = &ov.ports {
                for (position, port) in ports.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO override_ports (instance_pk, position, host_port, container_port, protocol) \
                         VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(&instance_pk)
                    .bind(position as i64)
                    .bind(port.host.map(|p| p as i64))
                    .bind(port.container as i64)
                    .bind(port.protocol.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
            }
            if let Some(volumes) = &ov.volumes {
                for (position, volume) in volumes.iter().enumerate() {
                    let kind = match volume.kind {
                        VolumeKind::Bind => "bind",
                        VolumeKind::Named => "named",
                    };
                    sqlx::query(
                        "INSERT INTO override_volumes (instance_pk, position, source, target, read_only, kind) \
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&instance_pk)
                    .bind(position as i64)
                    .bind(&volume.source)
                    .bind(&volume.target)
                    .bind(volume.read_only as i64)
                    .bind(kind)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            if let Some(env) = &ov.env {
                for (key, value) in env {
                    let (stored_value, secret) = match secrets::parse_placeholder(value) {
                        Some(_) => (
                            stored_env.get(key).cloned().unwrap_or_default(),
                            true,
                        ),
                        None => (value.clone(), false),
                    };
                    sqlx::query(
                        "INSERT INTO override_env (instance_pk, key, value, secret) VALUES (?, ?, ?, ?)",
                    )
                    .bind(&instance_pk)
                    .bind(key)
                    .bind(&stored_value)
                    .bind(secret as i64)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            if let Some(labels) = &ov.labels {
                for (key, value) in labels {
                    sqlx::query(
                        "INSERT INTO override_labels (instance_pk, key, value) VALUES (?, ?, ?)",
                    )
                    .bind(&instance_pk)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            if let Some(domains) = &ov.domains {
                for (position, domain) in domains.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO override_domains (instance_pk, position, host, port) VALUES (?, ?, ?, ?)",
                    )
                    .bind(&instance_pk)
                    .bind(position as i64)
                    .bind(&domain.host)
                    .bind(domain.port as i64)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            if let Some(hc) = &ov.healthcheck {
                sqlx::query(
                    "INSERT INTO override_healthcheck \
                     (instance_pk, test, interval_secs, timeout_secs, retries, start_period_secs) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&instance_pk)
                .bind(serde_json::to_string(&hc.test)?)
                .bind(hc.interval_secs as i64)
                .bind(hc.timeout_secs as i64)
                .bind(hc.retries as i64)
                .bind(hc.start_period_secs as i64)
                .execute(&mut *tx)
                .await?;
            }
            if let Some(deps) = &ov.depends_on {
                for (position, dep) in deps.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO override_deps (instance_pk, position, depends_on) VALUES (?, ?, ?)",
                    )
                    .bind(&instance_pk)
                    .bind(position as i64)
                    .bind(dep)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            if let Some(files) = &ov.config_files {
                for file in files {
                    sqlx::query(
                        "INSERT INTO override_config_files (instance_pk, path, content, mode) \
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(&instance_pk)
                    .bind(&file.path)
                    .bind(&file.content)
                    .bind(file.mode.map(|m| m as i64))
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }
}
