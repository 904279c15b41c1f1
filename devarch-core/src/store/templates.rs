use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Template;
use crate::validation;

use super::{now_rfc3339, parse_ts, Store};

/// Everything about a template except identity and bookkeeping; used for
/// catalog seeding and maintenance.
#[derive(Debug, Clone, Default)]
pub struct TemplateSpec {
    pub image: String,
    pub restart_policy: Option<String>,
    pub command: Option<Vec<String>>,
    pub user: Option<String>,
    pub ports: Vec<crate::types::PortSpec>,
    pub volumes: Vec<crate::types::VolumeSpec>,
    pub env: Vec<crate::types::EnvVar>,
    pub labels: std::collections::BTreeMap<String, String>,
    pub domains: Vec<crate::types::DomainSpec>,
    pub healthcheck: Option<crate::types::HealthcheckSpec>,
    pub config_files: Vec<crate::types::ConfigFileSpec>,
    pub depends_on: Vec<String>,
}

fn template_from_row(row: &SqliteRow) -> Result<Template> {
    let command: Option<String> = row.try_get("command")?;
    let healthcheck: Option<String> = row.try_get("healthcheck")?;
    let ports: String = row.try_get("ports")?;
    let volumes: String = row.try_get("volumes")?;
    let env: String = row.try_get("env")?;
    let labels: String = row.try_get("labels")?;
    let domains: String = row.try_get("domains")?;
    let config_files: String = row.try_get("config_files")?;
    let depends_on: String = row.try_get("depends_on")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Template {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        image: row.try_get("image")?,
        restart_policy: row.try_get("restart_policy")?,
        command: command.as_deref().map(serde_json::from_str).transpose()?,
        user: row.try_get("run_as")?,
        ports: serde_json::from_str(&ports)?,
        volumes: serde_json::from_str(&volumes)?,
        env: serde_json::from_str(&env)?,
        labels: serde_json::from_str(&labels)?,
        domains: serde_json::from_str(&domains)?,
        healthcheck: healthcheck.as_deref().map(serde_json::from_str).transpose()?,
        config_files: serde_json::from_str(&config_files)?,
        depends_on: serde_json::from_str(&depends_on)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

impl Store {
    /// Insert a template or update an existing one by name. Updates bump the
    /// version when the content changed.
    pub async fn seed_template(&self, name: &str, spec: TemplateSpec) -> Result<Template> {
        validation::validate_template_name(name)?;

        let now = now_rfc3339();
        let command_json = spec
            .command
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let ports_json = serde_json::to_string(&spec.ports)?;
        let volumes_json = serde_json::to_string(&spec.volumes)?;
        let env_json = serde_json::to_string(&spec.env)?;
        let labels_json = serde_json::to_string(&spec.labels)?;
        let domains_json = serde_json::to_string(&spec.domains)?;
        let healthcheck_json = spec
            .healthcheck
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let config_files_json = serde_json::to_string(&spec.config_files)?;
        let depends_on_json = serde_json::to_string(&spec.depends_on)?;

        if let Some(existing) = self.get_template_by_name(name).await? {
            let changed = existing.image != spec.image
                || existing.restart_policy != spec.restart_policy
                || existing.command != spec.command
                || existing.user != spec.user
                || existing.ports != spec.ports
                || existing.volumes != spec.volumes
                || existing.env != spec.env
                || existing.labels != spec.labels
                || existing.domains != spec.domains
                || existing.healthcheck != spec.healthcheck
                || existing.config_files != spec.config_files
                || existing.depends_on != spec.depends_on;
            if !changed {
                return Ok(existing);
            }
            sqlx::query(
                "UPDATE templates SET version = version + 1, image = ?, restart_policy = ?, \
                 command = ?, run_as = ?, ports = ?, volumes = ?, env = ?, labels = ?, \
                 domains = ?, healthcheck = ?, config_files = ?, depends_on = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&spec.image)
            .bind(&spec.restart_policy)
            .bind(&command_json)
            .bind(&spec.user)
            .bind(&ports_json)
            .bind(&volumes_json)
            .bind(&env_json)
            .bind(&labels_json)
            .bind(&domains_json)
            .bind(&healthcheck_json)
            .bind(&config_files_json)
            .bind(&depends_on_json)
            .bind(&now)
            .bind(&existing.id)
            .execute(self.pool())
            .await?;
            return self.get_template(&existing.id).await?.ok_or_else(|| {
                Error::internal(format!("template '{}' vanished during update", name))
            });
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO templates (id, name, version, image, restart_policy, command, run_as, \
             ports, volumes, env, labels, domains, healthcheck, config_files, depends_on, \
             created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(&spec.image)
        .bind(&spec.restart_policy)
        .bind(&command_json)
        .bind(&spec.user)
        .bind(&ports_json)
        .bind(&volumes_json)
        .bind(&env_json)
        .bind(&labels_json)
        .bind(&domains_json)
        .bind(&healthcheck_json)
        .bind(&config_files_json)
        .bind(&depends_on_json)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await?;

        self.get_template(&id)
            .await?
            .ok_or_else(|| Error::internal(format!("template '{}' vanished after insert", name)))
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<Template>> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(template_from_row).transpose()
    }

    pub async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>> {
        let row = sqlx::query("SELECT * FROM templates WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(template_from_row).transpose()
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query("SELECT * FROM templates ORDER BY name ASC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(template_from_row).collect()
    }
}
