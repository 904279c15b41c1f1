use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::error::{Error, Result};
use crate::secrets::SecretsBox;

mod instances;
mod lockfiles;
mod locks;
mod overrides;
mod stacks;
mod templates;
mod transfer;

pub use templates::TemplateSpec;
pub use transfer::ImportReport;

/// Relational store for stacks, instances, overrides, locks, and lockfile
/// records. One pool process-wide; short transactions per mutation.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
    secrets: Option<Arc<SecretsBox>>,
}

impl Store {
    pub async fn new(database_path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(database_path).to_string();
        tracing::debug!("database path: {} -> {}", database_path, expanded);

        if let Some(parent) = std::path::Path::new(&expanded).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !std::path::Path::new(&expanded).exists() {
            tokio::fs::write(&expanded, "").await?;
        }

        let pool = SqlitePool::connect(&format!("sqlite:{}", expanded)).await?;
        let store = Self {
            pool,
            secrets: None,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Attach the at-rest encryption boundary for secret env values.
    pub fn with_secrets(mut self, secrets: Arc<SecretsBox>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub(crate) fn secrets(&self) -> Option<&SecretsBox> {
        self.secrets.as_deref()
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                version INTEGER NOT NULL DEFAULT 1,
                image TEXT NOT NULL,
                restart_policy TEXT,
                command TEXT,
                run_as TEXT,
                ports TEXT NOT NULL DEFAULT '[]',
                volumes TEXT NOT NULL DEFAULT '[]',
                env TEXT NOT NULL DEFAULT '[]',
                labels TEXT NOT NULL DEFAULT '{}',
                domains TEXT NOT NULL DEFAULT '[]',
                healthcheck TEXT,
                config_files TEXT NOT NULL DEFAULT '[]',
                depends_on TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stacks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                network_name TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_applied_checksum TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_stacks_active_name
                ON stacks (name) WHERE deleted_at IS NULL;

            CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                stack_id TEXT NOT NULL REFERENCES stacks (id),
                instance_id TEXT NOT NULL,
                template_id TEXT NOT NULL REFERENCES templates (id),
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_instances_active
                ON instances (stack_id, instance_id) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_instances_stack ON instances (stack_id);

            CREATE TABLE IF NOT EXISTS override_scalars (
                instance_pk TEXT PRIMARY KEY REFERENCES instances (id),
                image TEXT,
                restart_policy TEXT,
                command TEXT,
                run_as TEXT
            );

            CREATE TABLE IF NOT EXISTS override_ports (
                instance_pk TEXT NOT NULL REFERENCES instances (id),
                position INTEGER NOT NULL,
                host_port INTEGER,
                container_port INTEGER NOT NULL,
                protocol TEXT NOT NULL DEFAULT 'tcp',
                PRIMARY KEY (instance_pk, position)
            );

            CREATE TABLE IF NOT EXISTS override_volumes (
                instance_pk TEXT NOT NULL REFERENCES instances (id),
                position INTEGER NOT NULL,
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                read_only INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL DEFAULT 'bind',
                PRIMARY KEY (instance_pk, position)
            );

            CREATE TABLE IF NOT EXISTS override_env (
                instance_pk TEXT NOT NULL REFERENCES instances (id),
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                secret INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (instance_pk, key)
            );

            CREATE TABLE IF NOT EXISTS override_labels (
                instance_pk TEXT NOT NULL REFERENCES instances (id),
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (instance_pk, key)
            );

            CREATE TABLE IF NOT EXISTS override_domains (
                instance_pk TEXT NOT NULL REFERENCES instances (id),
                position INTEGER NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                PRIMARY KEY (instance_pk, position)
            );

            CREATE TABLE IF NOT EXISTS override_healthcheck (
                instance_pk TEXT PRIMARY KEY REFERENCES instances (id),
                test TEXT NOT NULL,
                interval_secs INTEGER NOT NULL,
                timeout_secs INTEGER NOT NULL,
                retries INTEGER NOT NULL,
                start_period_secs INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS override_deps (
                instance_pk TEXT NOT NULL REFERENCES instances (id),
                position INTEGER NOT NULL,
                depends_on TEXT NOT NULL,
                PRIMARY KEY (instance_pk, depends_on)
            );

            CREATE TABLE IF NOT EXISTS override_config_files (
                instance_pk TEXT NOT NULL REFERENCES instances (id),
                path TEXT NOT NULL,
                content TEXT NOT NULL,
                mode INTEGER,
                PRIMARY KEY (instance_pk, path)
            );

            CREATE TABLE IF NOT EXISTS stack_locks (
                stack_id TEXT PRIMARY KEY REFERENCES stacks (id),
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                deadline TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lockfile_entries (
                stack_id TEXT NOT NULL REFERENCES stacks (id),
                instance_id TEXT NOT NULL,
                host_ports TEXT NOT NULL DEFAULT '[]',
                image_digest TEXT,
                template_version INTEGER NOT NULL,
                config_hash TEXT NOT NULL,
                config_snapshot TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (stack_id, instance_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::internal(format!("malformed timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_ts_opt(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}
