use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Stack;
use crate::validation;

use super::{now_rfc3339, parse_ts, parse_ts_opt, Store};

type StackRow = (
    String,         // id
    String,         // name
    String,         // description
    Option<String>, // network_name
    i64,            // enabled
    Option<String>, // last_applied_checksum
    String,         // created_at
    String,         // updated_at
    Option<String>, // deleted_at
);

fn stack_from_row(row: StackRow) -> Result<Stack> {
    Ok(Stack {
        id: row.0,
        name: row.1,
        description: row.2,
        network_name: row.3,
        enabled: row.4 != 0,
        last_applied_checksum: row.5,
        created_at: parse_ts(&row.6)?,
        updated_at: parse_ts(&row.7)?,
        deleted_at: parse_ts_opt(row.8.as_deref())?,
    })
}

const STACK_COLUMNS: &str = "id, name, description, network_name, enabled, \
     last_applied_checksum, created_at, updated_at, deleted_at";

impl Store {
    pub async fn create_stack(
        &self,
        name: &str,
        description: &str,
        network_name: Option<&str>,
    ) -> Result<Stack> {
        validation::validate_stack_name(name)?;
        if let Some(net) = network_name {
            if net.is_empty() {
                return Err(Error::validation("network override must not be empty")
                    .with_field("network_name"));
            }
        }

        if self.get_stack(name).await?.is_some() {
            return Err(Error::conflict(format!("stack '{}' already exists", name))
                .with_field("name")
                .with_suggestion(format!("{}-2", name)));
        }

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO stacks (id, name, description, network_name, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(network_name)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await?;

        self.get_stack(name)
            .await?
            .ok_or_else(|| Error::internal(format!("stack '{}' vanished after insert", name)))
    }

    /// Active (non-soft-deleted) stack by name.
    pub async fn get_stack(&self, name: &str) -> Result<Option<Stack>> {
        let row = sqlx::query_as::<_, StackRow>(&format!(
            "SELECT {} FROM stacks WHERE name = ? AND deleted_at IS NULL",
            STACK_COLUMNS
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        row.map(stack_from_row).transpose()
    }

    /// Active stack by name, or a not-found error naming it.
    pub async fn require_stack(&self, name: &str) -> Result<Stack> {
        self.get_stack(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("stack '{}' not found", name)))
    }

    pub async fn get_stack_by_id(&self, id: &str) -> Result<Option<Stack>> {
        let row = sqlx::query_as::<_, StackRow>(&format!(
            "SELECT {} FROM stacks WHERE id = ?",
            STACK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(stack_from_row).transpose()
    }

    pub async fn list_stacks(&self, include_deleted: bool) -> Result<Vec<Stack>> {
        let sql = if include_deleted {
            format!("SELECT {} FROM stacks ORDER BY name ASC", STACK_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM stacks WHERE deleted_at IS NULL ORDER BY name ASC",
                STACK_COLUMNS
            )
        };
        let rows = sqlx::query_as::<_, StackRow>(&sql)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(stack_from_row).collect()
    }

    /// Edit description and/or network override. The name is immutable;
    /// renaming happens by clone.
    pub async fn update_stack_meta(
        &self,
        name: &str,
        description: Option<&str>,
        network_name: Option<Option<&str>>,
    ) -> Result<Stack> {
        let stack = self.require_stack(name).await?;
        let description = description.unwrap_or(&stack.description);
        let network = match network_name {
            Some(net) => net.map(|s| s.to_string()),
            None => stack.network_name.clone(),
        };
        sqlx::query(
            "UPDATE stacks SET description = ?, network_name = ?, updated_at = ? WHERE id = ?",
        )
        .bind(description)
        .bind(&network)
        .bind(now_rfc3339())
        .bind(&stack.id)
        .execute(self.pool())
        .await?;
        self.require_stack(name).await
    }

    pub async fn set_stack_enabled(&self, name: &str, enabled: bool) -> Result<Stack> {
        let stack = self.require_stack(name).await?;
        sqlx::query("UPDATE stacks SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(now_rfc3339())
            .bind(&stack.id)
            .execute(self.pool())
            .await?;
        self.require_stack(name).await
    }

    pub async fn set_last_applied_checksum(&self, stack_id: &str, checksum: &str) -> Result<()> {
        sqlx::query("UPDATE stacks SET last_applied_checksum = ?, updated_at = ? WHERE id = ?")
            .bind(checksum)
            .bind(now_rfc3339())
            .bind(stack_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Move a stack to the trash. Its name becomes free for reuse.
    pub async fn soft_delete_stack(&self, name: &str) -> Result<()> {
        let stack = self.require_stack(name).await?;
        sqlx::query("UPDATE stacks SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(now_rfc3339())
            .bind(&stack.id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Restore the most recently trashed stack of this name. Fails with
    /// `conflict` when an active stack holds the name.
    pub async fn restore_stack(&self, name: &str) -> Result<Stack> {
        if self.get_stack(name).await?.is_some() {
            return Err(
                Error::conflict(format!("an active stack named '{}' already exists", name))
                    .with_field("name"),
            );
        }
        let row = sqlx::query_as::<_, StackRow>(&format!(
            "SELECT {} FROM stacks WHERE name = ? AND deleted_at IS NOT NULL \
             ORDER BY deleted_at DESC LIMIT 1",
            STACK_COLUMNS
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        let stack = row
            .map(stack_from_row)
            .transpose()?
            .ok_or_else(|| Error::not_found(format!("no trashed stack named '{}'", name)))?;

        sqlx::query("UPDATE stacks SET deleted_at = NULL, updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(&stack.id)
            .execute(self.pool())
            .await?;
        self.require_stack(name).await
    }

    /// Permanently delete a trashed stack and everything it owns: instances,
    /// override rows, lockfile entries, and any stale lock.
    pub async fn hard_delete_stack(&self, stack_id: &str) -> Result<()> {
        let stack = self
            .get_stack_by_id(stack_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("stack id '{}' not found", stack_id)))?;
        if !stack.is_deleted() {
            return Err(Error::conflict(format!(
                "stack '{}' is active; soft-delete it before purging",
                stack.name
            )));
        }

        let mut tx = self.pool().begin().await?;
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
            sqlx::query(&format!(
                "DELETE FROM {} WHERE instance_pk IN (SELECT id FROM instances WHERE stack_id = ?)",
                table
            ))
            .bind(stack_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM lockfile_entries WHERE stack_id = ?")
            .bind(stack_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stack_locks WHERE stack_id = ?")
            .bind(stack_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM instances WHERE stack_id = ?")
            .bind(stack_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stacks WHERE id = ?")
            .bind(stack_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Copy a stack: instances and override rows come along, the lockfile
    /// and applied checksum do not. An explicit network override is dropped
    /// so both stacks keep disjoint networks.
    pub async fn clone_stack(&self, source: &str, target: &str) -> Result<Stack> {
        validation::validate_stack_name(target)?;
        let src = self.require_stack(source).await?;
        if self.get_stack(target).await?.is_some() {
            return Err(Error::conflict(format!("stack '{}' already exists", target))
                .with_field("target"));
        }

        let new_stack_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO stacks (id, name, description, network_name, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(&new_stack_id)
        .bind(target)
        .bind(&src.description)
        .bind(src.enabled as i64)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let instance_rows = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT id, instance_id, template_id, enabled FROM instances \
             WHERE stack_id = ? AND deleted_at IS NULL",
        )
        .bind(&src.id)
        .fetch_all(&mut *tx)
        .await?;

        for (old_pk, instance_id, template_id, enabled) in instance_rows {
            let new_pk = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO instances (id, stack_id, instance_id, template_id, enabled, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&new_pk)
            .bind(&new_stack_id)
            .bind(&instance_id)
            .bind(&template_id)
            .bind(enabled)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO override_scalars (instance_pk, image, restart_policy, command, run_as) \
                 SELECT ?, image, restart_policy, command, run_as FROM override_scalars WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_ports (instance_pk, position, host_port, container_port, protocol) \
                 SELECT ?, position, host_port, container_port, protocol FROM override_ports WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_volumes (instance_pk, position, source, target, read_only, kind) \
                 SELECT ?, position, source, target, read_only, kind FROM override_volumes WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_env (instance_pk, key, value, secret) \
                 SELECT ?, key, value, secret FROM override_env WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_labels (instance_pk, key, value) \
                 SELECT ?, key, value FROM override_labels WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_domains (instance_pk, position, host, port) \
                 SELECT ?, position, host, port FROM override_domains WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_healthcheck (instance_pk, test, interval_secs, timeout_secs, retries, start_period_secs) \
                 SELECT ?, test, interval_secs, timeout_secs, retries, start_period_secs FROM override_healthcheck WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_deps (instance_pk, position, depends_on) \
                 SELECT ?, position, depends_on FROM override_deps WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "INSERT INTO override_config_files (instance_pk, path, content, mode) \
                 SELECT ?, path, content, mode FROM override_config_files WHERE instance_pk = ?",
            )
            .bind(&new_pk)
            .bind(&old_pk)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.require_stack(target).await
    }
}
