use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Instance;
use crate::validation;

use super::{now_rfc3339, parse_ts, parse_ts_opt, Store};

type InstanceRow = (
    String,         // id
    String,         // stack_id
    String,         // instance_id
    String,         // template_id
    i64,            // enabled
    String,         // created_at
    String,         // updated_at
    Option<String>, // deleted_at
);

fn instance_from_row(row: InstanceRow) -> Result<Instance> {
    Ok(Instance {
        id: row.0,
        stack_id: row.1,
        instance_id: row.2,
        template_id: row.3,
        enabled: row.4 != 0,
        created_at: parse_ts(&row.5)?,
        updated_at: parse_ts(&row.6)?,
        deleted_at: parse_ts_opt(row.7.as_deref())?,
    })
}

const INSTANCE_COLUMNS: &str =
    "id, stack_id, instance_id, template_id, enabled, created_at, updated_at, deleted_at";

impl Store {
    /// Add an instance of a template to a stack.
    pub async fn add_instance(
        &self,
        stack_name: &str,
        instance_id: &str,
        template_name: &str,
    ) -> Result<Instance> {
        validation::validate_instance_id(stack_name, instance_id)?;
        let stack = self.require_stack(stack_name).await?;
        let template = self
            .get_template_by_name(template_name)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("template '{}' not found", template_name))
                    .with_field("template")
            })?;

        if self
            .get_instance(stack_name, instance_id)
            .await?
            .is_some()
        {
            return Err(Error::conflict(format!(
                "instance '{}' already exists in stack '{}'",
                instance_id, stack_name
            ))
            .with_field("instance")
            .with_suggestion(format!("{}-2", instance_id)));
        }

        let pk = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO instances (id, stack_id, instance_id, template_id, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&pk)
        .bind(&stack.id)
        .bind(instance_id)
        .bind(&template.id)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await?;

        self.get_instance(stack_name, instance_id)
            .await?
            .ok_or_else(|| {
                Error::internal(format!(
                    "instance '{}' vanished after insert",
                    instance_id
                ))
            })
    }

    /// Active instance by stack name and instance id.
    pub async fn get_instance(
        &self,
        stack_name: &str,
        instance_id: &str,
    ) -> Result<Option<Instance>> {
        let row = sqlx::query_as::<_, InstanceRow>(
            "SELECT i.id, i.stack_id, i.instance_id, i.template_id, i.enabled, \
                    i.created_at, i.updated_at, i.deleted_at \
             FROM instances i \
             JOIN stacks s ON s.id = i.stack_id \
             WHERE s.name = ? AND s.deleted_at IS NULL \
               AND i.instance_id = ? AND i.deleted_at IS NULL",
        )
        .bind(stack_name)
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(instance_from_row).transpose()
    }

    pub async fn require_instance(
        &self,
        stack_name: &str,
        instance_id: &str,
    ) -> Result<Instance> {
        self.get_instance(stack_name, instance_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "instance '{}' not found in stack '{}'",
                    instance_id, stack_name
                ))
            })
    }

    /// Active instances of a stack, ordered by instance id.
    pub async fn list_instances(&self, stack_id: &str) -> Result<Vec<Instance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM instances \
             WHERE stack_id = ? AND deleted_at IS NULL ORDER BY instance_id ASC",
            INSTANCE_COLUMNS
        ))
        .bind(stack_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(instance_from_row).collect()
    }

    pub async fn set_instance_enabled(
        &self,
        stack_name: &str,
        instance_id: &str,
        enabled: bool,
    ) -> Result<Instance> {
        let instance = self.require_instance(stack_name, instance_id).await?;
        sqlx::query("UPDATE instances SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(now_rfc3339())
            .bind(&instance.id)
            .execute(self.pool())
            .await?;
        self.require_instance(stack_name, instance_id).await
    }

    /// Soft-delete one instance. Its override rows stay until the owning
    /// stack is purged; the instance id becomes free for reuse.
    pub async fn remove_instance(&self, stack_name: &str, instance_id: &str) -> Result<()> {
        let instance = self.require_instance(stack_name, instance_id).await?;
        sqlx::query("UPDATE instances SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(now_rfc3339())
            .bind(&instance.id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
