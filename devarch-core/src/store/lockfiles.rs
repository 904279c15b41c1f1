use crate::error::Result;
use crate::types::LockfileEntry;

use super::{parse_ts, Store};

type LockfileRow = (
    String,         // stack_id
    String,         // instance_id
    String,         // host_ports json
    Option<String>, // image_digest
    i64,            // template_version
    String,         // config_hash
    String,         // config_snapshot
    String,         // recorded_at
);

fn entry_from_row(row: LockfileRow) -> Result<LockfileEntry> {
    Ok(LockfileEntry {
        stack_id: row.0,
        instance_id: row.1,
        host_ports: serde_json::from_str(&row.2)?,
        image_digest: row.3,
        template_version: row.4,
        config_hash: row.5,
        config_snapshot: row.6,
        recorded_at: parse_ts(&row.7)?,
    })
}

impl Store {
    /// Replace the whole lockfile of a stack in one transaction, so a
    /// cancelled apply never leaves a partial lockfile behind.
    pub async fn replace_lockfile(
        &self,
        stack_id: &str,
        entries: &[LockfileEntry],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM lockfile_entries WHERE stack_id = ?")
            .bind(stack_id)
            .execute(&mut *tx)
            .await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO lockfile_entries \
                 (stack_id, instance_id, host_ports, image_digest, template_version, \
                  config_hash, config_snapshot, recorded_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(stack_id)
            .bind(&entry.instance_id)
            .bind(serde_json::to_string(&entry.host_ports)?)
            .bind(&entry.image_digest)
            .bind(entry.template_version)
            .bind(&entry.config_hash)
            .bind(&entry.config_snapshot)
            .bind(entry.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_lockfile(&self, stack_id: &str) -> Result<Vec<LockfileEntry>> {
        let rows = sqlx::query_as::<_, LockfileRow>(
            "SELECT stack_id, instance_id, host_ports, image_digest, template_version, \
             config_hash, config_snapshot, recorded_at \
             FROM lockfile_entries WHERE stack_id = ? ORDER BY instance_id ASC",
        )
        .bind(stack_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(entry_from_row).collect()
    }

    pub async fn delete_lockfile(&self, stack_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM lockfile_entries WHERE stack_id = ?")
            .bind(stack_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
