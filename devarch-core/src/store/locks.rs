use chrono::{Duration, Utc};

use crate::error::{Error, Result};
use crate::types::LockRecord;

use super::{parse_ts, Store};

type LockRow = (String, String, String, String);

fn lock_from_row(row: LockRow) -> Result<LockRecord> {
    Ok(LockRecord {
        stack_id: row.0,
        holder: row.1,
        acquired_at: parse_ts(&row.2)?,
        deadline: parse_ts(&row.3)?,
    })
}

impl Store {
    /// Acquire the per-stack advisory lock. Insert-with-unique-constraint:
    /// a second caller fails with `stack-busy` while the row exists, even if
    /// the deadline has passed — only the supervisor sweep breaks expired
    /// locks.
    pub async fn acquire_lock(
        &self,
        stack_id: &str,
        holder: &str,
        ttl_secs: u64,
    ) -> Result<LockRecord> {
        let now = Utc::now();
        let deadline = now + Duration::seconds(ttl_secs as i64);
        let inserted = sqlx::query(
            "INSERT INTO stack_locks (stack_id, holder, acquired_at, deadline) VALUES (?, ?, ?, ?)",
        )
        .bind(stack_id)
        .bind(holder)
        .bind(now.to_rfc3339())
        .bind(deadline.to_rfc3339())
        .execute(self.pool())
        .await;

        match inserted {
            Ok(_) => Ok(LockRecord {
                stack_id: stack_id.to_string(),
                holder: holder.to_string(),
                acquired_at: now,
                deadline,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::stack_busy("an apply is already in flight for this stack")
                    .with_suggestion("retry with backoff"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock if this holder still owns it. Releasing a lock that
    /// was already broken is not an error.
    pub async fn release_lock(&self, stack_id: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM stack_locks WHERE stack_id = ? AND holder = ?")
            .bind(stack_id)
            .bind(holder)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_lock(&self, stack_id: &str) -> Result<Option<LockRecord>> {
        let row = sqlx::query_as::<_, LockRow>(
            "SELECT stack_id, holder, acquired_at, deadline FROM stack_locks WHERE stack_id = ?",
        )
        .bind(stack_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(lock_from_row).transpose()
    }

    /// Supervisor sweep: remove locks whose deadline has passed. Returns the
    /// stack ids whose locks were broken.
    pub async fn break_expired_locks(&self) -> Result<Vec<String>> {
        let now = Utc::now().to_rfc3339();
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT stack_id FROM stack_locks WHERE deadline < ?",
        )
        .bind(&now)
        .fetch_all(self.pool())
        .await?;
        if rows.is_empty() {
            return Ok(vec![]);
        }
        sqlx::query("DELETE FROM stack_locks WHERE deadline < ?")
            .bind(&now)
            .execute(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
