use crate::schedule::{next_cron_run, ScheduleHandle, ScheduleSpec, ScheduledJob, Scheduler};
use crate::storage::PgStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

type JobRow = (Uuid, String, Value, DateTime<Utc>, Option<String>);

fn into_job((id, callback, payload, run_at, cron): JobRow) -> ScheduledJob {
    ScheduledJob {
        handle: ScheduleHandle(id),
        callback,
        payload,
        run_at,
        cron,
    }
}

#[async_trait::async_trait]
impl Scheduler for PgStore {
    async fn schedule(
        &self,
        spec: ScheduleSpec,
        callback: &str,
        payload: Value,
    ) -> anyhow::Result<ScheduleHandle> {
        let run_at = spec.first_run(Utc::now())?;
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO schedules (id, callback, payload, cron, run_at, status) \
             VALUES ($1, $2, $3, $4, $5, 'active')",
        )
        .bind(id)
        .bind(callback)
        .bind(&payload)
        .bind(spec.cron_expression())
        .bind(run_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert schedule for {callback} failed"))?;

        tracing::debug!(handle = %id, callback, %run_at, "schedule registered");
        Ok(ScheduleHandle(id))
    }

    async fn cancel(&self, handle: ScheduleHandle) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE schedules SET status = 'cancelled' WHERE id = $1 AND status = 'active'",
        )
        .bind(handle.0)
        .execute(&self.pool)
        .await
        .with_context(|| format!("cancel schedule {handle} failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_active(&self) -> anyhow::Result<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, callback, payload, run_at, cron FROM schedules \
             WHERE status = 'active' ORDER BY run_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("list active schedules failed")?;
        Ok(rows.into_iter().map(into_job).collect())
    }
}

impl PgStore {
    /// Claims up to `limit` due schedules. Rows locked by another poller are
    /// skipped. One-shot rows are closed and cron rows advanced to their next
    /// occurrence before the claim commits, so each firing is handed out once.
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<ScheduledJob>> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT id, callback, payload, run_at, cron FROM schedules \
             WHERE status = 'active' AND run_at <= $1 \
             ORDER BY run_at ASC \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .context("select due schedules failed")?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let job = into_job(row);
            let next = match job.cron.as_deref() {
                None => None,
                Some(expr) => match next_cron_run(expr, now) {
                    Ok(next) => next,
                    Err(err) => {
                        tracing::error!(handle = %job.handle, error = %err, "invalid cron on schedule; closing it");
                        None
                    }
                },
            };

            match next {
                Some(next_run) => {
                    sqlx::query("UPDATE schedules SET run_at = $2, last_run_at = $3 WHERE id = $1")
                        .bind(job.handle.0)
                        .bind(next_run)
                        .bind(now)
                        .execute(&mut *tx)
                        .await
                        .context("advance cron schedule failed")?;
                }
                None => {
                    sqlx::query("UPDATE schedules SET status = 'done', last_run_at = $2 WHERE id = $1")
                        .bind(job.handle.0)
                        .bind(now)
                        .execute(&mut *tx)
                        .await
                        .context("close schedule failed")?;
                }
            }
            claimed.push(job);
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(claimed)
    }
}
