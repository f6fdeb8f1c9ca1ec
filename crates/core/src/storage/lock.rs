use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks belong to the session, so the guard keeps its connection
// checked out until release.
const LOCK_NAMESPACE: i64 = 0x494E_5344_5253; // "INSDRS"

fn lock_key_for_date(run_date: NaiveDate) -> i64 {
    LOCK_NAMESPACE ^ (run_date.num_days_from_ce() as i64)
}

/// Held while a pipeline run for `run_date` is in progress.
pub struct RunLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

/// Returns `None` when another process already runs the pipeline for this date.
pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    run_date: NaiveDate,
) -> anyhow::Result<Option<RunLock>> {
    let key = lock_key_for_date(run_date);
    let mut conn = pool
        .acquire()
        .await
        .context("failed to check out connection for run lock")?;
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0.then_some(RunLock { conn, key }))
}

impl RunLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.key;
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"))?;
        Ok(())
    }
}
