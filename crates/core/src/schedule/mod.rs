//! Durable timers: one-shot and cron schedules persisted as rows, claimed by
//! whichever worker polls first.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub const EXPIRE_RECOMMENDATION: &str = "expire_recommendation";
pub const RUN_PIPELINE: &str = "run_pipeline";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    Once { run_at: DateTime<Utc> },
    /// Seconds-first cron expression, evaluated in UTC.
    Cron { expression: String },
}

impl ScheduleSpec {
    pub fn after(delay: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self::Once { run_at: now + delay }
    }

    pub fn cron_expression(&self) -> Option<&str> {
        match self {
            Self::Once { .. } => None,
            Self::Cron { expression } => Some(expression),
        }
    }

    /// First fire time at or after `now`.
    pub fn first_run(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Self::Once { run_at } => Ok(*run_at),
            Self::Cron { expression } => next_cron_run(expression, now)?
                .with_context(|| format!("cron expression {expression:?} never fires")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleHandle(pub Uuid);

impl std::fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub handle: ScheduleHandle,
    pub callback: String,
    pub payload: serde_json::Value,
    pub run_at: DateTime<Utc>,
    pub cron: Option<String>,
}

#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(
        &self,
        spec: ScheduleSpec,
        callback: &str,
        payload: serde_json::Value,
    ) -> Result<ScheduleHandle>;

    /// Returns false when the schedule was not active.
    async fn cancel(&self, handle: ScheduleHandle) -> Result<bool>;

    async fn list_active(&self) -> Result<Vec<ScheduledJob>>;
}

pub fn next_cron_run(expression: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = cron::Schedule::from_str(expression)
        .map_err(|e| anyhow::anyhow!("invalid cron expression {expression:?}: {e}"))?;
    Ok(schedule.after(&after).next())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirePayload {
    pub recommendation_id: Uuid,
}

pub fn expire_payload(recommendation_id: Uuid) -> serde_json::Value {
    serde_json::json!({ "recommendation_id": recommendation_id })
}

/// Registers the recurring pipeline run unless an identical one is already active.
pub async fn ensure_recurring_run(
    scheduler: &dyn Scheduler,
    expression: &str,
) -> Result<ScheduleHandle> {
    // Validate before touching storage.
    next_cron_run(expression, Utc::now())?;

    let active = scheduler.list_active().await?;
    for job in &active {
        if job.callback == RUN_PIPELINE && job.cron.as_deref() == Some(expression) {
            return Ok(job.handle);
        }
    }

    // A changed expression replaces the old recurring run.
    for job in active.iter().filter(|j| j.callback == RUN_PIPELINE) {
        scheduler.cancel(job.handle).await?;
        tracing::info!(handle = %job.handle, old = ?job.cron, "replaced recurring pipeline schedule");
    }

    let handle = scheduler
        .schedule(
            ScheduleSpec::Cron {
                expression: expression.to_string(),
            },
            RUN_PIPELINE,
            serde_json::json!({}),
        )
        .await?;
    tracing::info!(%handle, expression, "registered recurring pipeline schedule");
    Ok(handle)
}

/// Re-registers a one-shot job whose callback failed after it was claimed.
/// Cron jobs were already advanced by the claim and are left alone.
pub async fn retry_later(
    scheduler: &dyn Scheduler,
    job: &ScheduledJob,
    delay: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Option<ScheduleHandle>> {
    if job.cron.is_some() {
        return Ok(None);
    }
    let handle = scheduler
        .schedule(ScheduleSpec::after(delay, now), &job.callback, job.payload.clone())
        .await
        .with_context(|| format!("failed to re-arm schedule {}", job.handle))?;
    Ok(Some(handle))
}
