use crate::decision::{PositionThesis, ThesisStore};
use crate::domain::decision::Action;
use crate::domain::recommendation::{Recommendation, RecommendationStatus};
use crate::lifecycle::RecommendationStore;
use crate::schedule::ScheduleHandle;
use crate::storage::PgStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

const COLUMNS: &str = "id, ticker, action, rationale, signal_id, notional, quantity, stop_price, take_profit, \
                       status, created_at, resolved_at, expiry_schedule_id, order_id, order_error";

#[derive(Debug, sqlx::FromRow)]
struct RecommendationRow {
    id: Uuid,
    ticker: String,
    action: String,
    rationale: String,
    signal_id: Option<i64>,
    notional: f64,
    quantity: Option<f64>,
    stop_price: Option<f64>,
    take_profit: Option<f64>,
    status: String,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    expiry_schedule_id: Option<Uuid>,
    order_id: Option<String>,
    order_error: Option<String>,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = anyhow::Error;

    fn try_from(row: RecommendationRow) -> anyhow::Result<Self> {
        let action = Action::parse(&row.action)
            .with_context(|| format!("invalid action in DB for {}: {}", row.id, row.action))?;
        let status = RecommendationStatus::parse(&row.status)
            .with_context(|| format!("invalid status in DB for {}: {}", row.id, row.status))?;
        Ok(Self {
            id: row.id,
            ticker: row.ticker,
            action,
            rationale: row.rationale,
            signal_id: row.signal_id,
            notional: row.notional,
            quantity: row.quantity,
            stop_price: row.stop_price,
            take_profit: row.take_profit,
            status,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
            expiry_schedule_id: row.expiry_schedule_id,
            order_id: row.order_id,
            order_error: row.order_error,
        })
    }
}

fn into_recommendations(rows: Vec<RecommendationRow>) -> anyhow::Result<Vec<Recommendation>> {
    rows.into_iter().map(Recommendation::try_from).collect()
}

#[async_trait::async_trait]
impl RecommendationStore for PgStore {
    async fn insert_recommendation(&self, rec: &Recommendation) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO recommendations \
             (id, ticker, action, rationale, signal_id, notional, quantity, stop_price, take_profit, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(rec.id)
        .bind(&rec.ticker)
        .bind(rec.action.as_str())
        .bind(&rec.rationale)
        .bind(rec.signal_id)
        .bind(rec.notional)
        .bind(rec.quantity)
        .bind(rec.stop_price)
        .bind(rec.take_profit)
        .bind(rec.status.as_str())
        .bind(rec.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert recommendation failed for {}", rec.ticker))?;
        Ok(())
    }

    async fn get_recommendation(&self, id: Uuid) -> anyhow::Result<Option<Recommendation>> {
        let row = sqlx::query_as::<_, RecommendationRow>(&format!(
            "SELECT {COLUMNS} FROM recommendations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select recommendation {id} failed"))?;
        row.map(Recommendation::try_from).transpose()
    }

    async fn list_recommendations(
        &self,
        status: Option<RecommendationStatus>,
        limit: i64,
    ) -> anyhow::Result<Vec<Recommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(&format!(
            "SELECT {COLUMNS} FROM recommendations \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC \
             LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .context("list recommendations failed")?;
        into_recommendations(rows)
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Recommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(&format!(
            "SELECT {COLUMNS} FROM recommendations \
             WHERE status = 'pending' AND created_at <= $1 \
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("list stale pending recommendations failed")?;
        into_recommendations(rows)
    }

    async fn resolve_if_pending(
        &self,
        id: Uuid,
        to: RecommendationStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        anyhow::ensure!(
            RecommendationStatus::Pending.can_transition_to(to),
            "pending cannot move to {to}"
        );
        let res = sqlx::query(
            "UPDATE recommendations SET status = $2, resolved_at = $3 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("resolve recommendation {id} -> {to} failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_expiry_schedule(&self, id: Uuid, handle: ScheduleHandle) -> anyhow::Result<()> {
        sqlx::query("UPDATE recommendations SET expiry_schedule_id = $2 WHERE id = $1")
            .bind(id)
            .bind(handle.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("store expiry schedule for {id} failed"))?;
        Ok(())
    }

    async fn mark_executed(&self, id: Uuid, order_id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE recommendations SET status = 'executed', order_id = $2, executed_at = $3, order_error = NULL \
             WHERE id = $1 AND status = 'approved'",
        )
        .bind(id)
        .bind(order_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("mark recommendation {id} executed failed"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn record_order_failure(&self, id: Uuid, error: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE recommendations SET order_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .with_context(|| format!("record order failure for {id} failed"))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ThesisStore for PgStore {
    async fn open_position_theses(&self) -> anyhow::Result<Vec<PositionThesis>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, DateTime<Utc>)>(
            "SELECT DISTINCT ON (r.ticker) r.ticker, r.rationale, s.insider_name, \
                    COALESCE(r.executed_at, r.resolved_at, r.created_at) AS executed_at \
             FROM recommendations r \
             LEFT JOIN scored_signals s ON s.id = r.signal_id \
             WHERE r.action = 'BUY' AND r.status = 'executed' \
             ORDER BY r.ticker, COALESCE(r.executed_at, r.resolved_at, r.created_at) DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("select position theses failed")?;

        Ok(rows
            .into_iter()
            .map(|(ticker, rationale, insider_name, executed_at)| PositionThesis {
                ticker,
                rationale,
                insider_name,
                executed_at,
            })
            .collect())
    }
}
