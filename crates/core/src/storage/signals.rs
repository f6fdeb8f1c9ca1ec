use crate::domain::signal::ScoredSignal;
use crate::domain::transaction::TransactionRecord;
use crate::pipeline::SignalStore;
use crate::storage::PgStore;
use anyhow::Context;

const INSERT_BATCH: usize = 200;

#[async_trait::async_trait]
impl SignalStore for PgStore {
    async fn append_transactions(&self, records: &[TransactionRecord]) -> anyhow::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        let mut affected: u64 = 0;
        for chunk in records.chunks(INSERT_BATCH) {
            let mut qb = sqlx::QueryBuilder::new(
                "INSERT INTO insider_transactions \
                 (accession_number, ticker, insider_name, insider_role, transaction_date, kind, shares, price_per_share, value) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.accession_number.as_deref())
                    .push_bind(&r.ticker)
                    .push_bind(&r.insider_name)
                    .push_bind(&r.insider_role)
                    .push_bind(r.transaction_date)
                    .push_bind(r.kind.as_str())
                    .push_bind(r.shares)
                    .push_bind(r.price_per_share)
                    .push_bind(r.value);
            });
            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("insert insider_transactions failed")?;
            affected += res.rows_affected();
        }
        tx.commit().await.context("commit transaction failed")?;

        tracing::debug!(rows = affected, "insider transactions appended");
        Ok(affected)
    }

    async fn append_signals(&self, signals: Vec<ScoredSignal>) -> anyhow::Result<Vec<ScoredSignal>> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        let mut out = Vec::with_capacity(signals.len());
        for mut s in signals {
            let r = &s.record;
            let b = &s.breakdown;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO scored_signals \
                 (accession_number, ticker, insider_name, insider_role, transaction_date, shares, price_per_share, value, \
                  score, role_points, value_points, cluster_points, recency_points, raw_total, capped) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
                 RETURNING id",
            )
            .bind(r.accession_number.as_deref())
            .bind(&r.ticker)
            .bind(&r.insider_name)
            .bind(&r.insider_role)
            .bind(r.transaction_date)
            .bind(r.shares)
            .bind(r.price_per_share)
            .bind(r.value)
            .bind(s.score as i32)
            .bind(b.role as i32)
            .bind(b.value as i32)
            .bind(b.cluster as i32)
            .bind(b.recency as i32)
            .bind(b.raw_total as i32)
            .bind(b.capped)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("insert scored_signals failed for {}", r.ticker))?;
            s.id = Some(id);
            out.push(s);
        }
        tx.commit().await.context("commit transaction failed")?;
        Ok(out)
    }
}
