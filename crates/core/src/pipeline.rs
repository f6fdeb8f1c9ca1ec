//! One end-to-end run: ingest, score, decide, create recommendations.

use crate::decision::DecisionOrchestrator;
use crate::domain::signal::ScoredSignal;
use crate::domain::transaction::TransactionRecord;
use crate::ingest::{self, provider::FilingSource};
use crate::lifecycle::LifecycleService;
use crate::scoring;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Append-only storage for ingested transactions and scored signals.
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    async fn append_transactions(&self, records: &[TransactionRecord]) -> Result<u64>;

    /// Persists the signals and returns them with ids attached, order kept.
    async fn append_signals(&self, signals: Vec<ScoredSignal>) -> Result<Vec<ScoredSignal>>;
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ingest_concurrency: usize,
    pub scoring_top_n: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub lookback_days: u32,
    pub filings: usize,
    pub records: usize,
    pub purchases: usize,
    pub signals: usize,
    pub decisions: usize,
    pub skipped: usize,
    pub recommendations_created: usize,
    pub recommendations_failed: usize,
}

#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn FilingSource>,
    store: Arc<dyn SignalStore>,
    orchestrator: DecisionOrchestrator,
    lifecycle: LifecycleService,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn FilingSource>,
        store: Arc<dyn SignalStore>,
        orchestrator: DecisionOrchestrator,
        lifecycle: LifecycleService,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            store,
            orchestrator,
            lifecycle,
            config,
        }
    }

    /// Errors returned here are fatal to the run. A single recommendation
    /// that cannot be created is counted in the summary instead.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let batch = ingest::ingest_with_fallback(self.source.as_ref(), self.config.ingest_concurrency)
            .await
            .context("filing ingestion failed")?;

        let mut summary = RunSummary {
            lookback_days: batch.lookback_days,
            filings: batch.filings,
            records: batch.records.len(),
            purchases: batch.purchase_count(),
            ..RunSummary::default()
        };

        if !batch.records.is_empty() {
            self.store
                .append_transactions(&batch.records)
                .await
                .context("failed to persist transactions")?;
        }

        let scored = scoring::score_batch(&batch.records, now.date_naive(), self.config.scoring_top_n);
        let signals = if scored.is_empty() {
            scored
        } else {
            self.store
                .append_signals(scored)
                .await
                .context("failed to persist scored signals")?
        };
        summary.signals = signals.len();

        let run = self.orchestrator.decide(&signals, now).await?;
        summary.decisions = run.decisions.len();
        summary.skipped = run.outcome.skipped.len();

        for req in run.outcome.accepted {
            let ticker = req.ticker.clone();
            // The approval window opens when the prompt goes out, not when
            // the run started.
            match self.lifecycle.create(req, Utc::now()).await {
                Ok(_) => summary.recommendations_created += 1,
                Err(err) => {
                    summary.recommendations_failed += 1;
                    tracing::error!(ticker = %ticker, error = ?err, "failed to create recommendation");
                }
            }
        }

        tracing::info!(
            lookback_days = summary.lookback_days,
            records = summary.records,
            signals = summary.signals,
            decisions = summary.decisions,
            created = summary.recommendations_created,
            failed = summary.recommendations_failed,
            "pipeline run complete"
        );
        Ok(summary)
    }
}
