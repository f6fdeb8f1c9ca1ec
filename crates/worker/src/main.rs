use anyhow::Context;
use clap::{Parser, Subcommand};
use insider_core::broker::alpaca::AlpacaClient;
use insider_core::config::Settings;
use insider_core::decision::{DecisionOrchestrator, OrchestratorConfig};
use insider_core::ingest::provider::EdgarClient;
use insider_core::lifecycle::{LifecycleConfig, LifecycleService};
use insider_core::llm::anthropic::AnthropicClient;
use insider_core::llm::error::LlmDiagnosticsError;
use insider_core::notify::telegram::TelegramNotifier;
use insider_core::notify::Notifier;
use insider_core::pipeline::{Pipeline, PipelineConfig, RunSummary};
use insider_core::schedule::{self, ExpirePayload, ScheduledJob};
use insider_core::storage::{self, lock, PgStore};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CLAIM_BATCH: i64 = 20;
const RETRY_DELAY_SECS: i64 = 30;
const STALE_SWEEP_SECS: u64 = 300;

#[derive(Debug, Parser)]
#[command(name = "insider_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline once now.
    Run,
    /// Poll durable schedules and fire due callbacks until interrupted.
    Scheduler {
        /// Process due schedules once and exit.
        #[arg(long)]
        once: bool,
    },
    /// Expire every pending recommendation whose approval window has passed.
    ExpireStale,
}

#[derive(Clone)]
struct Worker {
    store: PgStore,
    pipeline: Pipeline,
    lifecycle: LifecycleService,
    notifier: Arc<dyn Notifier>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = async {
        let worker = build_worker(&settings).await?;
        match args.command {
            Command::Run => worker.run_pipeline().await.map(|_| ()),
            Command::Scheduler { once } => worker.scheduler_loop(&settings, once).await,
            Command::ExpireStale => {
                let n = worker.lifecycle.expire_stale(chrono::Utc::now()).await?;
                tracing::info!(expired = n, "stale recommendations expired");
                Ok(())
            }
        }
    }
    .await;

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = ?err, "worker failed");
    }
    result
}

async fn build_worker(settings: &Settings) -> anyhow::Result<Worker> {
    let pool = storage::connect(settings.require_database_url()?, 5).await?;
    let store = PgStore::new(pool);

    let broker = Arc::new(AlpacaClient::from_settings(settings)?);
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::from_settings(settings)?);
    let shared = Arc::new(store.clone());

    let lifecycle = LifecycleService::new(
        shared.clone(),
        shared.clone(),
        notifier.clone(),
        broker.clone(),
        LifecycleConfig {
            expiry: settings.recommendation_expiry,
            public_base_url: settings.public_base_url.clone(),
        },
    );
    let orchestrator = DecisionOrchestrator::new(
        broker,
        shared.clone(),
        Arc::new(AnthropicClient::from_settings(settings)?),
        OrchestratorConfig {
            default_buy_notional: settings.default_buy_notional,
            min_signal_score: settings.min_signal_score,
        },
    );
    let pipeline = Pipeline::new(
        Arc::new(EdgarClient::from_settings(settings)?),
        shared,
        orchestrator,
        lifecycle.clone(),
        PipelineConfig {
            ingest_concurrency: settings.ingest_concurrency,
            scoring_top_n: settings.scoring_top_n,
        },
    );

    Ok(Worker {
        store,
        pipeline,
        lifecycle,
        notifier,
    })
}

impl Worker {
    /// One pipeline run guarded by the per-date advisory lock. Fatal errors are
    /// reported to the operator channel before being returned.
    async fn run_pipeline(&self) -> anyhow::Result<Option<RunSummary>> {
        let now = chrono::Utc::now();
        let run_date = now.date_naive();

        let Some(run_lock) = lock::try_acquire_run_lock(self.store.pool(), run_date).await? else {
            tracing::warn!(%run_date, "run lock not acquired; another run in progress");
            return Ok(None);
        };

        let result = self.pipeline.run(now).await;
        if let Err(err) = run_lock.release().await {
            tracing::warn!(error = %err, "failed to release run lock");
        }

        match result {
            Ok(summary) => {
                tracing::info!(summary = ?summary, "pipeline run finished");
                Ok(Some(summary))
            }
            Err(err) => {
                if let Some(diag) = err.downcast_ref::<LlmDiagnosticsError>() {
                    tracing::error!(
                        stage = diag.stage,
                        raw_output = diag.raw_output.as_deref().unwrap_or(""),
                        "reasoning service diagnostics"
                    );
                }
                let alert = format!("Pipeline run {run_date} failed: {err:#}");
                if let Err(notify_err) = self.notifier.send_text(&alert).await {
                    tracing::warn!(error = %notify_err, "failed to deliver operator alert");
                }
                Err(err)
            }
        }
    }

    async fn scheduler_loop(&self, settings: &Settings, once: bool) -> anyhow::Result<()> {
        schedule::ensure_recurring_run(&self.store, &settings.pipeline_cron).await?;

        // Timers that came due while nothing was polling are picked up by the
        // first claim; the sweep covers rows whose timer was lost.
        self.sweep_stale().await;
        let sweep_every = Duration::from_secs(STALE_SWEEP_SECS);
        let mut next_sweep = tokio::time::Instant::now() + sweep_every;

        let poll = Duration::from_secs(settings.scheduler_poll_secs.max(1));
        tracing::info!(poll_secs = poll.as_secs(), cron = %settings.pipeline_cron, "scheduler started");

        loop {
            self.claim_and_dispatch().await;

            if tokio::time::Instant::now() >= next_sweep {
                self.sweep_stale().await;
                next_sweep = tokio::time::Instant::now() + sweep_every;
            }

            if once {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("scheduler shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn claim_and_dispatch(&self) {
        let due = match self.store.claim_due(chrono::Utc::now(), CLAIM_BATCH).await {
            Ok(due) => due,
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = ?err, "claim due schedules failed; retrying next poll");
                return;
            }
        };

        for job in due {
            let Err(err) = self.dispatch(&job).await else {
                continue;
            };
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(handle = %job.handle, callback = %job.callback, error = ?err, "schedule callback failed");

            let delay = chrono::Duration::seconds(RETRY_DELAY_SECS);
            match schedule::retry_later(&self.store, &job, delay, chrono::Utc::now()).await {
                Ok(Some(retry)) => tracing::info!(handle = %job.handle, %retry, "schedule callback re-armed"),
                Ok(None) => {}
                Err(err) => tracing::error!(
                    handle = %job.handle,
                    error = ?err,
                    "failed to re-arm schedule; stale sweep will repair"
                ),
            }
        }
    }

    async fn sweep_stale(&self) {
        match self.lifecycle.expire_stale(chrono::Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => tracing::info!(expired, "expired stale recommendations"),
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = ?err, "stale recommendation sweep failed");
            }
        }
    }

    /// Errors mean the callback should be retried.
    async fn dispatch(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        match job.callback.as_str() {
            schedule::EXPIRE_RECOMMENDATION => {
                let payload = match serde_json::from_value::<ExpirePayload>(job.payload.clone()) {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::error!(handle = %job.handle, error = %err, "bad expiry payload; dropped");
                        return Ok(());
                    }
                };
                let outcome = self
                    .lifecycle
                    .expire(payload.recommendation_id, chrono::Utc::now())
                    .await
                    .with_context(|| format!("expiry of {} failed", payload.recommendation_id))?;
                tracing::debug!(
                    recommendation_id = %payload.recommendation_id,
                    ?outcome,
                    "expiry callback handled"
                );
            }
            schedule::RUN_PIPELINE => {
                // A run takes minutes; expiry callbacks keep flowing meanwhile.
                let worker = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = worker.run_pipeline().await {
                        sentry_anyhow::capture_anyhow(&err);
                        tracing::error!(error = ?err, "scheduled pipeline run failed");
                    }
                });
            }
            other => {
                tracing::warn!(handle = %job.handle, callback = other, "unknown schedule callback; dropped");
            }
        }
        Ok(())
    }
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
