//! Recommendation lifecycle.
//!
//! PENDING resolves exactly once to APPROVED, REJECTED or EXPIRED. Every
//! resolution goes through [`RecommendationStore::resolve_if_pending`], a
//! conditional write that only succeeds while the row is still PENDING, so a
//! human press racing the expiry timer has exactly one winner. The loser sees
//! [`TransitionOutcome::AlreadyResolved`], which is not an error.

use crate::broker::{Brokerage, OrderConfirmation, OrderRequest, OrderSize};
use crate::domain::decision::Action;
use crate::domain::recommendation::{NewRecommendation, Recommendation, RecommendationStatus};
use crate::notify::{format, Notifier};
use crate::schedule::{self, ScheduleHandle, ScheduleSpec, Scheduler};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn insert_recommendation(&self, rec: &Recommendation) -> Result<()>;

    async fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>>;

    async fn list_recommendations(
        &self,
        status: Option<RecommendationStatus>,
        limit: i64,
    ) -> Result<Vec<Recommendation>>;

    /// PENDING recommendations created before `cutoff`.
    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Recommendation>>;

    /// Moves the row to `to` only if it is still PENDING. Returns whether this
    /// call performed the transition.
    async fn resolve_if_pending(
        &self,
        id: Uuid,
        to: RecommendationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn set_expiry_schedule(&self, id: Uuid, handle: ScheduleHandle) -> Result<()>;

    /// APPROVED -> EXECUTED. Returns false if the row was not APPROVED.
    async fn mark_executed(&self, id: Uuid, order_id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn record_order_failure(&self, id: Uuid, error: &str) -> Result<()>;
}

/// Result of a human action or timer callback against a recommendation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Approved {
        order: OrderConfirmation,
    },
    /// Approval stands; the order could not be placed.
    ApprovedOrderFailed {
        error: String,
    },
    Rejected,
    Expired,
    /// Approval arrived after the window; the record is now EXPIRED.
    ApprovalTooLate,
    AlreadyResolved {
        status: RecommendationStatus,
    },
    NotFound,
}

impl TransitionOutcome {
    pub fn user_message(&self) -> String {
        match self {
            Self::Approved { order } => format!(
                "Approved. Order {} submitted (status: {}).",
                order.order_id, order.status
            ),
            Self::ApprovedOrderFailed { error } => format!(
                "Approved, but the order could not be placed: {error}. The recommendation stays approved; please reconcile manually."
            ),
            Self::Rejected => "Rejected. No order will be placed.".to_string(),
            Self::Expired => "Recommendation expired.".to_string(),
            Self::ApprovalTooLate => {
                "Too late: the approval window has closed and the recommendation has expired."
                    .to_string()
            }
            Self::AlreadyResolved { status } => {
                format!("Nothing to do: this recommendation was already {status}.")
            }
            Self::NotFound => "Recommendation not found.".to_string(),
        }
    }

    /// Stable machine-readable name, used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Approved { .. } => "approved",
            Self::ApprovedOrderFailed { .. } => "approved_order_failed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::ApprovalTooLate => "approval_too_late",
            Self::AlreadyResolved { .. } => "already_resolved",
            Self::NotFound => "not_found",
        }
    }

    /// Whether this call performed a transition out of PENDING.
    pub fn resolved_here(&self) -> bool {
        matches!(
            self,
            Self::Approved { .. }
                | Self::ApprovedOrderFailed { .. }
                | Self::Rejected
                | Self::Expired
                | Self::ApprovalTooLate
        )
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub expiry: Duration,
    pub public_base_url: Option<String>,
}

#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn RecommendationStore>,
    scheduler: Arc<dyn Scheduler>,
    notifier: Arc<dyn Notifier>,
    broker: Arc<dyn Brokerage>,
    config: LifecycleConfig,
}

impl LifecycleService {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        scheduler: Arc<dyn Scheduler>,
        notifier: Arc<dyn Notifier>,
        broker: Arc<dyn Brokerage>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            notifier,
            broker,
            config,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Recommendation>> {
        self.store.get_recommendation(id).await
    }

    pub async fn list(
        &self,
        status: Option<RecommendationStatus>,
        limit: i64,
    ) -> Result<Vec<Recommendation>> {
        self.store.list_recommendations(status, limit).await
    }

    /// Persist, then register the expiry timer, then prompt the human. A human
    /// is never notified about a recommendation that has no timer.
    pub async fn create(&self, req: NewRecommendation, now: DateTime<Utc>) -> Result<Recommendation> {
        anyhow::ensure!(
            matches!(req.action, Action::Buy | Action::Sell),
            "only BUY or SELL can become a recommendation (got {})",
            req.action
        );

        let mut rec = Recommendation::pending(req, now);
        self.store
            .insert_recommendation(&rec)
            .await
            .with_context(|| format!("failed to persist recommendation for {}", rec.ticker))?;

        let spec = ScheduleSpec::after(self.config.expiry, now);
        let handle = match self
            .scheduler
            .schedule(spec, schedule::EXPIRE_RECOMMENDATION, schedule::expire_payload(rec.id))
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                // Without a timer the row could stay PENDING forever; close it now.
                if let Err(close_err) = self
                    .store
                    .resolve_if_pending(rec.id, RecommendationStatus::Expired, now)
                    .await
                {
                    tracing::error!(
                        recommendation_id = %rec.id,
                        error = %close_err,
                        "failed to expire recommendation after timer registration failure"
                    );
                }
                return Err(err.context(format!(
                    "failed to schedule expiry for recommendation {}",
                    rec.id
                )));
            }
        };

        if let Err(err) = self.store.set_expiry_schedule(rec.id, handle).await {
            tracing::warn!(recommendation_id = %rec.id, error = %err, "failed to store expiry schedule handle");
        } else {
            rec.expiry_schedule_id = Some(handle.0);
        }

        let prompt = format::approval_prompt(
            &rec,
            self.notifier.default_recipient(),
            self.config.expiry,
            self.config.public_base_url.as_deref(),
        );
        self.notifier
            .send(&prompt)
            .await
            .with_context(|| format!("failed to deliver approval prompt for {}", rec.id))?;

        tracing::info!(
            recommendation_id = %rec.id,
            ticker = %rec.ticker,
            action = %rec.action,
            notional = rec.notional,
            channel = self.notifier.channel_name(),
            "recommendation created"
        );
        Ok(rec)
    }

    /// Human approval. Honoured only while PENDING and inside the window; the
    /// order is attempted only after the APPROVED write has succeeded.
    pub async fn approve(&self, id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let Some(rec) = self.store.get_recommendation(id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !rec.status.is_pending() {
            return Ok(TransitionOutcome::AlreadyResolved { status: rec.status });
        }

        if rec.is_past_window(now, self.config.expiry) {
            let expired = self
                .store
                .resolve_if_pending(id, RecommendationStatus::Expired, now)
                .await?;
            if !expired {
                return self.already_resolved(id).await;
            }
            tracing::info!(recommendation_id = %id, "late approval refused; recommendation expired");
            return Ok(TransitionOutcome::ApprovalTooLate);
        }

        if !self
            .store
            .resolve_if_pending(id, RecommendationStatus::Approved, now)
            .await?
        {
            return self.already_resolved(id).await;
        }
        tracing::info!(recommendation_id = %id, ticker = %rec.ticker, "recommendation approved");
        self.cancel_expiry(&rec).await;

        match self.place_order(&rec).await {
            Ok(order) => {
                if !self.store.mark_executed(id, &order.order_id, now).await? {
                    tracing::warn!(recommendation_id = %id, "executed marker not applied; status moved");
                }
                Ok(TransitionOutcome::Approved { order })
            }
            Err(err) => {
                let error = format!("{err:#}");
                tracing::error!(recommendation_id = %id, error = %error, "order placement failed after approval");
                if let Err(store_err) = self.store.record_order_failure(id, &error).await {
                    tracing::error!(recommendation_id = %id, error = %store_err, "failed to record order failure");
                }
                Ok(TransitionOutcome::ApprovedOrderFailed { error })
            }
        }
    }

    pub async fn reject(&self, id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let Some(rec) = self.store.get_recommendation(id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !rec.status.is_pending() {
            return Ok(TransitionOutcome::AlreadyResolved { status: rec.status });
        }
        if !self
            .store
            .resolve_if_pending(id, RecommendationStatus::Rejected, now)
            .await?
        {
            return self.already_resolved(id).await;
        }
        tracing::info!(recommendation_id = %id, ticker = %rec.ticker, "recommendation rejected");
        self.cancel_expiry(&rec).await;
        Ok(TransitionOutcome::Rejected)
    }

    /// Timer callback. An already-resolved recommendation is a no-op.
    pub async fn expire(&self, id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        if self
            .store
            .resolve_if_pending(id, RecommendationStatus::Expired, now)
            .await?
        {
            tracing::info!(recommendation_id = %id, "recommendation expired");
            return Ok(TransitionOutcome::Expired);
        }

        let outcome = self.already_resolved(id).await?;
        tracing::debug!(recommendation_id = %id, ?outcome, "expiry callback found nothing to do");
        Ok(outcome)
    }

    /// Expires every PENDING recommendation whose window has passed. Used to
    /// repair state after an outage that outlived some timers.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let stale = self
            .store
            .list_pending_before(now - self.config.expiry)
            .await?;
        let mut expired = 0;
        for rec in stale {
            if matches!(self.expire(rec.id, now).await?, TransitionOutcome::Expired) {
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn already_resolved(&self, id: Uuid) -> Result<TransitionOutcome> {
        Ok(match self.store.get_recommendation(id).await? {
            Some(rec) => TransitionOutcome::AlreadyResolved { status: rec.status },
            None => TransitionOutcome::NotFound,
        })
    }

    async fn cancel_expiry(&self, rec: &Recommendation) {
        let Some(schedule_id) = rec.expiry_schedule_id else {
            return;
        };
        if let Err(err) = self.scheduler.cancel(ScheduleHandle(schedule_id)).await {
            tracing::warn!(recommendation_id = %rec.id, error = %err, "failed to cancel expiry schedule");
        }
    }

    async fn place_order(&self, rec: &Recommendation) -> Result<OrderConfirmation> {
        let order = self.order_for(rec).await?;
        tracing::info!(
            recommendation_id = %rec.id,
            broker = self.broker.broker_name(),
            size = ?order.size,
            "submitting order"
        );
        self.broker.submit_order(&order).await
    }

    async fn order_for(&self, rec: &Recommendation) -> Result<OrderRequest> {
        let bracketed = rec.stop_price.is_some() && rec.take_profit.is_some();
        let size = match (rec.quantity, bracketed) {
            (Some(qty), _) => OrderSize::Quantity(qty),
            (None, false) => OrderSize::Notional(rec.notional),
            (None, true) => {
                // Bracket legs need whole shares.
                let prices = self
                    .broker
                    .latest_prices(std::slice::from_ref(&rec.ticker))
                    .await?;
                let price = prices
                    .get(&rec.ticker)
                    .copied()
                    .filter(|p| *p > 0.0)
                    .with_context(|| format!("no latest price for {}", rec.ticker))?;
                let qty = (rec.notional / price).floor();
                anyhow::ensure!(
                    qty >= 1.0,
                    "notional ${:.2} buys less than one share of {} at ${price:.2}",
                    rec.notional,
                    rec.ticker
                );
                OrderSize::Quantity(qty)
            }
        };

        Ok(OrderRequest {
            ticker: rec.ticker.clone(),
            side: rec.action,
            size,
            stop_price: rec.stop_price,
            take_profit: rec.take_profit,
        })
    }
}
