//! Decision orchestration: portfolio snapshot, reasoning call, validation and
//! guard rules. Produces recommendation requests; persisting them is the
//! lifecycle's job.

pub mod context;
pub mod guards;

use crate::broker::{Brokerage, Position};
use crate::domain::decision::Decision;
use crate::domain::signal::ScoredSignal;
use crate::llm::{json, DecisionInput, ReasoningClient};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub use guards::{apply_guards, GuardOutcome, SkipReason};

/// Rationale captured when a position was opened, re-surfaced when the
/// position is re-evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionThesis {
    pub ticker: String,
    pub rationale: String,
    pub insider_name: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ThesisStore: Send + Sync {
    /// Latest executed BUY per ticker, joined with its originating signal.
    async fn open_position_theses(&self) -> Result<Vec<PositionThesis>>;
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioSnapshot {
    pub positions: Vec<Position>,
    pub buying_power: f64,
    pub theses: HashMap<String, PositionThesis>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub default_buy_notional: f64,
    /// Signals below this score are not shown to the reasoning service.
    pub min_signal_score: u32,
}

#[derive(Debug, Clone)]
pub struct DecisionRun {
    pub decisions: Vec<Decision>,
    pub outcome: GuardOutcome,
}

#[derive(Clone)]
pub struct DecisionOrchestrator {
    broker: Arc<dyn Brokerage>,
    theses: Arc<dyn ThesisStore>,
    reasoning: Arc<dyn ReasoningClient>,
    config: OrchestratorConfig,
}

impl DecisionOrchestrator {
    pub fn new(
        broker: Arc<dyn Brokerage>,
        theses: Arc<dyn ThesisStore>,
        reasoning: Arc<dyn ReasoningClient>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            broker,
            theses,
            reasoning,
            config,
        }
    }

    /// Fetches positions, buying power and theses concurrently. Each lookup
    /// degrades to an empty default on failure.
    pub async fn snapshot(&self) -> PortfolioSnapshot {
        let (positions, buying_power, theses) = tokio::join!(
            self.broker.positions(),
            self.broker.buying_power(),
            self.theses.open_position_theses(),
        );

        let positions = positions.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "positions unavailable; assuming none");
            Vec::new()
        });
        let buying_power = buying_power.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "buying power unavailable; assuming zero");
            0.0
        });
        let theses = theses.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "position theses unavailable");
            Vec::new()
        });

        PortfolioSnapshot {
            positions,
            buying_power,
            theses: theses
                .into_iter()
                .map(|t| (t.ticker.to_ascii_uppercase(), t))
                .collect(),
        }
    }

    /// Runs one decision round over `signals` (best first). A failing or
    /// malformed reasoning reply fails the run.
    pub async fn decide(&self, signals: &[ScoredSignal], now: DateTime<Utc>) -> Result<DecisionRun> {
        let signals: Vec<ScoredSignal> = signals
            .iter()
            .filter(|s| s.score >= self.config.min_signal_score)
            .cloned()
            .collect();

        let snapshot = self.snapshot().await;
        if signals.is_empty() && snapshot.positions.is_empty() {
            tracing::info!("no signals and no positions; skipping reasoning call");
            return Ok(DecisionRun {
                decisions: Vec::new(),
                outcome: GuardOutcome {
                    remaining_buying_power: snapshot.buying_power,
                    ..GuardOutcome::default()
                },
            });
        }

        let input = DecisionInput {
            system_instructions: context::SYSTEM_INSTRUCTIONS.to_string(),
            portfolio_context: context::render_portfolio_context(&snapshot, now),
            signals_context: context::render_signals_context(&signals),
        };

        let reply = self
            .reasoning
            .invoke(&input)
            .await
            .with_context(|| format!("{:?} reasoning call failed", self.reasoning.provider()))?;
        let decisions = json::parse_decisions(&reply).context("reasoning reply rejected")?;

        tracing::info!(
            signals = signals.len(),
            positions = snapshot.positions.len(),
            decisions = decisions.len(),
            "reasoning reply parsed"
        );

        let outcome = apply_guards(
            decisions.clone(),
            &signals,
            &snapshot.positions,
            snapshot.buying_power,
            self.config.default_buy_notional,
        );
        Ok(DecisionRun { decisions, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Action;
    use crate::domain::signal::ScoreBreakdown;
    use crate::domain::transaction::{TransactionKind, TransactionRecord};
    use crate::testing::{FakeBroker, FakeReasoning, MemoryStore};
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 27, 14, 0, 0).unwrap()
    }

    fn signal(id: i64, ticker: &str, score: u32) -> ScoredSignal {
        let d = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        ScoredSignal {
            id: Some(id),
            record: TransactionRecord::new(ticker, "Jane Doe", "CEO", d, TransactionKind::Purchase, 1000.0, 20.0),
            score,
            breakdown: ScoreBreakdown::new(40, 5, 0, 20),
        }
    }

    fn held(ticker: &str) -> Position {
        Position {
            ticker: ticker.to_string(),
            quantity: 5.0,
            avg_entry_price: 10.0,
            market_value: Some(60.0),
            current_price: Some(12.0),
            unrealized_plpc: Some(0.2),
        }
    }

    fn orchestrator(
        broker: FakeBroker,
        reasoning: Arc<FakeReasoning>,
        min_signal_score: u32,
    ) -> DecisionOrchestrator {
        DecisionOrchestrator::new(
            Arc::new(broker),
            Arc::new(MemoryStore::default()),
            reasoning,
            OrchestratorConfig {
                default_buy_notional: 1000.0,
                min_signal_score,
            },
        )
    }

    #[tokio::test]
    async fn end_to_end_guards_and_links() {
        let reply = json!([
            {"action": "BUY", "ticker": "acme", "reasoning": "CEO buying"},
            {"action": "BUY", "ticker": "OWN", "reasoning": "more"},
            {"action": "SELL", "ticker": "OWN", "reasoning": "thesis played out"},
            {"action": "HOLD", "ticker": "ZED"}
        ])
        .to_string();
        let reasoning = Arc::new(FakeReasoning::replying(format!("```json\n{reply}\n```")));
        let broker = FakeBroker::default().with_buying_power(5000.0).with_position(held("OWN"));
        let orch = orchestrator(broker, reasoning.clone(), 0);

        let run = orch.decide(&[signal(11, "ACME", 80)], now()).await.unwrap();
        assert_eq!(run.decisions.len(), 4);

        let accepted = &run.outcome.accepted;
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].ticker, "ACME");
        assert_eq!(accepted[0].action, Action::Buy);
        assert_eq!(accepted[0].signal_id, Some(11));
        assert_eq!(accepted[1].ticker, "OWN");
        assert_eq!(accepted[1].action, Action::Sell);
        assert_eq!(accepted[1].notional, 60.0);
        assert_eq!(accepted[1].signal_id, None);

        let input = reasoning.last_input().unwrap();
        assert!(input.portfolio_context.contains("OWN: 5 shares"));
        assert!(input.signals_context.contains("ACME score 80"));
    }

    #[tokio::test]
    async fn lookups_degrade_independently() {
        let reasoning = Arc::new(FakeReasoning::replying("[]"));
        let broker = FakeBroker::default()
            .with_buying_power(700.0)
            .failing_positions();
        let orch = orchestrator(broker, reasoning, 0);

        let snapshot = orch.snapshot().await;
        assert!(snapshot.positions.is_empty());
        assert_eq!(snapshot.buying_power, 700.0);
    }

    #[tokio::test]
    async fn malformed_reply_fails_the_run() {
        let reasoning = Arc::new(FakeReasoning::replying("I think ACME looks good."));
        let orch = orchestrator(FakeBroker::default(), reasoning, 0);
        assert!(orch.decide(&[signal(1, "ACME", 80)], now()).await.is_err());
    }

    #[tokio::test]
    async fn reasoning_failure_fails_the_run() {
        let reasoning = Arc::new(FakeReasoning::failing());
        let orch = orchestrator(FakeBroker::default(), reasoning, 0);
        assert!(orch.decide(&[signal(1, "ACME", 80)], now()).await.is_err());
    }

    #[tokio::test]
    async fn nothing_to_decide_skips_the_call() {
        let reasoning = Arc::new(FakeReasoning::replying("[]"));
        let orch = orchestrator(FakeBroker::default(), reasoning.clone(), 50);

        let run = orch.decide(&[signal(1, "ACME", 30)], now()).await.unwrap();
        assert!(run.outcome.accepted.is_empty());
        assert!(reasoning.last_input().is_none());
    }
}
