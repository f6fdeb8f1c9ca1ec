//! Rules that turn validated decisions into recommendation requests.
//!
//! Applied in order per decision. A rule that fails skips the decision; it
//! never fails the run. Buying power is tracked across the run so a batch of
//! BUYs cannot commit more than the account holds.

use crate::broker::Position;
use crate::domain::decision::{Action, Decision};
use crate::domain::recommendation::NewRecommendation;
use crate::domain::signal::ScoredSignal;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Hold,
    AlreadyHeld,
    NotHeld,
    DuplicateInRun,
    InsufficientBuyingPower { notional: f64, remaining: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hold => f.write_str("hold"),
            Self::AlreadyHeld => f.write_str("buy for a ticker already held"),
            Self::NotHeld => f.write_str("sell for a ticker not held"),
            Self::DuplicateInRun => f.write_str("ticker already accepted in this run"),
            Self::InsufficientBuyingPower {
                notional,
                remaining,
            } => write!(f, "notional ${notional:.2} exceeds remaining ${remaining:.2}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GuardOutcome {
    pub accepted: Vec<NewRecommendation>,
    pub skipped: Vec<(Decision, SkipReason)>,
    pub remaining_buying_power: f64,
}

pub fn apply_guards(
    decisions: Vec<Decision>,
    signals: &[ScoredSignal],
    positions: &[Position],
    buying_power: f64,
    default_buy_notional: f64,
) -> GuardOutcome {
    let held: HashMap<&str, &Position> = positions.iter().map(|p| (p.ticker.as_str(), p)).collect();

    // Signals arrive best-first, so the first id per ticker is the strongest.
    let mut signal_ids: HashMap<&str, i64> = HashMap::new();
    for s in signals {
        if let Some(id) = s.id {
            signal_ids.entry(s.ticker()).or_insert(id);
        }
    }

    let mut remaining = buying_power;
    let mut seen: HashSet<String> = HashSet::new();
    let mut outcome = GuardOutcome::default();

    for decision in decisions {
        let verdict = match decision.action {
            Action::Hold => Err(SkipReason::Hold),
            _ if seen.contains(&decision.ticker) => Err(SkipReason::DuplicateInRun),
            Action::Buy => {
                if held.contains_key(decision.ticker.as_str()) {
                    Err(SkipReason::AlreadyHeld)
                } else {
                    let notional = decision.notional.unwrap_or(default_buy_notional);
                    if notional > remaining {
                        Err(SkipReason::InsufficientBuyingPower { notional, remaining })
                    } else {
                        remaining -= notional;
                        // BUYs are sized by the guarded notional only; a share
                        // count would bypass the buying-power check.
                        if let Some(qty) = decision.quantity {
                            tracing::info!(ticker = %decision.ticker, qty, notional, "buy quantity dropped; sizing by notional");
                        }
                        Ok((notional, None))
                    }
                }
            }
            Action::Sell => match held.get(decision.ticker.as_str()) {
                None => Err(SkipReason::NotHeld),
                Some(position) => {
                    // Without an explicit size the whole position is closed;
                    // never sell more than is held.
                    let quantity = match decision.quantity {
                        Some(q) if q < position.quantity => q,
                        Some(q) => {
                            if q > position.quantity {
                                tracing::info!(ticker = %decision.ticker, requested = q, held = position.quantity, "sell quantity capped at position");
                            }
                            position.quantity
                        }
                        None => position.quantity,
                    };
                    Ok((position.liquidation_value(), Some(quantity)))
                }
            },
        };

        match verdict {
            Ok((notional, quantity)) => {
                seen.insert(decision.ticker.clone());
                outcome.accepted.push(NewRecommendation {
                    signal_id: signal_ids.get(decision.ticker.as_str()).copied(),
                    ticker: decision.ticker,
                    action: decision.action,
                    rationale: decision.rationale,
                    notional,
                    quantity,
                    stop_price: decision.stop_price,
                    take_profit: decision.take_profit,
                });
            }
            Err(reason) => {
                tracing::info!(
                    ticker = %decision.ticker,
                    action = %decision.action,
                    reason = %reason,
                    "decision skipped"
                );
                outcome.skipped.push((decision, reason));
            }
        }
    }

    outcome.remaining_buying_power = remaining;
    outcome
}
