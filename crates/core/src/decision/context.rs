//! Plain-text views of the portfolio and the scored signals, as handed to the
//! reasoning service.

use crate::decision::PortfolioSnapshot;
use crate::domain::signal::ScoredSignal;
use chrono::{DateTime, Utc};
use std::fmt::Write;

pub const SYSTEM_INSTRUCTIONS: &str = "\
You are a trading assistant that reviews insider-buying signals and an existing portfolio.
For every open position decide HOLD or SELL, re-checking it against its original thesis.
For every new signal decide BUY or HOLD. Never BUY a ticker that is already held.
Respond with ONLY a JSON array. Each element:
{\"action\": \"BUY\" | \"SELL\" | \"HOLD\", \"ticker\": \"XYZ\", \"reasoning\": \"one or two sentences\",
 \"notional\": number or null, \"quantity\": number or null, \"stop_loss\": number or null, \"take_profit\": number or null}
quantity applies to SELL only; BUYs are sized by notional.
Use null for anything you do not want to set. Provide both stop_loss and take_profit, or neither.
An empty array means no action.";

pub fn render_portfolio_context(snapshot: &PortfolioSnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Buying power: ${:.2}", snapshot.buying_power);
    if snapshot.positions.is_empty() {
        out.push_str("No open positions.\n");
        return out;
    }

    for p in &snapshot.positions {
        let live = p
            .current_price
            .map(|v| format!("${v:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        let pnl = p
            .unrealized_pct()
            .map(|v| format!("{v:+.1}%"))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = write!(
            out,
            "- {}: {} shares, entry ${:.2}, live {live}, P&L {pnl}",
            p.ticker, p.quantity, p.avg_entry_price
        );

        match snapshot.theses.get(&p.ticker) {
            Some(thesis) => {
                let days = (now - thesis.executed_at).num_days().max(0);
                let _ = write!(out, ", held {days}d");
                if let Some(insider) = &thesis.insider_name {
                    let _ = write!(out, ", insider {insider}");
                }
                let _ = writeln!(out, "\n  thesis: {}", one_line(&thesis.rationale));
            }
            None => {
                let _ = writeln!(out, "\n  thesis: unknown");
            }
        }
    }
    out
}

pub fn render_signals_context(signals: &[ScoredSignal]) -> String {
    if signals.is_empty() {
        return "No new signals.\n".to_string();
    }

    let mut out = String::new();
    for s in signals {
        let r = &s.record;
        let b = &s.breakdown;
        let _ = writeln!(
            out,
            "- {} score {}: {} ({}) bought ${:.0} on {} [role {}, value {}, cluster {}, recency {}{}]",
            r.ticker,
            s.score,
            r.insider_name,
            r.insider_role,
            r.value,
            r.transaction_date,
            b.role,
            b.value,
            b.cluster,
            b.recency,
            if b.capped { ", capped" } else { "" }
        );
    }
    out
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
