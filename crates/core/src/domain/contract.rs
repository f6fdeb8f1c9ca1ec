use crate::domain::decision::{Action, Decision};
use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

/// Decision exactly as the reasoning service emitted it. Nothing here is
/// trusted until `validate_and_into_decision` has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDecision {
    pub action: String,
    pub ticker: String,
    #[serde(default, alias = "rationale")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub notional: Option<f64>,
    #[serde(default, alias = "qty")]
    pub quantity: Option<f64>,
    #[serde(default, alias = "stop_price")]
    pub stop_loss: Option<f64>,
    #[serde(default, alias = "take_profit_price")]
    pub take_profit: Option<f64>,
}

pub fn validate_decisions(raw: Vec<LlmDecision>) -> anyhow::Result<Vec<Decision>> {
    let mut out = Vec::with_capacity(raw.len());
    for (idx, item) in raw.into_iter().enumerate() {
        let decision = item
            .validate_and_into_decision()
            .with_context(|| format!("invalid decision at index {idx}"))?;
        out.push(decision);
    }
    Ok(out)
}

impl LlmDecision {
    pub fn validate_and_into_decision(self) -> anyhow::Result<Decision> {
        let action = Action::parse(&self.action)
            .with_context(|| format!("action must be BUY, SELL or HOLD (got {:?})", self.action))?;

        let ticker = self.ticker.trim().to_ascii_uppercase();
        ensure!(!ticker.is_empty(), "ticker must be non-empty");

        for (name, value) in [
            ("notional", self.notional),
            ("quantity", self.quantity),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ] {
            if let Some(v) = value {
                ensure!(v.is_finite(), "{name} must be a finite number (got {v})");
            }
        }

        let rationale = self
            .reasoning
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        Ok(Decision {
            action,
            ticker,
            rationale,
            notional: positive(self.notional),
            quantity: positive(self.quantity),
            stop_price: positive(self.stop_loss),
            take_profit: positive(self.take_profit),
        })
    }
}

/// Zero and negative values mean "not provided".
fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|v| *v > 0.0)
}
