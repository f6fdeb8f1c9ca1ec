use crate::domain::decision::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Executed => "executed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            "executed" => Some(Self::Executed),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Forward-only transitions. PENDING resolves exactly once; APPROVED may
    /// additionally be marked EXECUTED.
    pub fn can_transition_to(&self, next: RecommendationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Expired)
                | (Self::Approved, Self::Executed)
        )
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creation request emitted by the decision orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecommendation {
    pub ticker: String,
    pub action: Action,
    pub rationale: String,
    pub signal_id: Option<i64>,
    pub notional: f64,
    pub quantity: Option<f64>,
    pub stop_price: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub ticker: String,
    pub action: Action,
    pub rationale: String,
    pub signal_id: Option<i64>,
    pub notional: f64,
    pub quantity: Option<f64>,
    pub stop_price: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub expiry_schedule_id: Option<Uuid>,
    pub order_id: Option<String>,
    pub order_error: Option<String>,
}

impl Recommendation {
    /// The id is random (v4) because it travels inside approval links.
    pub fn pending(req: NewRecommendation, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticker: req.ticker,
            action: req.action,
            rationale: req.rationale,
            signal_id: req.signal_id,
            notional: req.notional,
            quantity: req.quantity,
            stop_price: req.stop_price,
            take_profit: req.take_profit,
            status: RecommendationStatus::Pending,
            created_at,
            resolved_at: None,
            expiry_schedule_id: None,
            order_id: None,
            order_error: None,
        }
    }

    pub fn expires_at(&self, window: chrono::Duration) -> DateTime<Utc> {
        self.created_at + window
    }

    pub fn is_past_window(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now >= self.expires_at(window)
    }
}
