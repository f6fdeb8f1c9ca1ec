use crate::domain::transaction::TransactionRecord;
use serde::{Deserialize, Serialize};

pub const MAX_SCORE: u32 = 100;

/// Points contributed by each scoring factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub role: u32,
    pub value: u32,
    pub cluster: u32,
    pub recency: u32,
    /// Sum of the factors before the cap.
    pub raw_total: u32,
    pub capped: bool,
}

impl ScoreBreakdown {
    pub fn new(role: u32, value: u32, cluster: u32, recency: u32) -> Self {
        let raw_total = role + value + cluster + recency;
        Self {
            role,
            value,
            cluster,
            recency,
            raw_total,
            capped: raw_total > MAX_SCORE,
        }
    }

    pub fn total(&self) -> u32 {
        self.raw_total.min(MAX_SCORE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSignal {
    /// Assigned by storage once the signal is persisted.
    pub id: Option<i64>,
    pub record: TransactionRecord,
    pub score: u32,
    pub breakdown: ScoreBreakdown,
}

impl ScoredSignal {
    pub fn ticker(&self) -> &str {
        &self.record.ticker
    }
}
