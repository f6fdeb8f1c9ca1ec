use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction kinds recognized by ingestion. Filings report more codes than
/// these; anything else is dropped at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Sale,
    Award,
    Disposition,
}

impl TransactionKind {
    /// Maps a form 4 transaction code (`P`, `S`, `A`, `D`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "P" => Some(Self::Purchase),
            "S" => Some(Self::Sale),
            "A" => Some(Self::Award),
            "D" => Some(Self::Disposition),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Sale => "sale",
            Self::Award => "award",
            Self::Disposition => "disposition",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub ticker: String,
    pub insider_name: String,
    pub insider_role: String,
    pub transaction_date: NaiveDate,
    pub kind: TransactionKind,
    pub shares: f64,
    pub price_per_share: f64,
    pub value: f64,
    /// Accession number of the filing this record was extracted from.
    pub accession_number: Option<String>,
}

impl TransactionRecord {
    pub fn new(
        ticker: impl Into<String>,
        insider_name: impl Into<String>,
        insider_role: impl Into<String>,
        transaction_date: NaiveDate,
        kind: TransactionKind,
        shares: f64,
        price_per_share: f64,
    ) -> Self {
        Self {
            ticker: ticker.into().trim().to_ascii_uppercase(),
            insider_name: insider_name.into().trim().to_string(),
            insider_role: insider_role.into().trim().to_string(),
            transaction_date,
            kind,
            shares,
            price_per_share,
            value: shares * price_per_share,
            accession_number: None,
        }
    }

    pub fn with_accession_number(mut self, accession_number: impl Into<String>) -> Self {
        self.accession_number = Some(accession_number.into());
        self
    }

    pub fn is_purchase(&self) -> bool {
        self.kind == TransactionKind::Purchase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes_only() {
        assert_eq!(TransactionKind::from_code("p"), Some(TransactionKind::Purchase));
        assert_eq!(TransactionKind::from_code(" S "), Some(TransactionKind::Sale));
        assert_eq!(TransactionKind::from_code("A"), Some(TransactionKind::Award));
        assert_eq!(TransactionKind::from_code("D"), Some(TransactionKind::Disposition));
        assert_eq!(TransactionKind::from_code("M"), None);
        assert_eq!(TransactionKind::from_code("G"), None);
    }

    #[test]
    fn new_computes_value_and_normalizes_ticker() {
        let d = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        let r = TransactionRecord::new(" acme ", "Jane Doe", "CEO", d, TransactionKind::Purchase, 100.0, 12.5);
        assert_eq!(r.ticker, "ACME");
        assert_eq!(r.value, 1250.0);
        assert!(r.is_purchase());
    }
}
