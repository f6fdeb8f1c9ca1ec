//! Deterministic multi-factor scoring of purchase records.
//!
//! Cluster detection is relative to the batch being scored; no history is
//! consulted.

pub mod role;

use crate::domain::signal::{ScoreBreakdown, ScoredSignal};
use crate::domain::transaction::TransactionRecord;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

pub use role::{classify_role, RoleTier};

pub const DEFAULT_TOP_N: usize = 10;
pub const CLUSTER_WINDOW_DAYS: i64 = 5;
pub const CLUSTER_BONUS: u32 = 20;

/// Scores `records` as of `today` (UTC calendar date) and returns at most
/// `limit` signals, highest first. Ties keep input order.
pub fn score_batch(records: &[TransactionRecord], today: NaiveDate, limit: usize) -> Vec<ScoredSignal> {
    let purchases: Vec<&TransactionRecord> = records.iter().filter(|r| r.is_purchase()).collect();
    if purchases.is_empty() {
        return Vec::new();
    }

    let clustered = cluster_flags(&purchases);

    let mut scored: Vec<ScoredSignal> = purchases
        .iter()
        .zip(clustered)
        .map(|(record, in_cluster)| {
            let breakdown = ScoreBreakdown::new(
                classify_role(&record.insider_role).points(),
                value_points(record.value),
                if in_cluster { CLUSTER_BONUS } else { 0 },
                recency_points(record.transaction_date, today),
            );
            ScoredSignal {
                id: None,
                record: (*record).clone(),
                score: breakdown.total(),
                breakdown,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(limit);
    scored
}

pub fn value_points(value: f64) -> u32 {
    if value > 1_000_000.0 {
        20
    } else if value > 100_000.0 {
        10
    } else if value > 10_000.0 {
        5
    } else {
        0
    }
}

pub fn recency_points(date: NaiveDate, today: NaiveDate) -> u32 {
    if date == today {
        20
    } else if date == today - Duration::days(1) {
        10
    } else {
        0
    }
}

/// For each record, whether it pairs with a different insider's purchase of
/// the same ticker within the cluster window. The bonus is flat, not per pair.
fn cluster_flags(purchases: &[&TransactionRecord]) -> Vec<bool> {
    let mut by_ticker: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, r) in purchases.iter().enumerate() {
        by_ticker.entry(r.ticker.as_str()).or_default().push(idx);
    }

    let mut flags = vec![false; purchases.len()];
    for members in by_ticker.values() {
        for (pos, &i) in members.iter().enumerate() {
            for &j in &members[pos + 1..] {
                let (a, b) = (purchases[i], purchases[j]);
                if same_insider(&a.insider_name, &b.insider_name) {
                    continue;
                }
                let gap = (a.transaction_date - b.transaction_date).num_days().abs();
                if gap <= CLUSTER_WINDOW_DAYS {
                    flags[i] = true;
                    flags[j] = true;
                }
            }
        }
    }
    flags
}

fn same_insider(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionKind;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 27).unwrap()
    }

    fn rec(ticker: &str, insider: &str, role: &str, days_ago: i64, value: f64, kind: TransactionKind) -> TransactionRecord {
        TransactionRecord::new(
            ticker,
            insider,
            role,
            today() - Duration::days(days_ago),
            kind,
            1.0,
            value,
        )
    }

    fn buy(ticker: &str, insider: &str, role: &str, days_ago: i64, value: f64) -> TransactionRecord {
        rec(ticker, insider, role, days_ago, value, TransactionKind::Purchase)
    }

    #[test]
    fn worked_example_scores() {
        let records = vec![
            buy("CEOCO", "Alice Ceo", "Chief Executive Officer", 0, 1_500_000.0),
            buy("DIRCO", "Bob Director", "Director", 1, 150_000.0),
            buy("DIRCO", "Carol Director", "Director", 0, 50_000.0),
            rec("AWRD", "Dan Exec", "CEO", 0, 5_000_000.0, TransactionKind::Award),
        ];

        let out = score_batch(&records, today(), DEFAULT_TOP_N);
        assert_eq!(out.len(), 3);

        let scores: Vec<(&str, &str, u32)> = out
            .iter()
            .map(|s| (s.ticker(), s.record.insider_name.as_str(), s.score))
            .collect();
        assert_eq!(
            scores,
            vec![
                ("CEOCO", "Alice Ceo", 80),
                ("DIRCO", "Carol Director", 70),
                ("DIRCO", "Bob Director", 65),
            ]
        );

        let ceo = &out[0].breakdown;
        assert_eq!((ceo.role, ceo.value, ceo.cluster, ceo.recency), (40, 20, 0, 20));
        let bob = &out[2].breakdown;
        assert_eq!((bob.role, bob.value, bob.cluster, bob.recency), (25, 10, 20, 10));
        assert!(out.iter().all(|s| s.ticker() != "AWRD"));
    }

    #[test]
    fn non_purchases_never_scored() {
        let records = vec![
            rec("A", "X", "CEO", 0, 9_000_000.0, TransactionKind::Sale),
            rec("A", "Y", "CEO", 0, 9_000_000.0, TransactionKind::Award),
            rec("A", "Z", "CEO", 0, 9_000_000.0, TransactionKind::Disposition),
        ];
        assert!(score_batch(&records, today(), 10).is_empty());
        assert!(score_batch(&[], today(), 10).is_empty());
    }

    #[test]
    fn solitary_purchase_gets_no_cluster_bonus() {
        let out = score_batch(&[buy("SOLO", "Only One", "Director", 0, 20_000.0)], today(), 10);
        assert_eq!(out[0].breakdown.cluster, 0);
    }

    #[test]
    fn same_insider_does_not_form_a_cluster() {
        let records = vec![
            buy("SAME", "Jane Roe", "Director", 0, 20_000.0),
            buy("SAME", "jane roe ", "Director", 1, 20_000.0),
        ];
        let out = score_batch(&records, today(), 10);
        assert!(out.iter().all(|s| s.breakdown.cluster == 0));
    }

    #[test]
    fn cluster_window_is_five_days_inclusive() {
        let within = vec![
            buy("WIN", "A", "Director", 0, 0.0),
            buy("WIN", "B", "Director", 5, 0.0),
        ];
        assert!(score_batch(&within, today(), 10).iter().all(|s| s.breakdown.cluster == 20));

        let outside = vec![
            buy("OUT", "A", "Director", 0, 0.0),
            buy("OUT", "B", "Director", 6, 0.0),
        ];
        assert!(score_batch(&outside, today(), 10).iter().all(|s| s.breakdown.cluster == 0));
    }

    #[test]
    fn cluster_bonus_is_flat_across_multiple_pairs() {
        let records = vec![
            buy("MANY", "A", "Director", 0, 0.0),
            buy("MANY", "B", "Director", 0, 0.0),
            buy("MANY", "C", "Director", 0, 0.0),
        ];
        let out = score_batch(&records, today(), 10);
        assert!(out.iter().all(|s| s.breakdown.cluster == CLUSTER_BONUS));
    }

    #[test]
    fn output_is_sorted_bounded_and_in_range() {
        let mut records = Vec::new();
        for i in 0..25 {
            records.push(buy(
                &format!("T{}", i % 7),
                &format!("Insider {i}"),
                ["CEO", "Director", "Vice President", "Consultant"][i % 4],
                (i % 4) as i64,
                (i as f64) * 90_000.0,
            ));
        }
        let out = score_batch(&records, today(), DEFAULT_TOP_N);
        assert_eq!(out.len(), DEFAULT_TOP_N);
        assert!(out.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(out.iter().all(|s| s.score <= 100));
    }

    #[test]
    fn ties_keep_input_order_and_output_is_deterministic() {
        let records = vec![
            buy("A", "First", "Director", 3, 0.0),
            buy("B", "Second", "Director", 3, 0.0),
            buy("C", "Third", "Director", 3, 0.0),
        ];
        let a = score_batch(&records, today(), 10);
        let b = score_batch(&records, today(), 10);
        assert_eq!(a, b);
        let names: Vec<&str> = a.iter().map(|s| s.record.insider_name.as_str()).collect();
        assert_eq!(names, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn value_thresholds_are_strict() {
        assert_eq!(value_points(1_000_000.0), 10);
        assert_eq!(value_points(1_000_000.01), 20);
        assert_eq!(value_points(100_000.0), 5);
        assert_eq!(value_points(10_000.0), 0);
        assert_eq!(value_points(10_001.0), 5);
    }

    #[test]
    fn recency_only_counts_today_and_yesterday() {
        let t = today();
        assert_eq!(recency_points(t, t), 20);
        assert_eq!(recency_points(t - Duration::days(1), t), 10);
        assert_eq!(recency_points(t - Duration::days(2), t), 0);
    }
}
