//! Filing ingestion: search, resolve, fetch and parse with bounded fan-out.

pub mod form4;
pub mod provider;
pub mod types;

use crate::domain::transaction::TransactionRecord;
use crate::ingest::provider::FilingSource;
use crate::ingest::types::FilingRef;
use anyhow::Result;
use futures_util::stream::{self, StreamExt};

pub const PRIMARY_LOOKBACK_DAYS: u32 = 1;
pub const FALLBACK_LOOKBACK_DAYS: u32 = 3;

#[derive(Debug, Clone)]
pub struct IngestBatch {
    pub lookback_days: u32,
    pub filings: usize,
    pub records: Vec<TransactionRecord>,
}

impl IngestBatch {
    pub fn purchase_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_purchase()).count()
    }
}

/// All transaction records filed within `lookback_days`.
///
/// The search itself failing is fatal. A filing whose resolve, fetch or parse
/// fails contributes nothing and the rest of the batch carries on. Output keeps
/// search order so scoring ties stay deterministic.
pub async fn ingest_filings(
    source: &dyn FilingSource,
    lookback_days: u32,
    concurrency: usize,
) -> Result<IngestBatch> {
    let filings = source.query(lookback_days).await?;
    let filing_count = filings.len();

    let per_filing: Vec<Vec<TransactionRecord>> = stream::iter(filings)
        .map(|filing| async move {
            match fetch_filing_records(source, &filing).await {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(
                        accession = %filing.accession_number,
                        error = %err,
                        "filing fetch/parse failed; skipping"
                    );
                    Vec::new()
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let records: Vec<TransactionRecord> = per_filing.into_iter().flatten().collect();
    tracing::info!(
        source = source.source_name(),
        lookback_days,
        filings = filing_count,
        records = records.len(),
        "filing ingestion complete"
    );

    Ok(IngestBatch {
        lookback_days,
        filings: filing_count,
        records,
    })
}

/// Queries the primary window and widens once when it yields no purchases.
pub async fn ingest_with_fallback(
    source: &dyn FilingSource,
    concurrency: usize,
) -> Result<IngestBatch> {
    let batch = ingest_filings(source, PRIMARY_LOOKBACK_DAYS, concurrency).await?;
    if batch.purchase_count() > 0 {
        return Ok(batch);
    }

    tracing::info!(
        from = PRIMARY_LOOKBACK_DAYS,
        to = FALLBACK_LOOKBACK_DAYS,
        "no purchases in primary window; widening lookback"
    );
    ingest_filings(source, FALLBACK_LOOKBACK_DAYS, concurrency).await
}

async fn fetch_filing_records(
    source: &dyn FilingSource,
    filing: &FilingRef,
) -> Result<Vec<TransactionRecord>> {
    let location = source.resolve(filing).await?;
    let xml = source.fetch(&location).await?;
    form4::parse_form4(&xml, Some(&filing.accession_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{form4_xml, FakeFilingSource};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn malformed_documents_are_skipped_not_fatal() {
        let source = FakeFilingSource::new()
            .with_filing(1, "ok-1", form4_xml("AAA", "Jane Roe", "Director", "2026-01-27", "P"))
            .with_filing(1, "broken", "<ownershipDocument><issuer>".to_string())
            .with_filing(1, "ok-2", form4_xml("BBB", "John Poe", "CFO", "2026-01-27", "S"))
            .with_unresolvable(1, "missing");

        let batch = ingest_filings(&source, 1, 2).await.unwrap();
        assert_eq!(batch.filings, 4);
        let tickers: Vec<&str> = batch.records.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAA", "BBB"]);
    }

    #[tokio::test]
    async fn query_failure_is_fatal() {
        let source = FakeFilingSource::new().failing_query();
        assert!(ingest_filings(&source, 1, 2).await.is_err());
    }

    #[tokio::test]
    async fn fan_out_never_exceeds_concurrency() {
        let mut source = FakeFilingSource::new().with_fetch_delay_ms(20);
        for i in 0..12 {
            source = source.with_filing(
                1,
                &format!("f-{i}"),
                form4_xml("AAA", &format!("Insider {i}"), "Director", "2026-01-27", "P"),
            );
        }

        let batch = ingest_filings(&source, 1, 3).await.unwrap();
        assert_eq!(batch.records.len(), 12);
        let peak = source.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight fetches was {peak}");
        assert!(peak >= 2);
    }

    #[tokio::test]
    async fn widens_lookback_when_primary_window_has_no_purchases() {
        let source = FakeFilingSource::new()
            .with_filing(1, "sale", form4_xml("AAA", "Jane Roe", "Director", "2026-01-27", "S"))
            .with_filing(3, "buy", form4_xml("BBB", "John Poe", "CEO", "2026-01-24", "P"));

        let batch = ingest_with_fallback(&source, 2).await.unwrap();
        assert_eq!(batch.lookback_days, FALLBACK_LOOKBACK_DAYS);
        assert_eq!(batch.purchase_count(), 1);
        assert_eq!(source.queries(), vec![1, 3]);
    }

    #[tokio::test]
    async fn keeps_primary_window_when_it_has_purchases() {
        let source = FakeFilingSource::new()
            .with_filing(1, "buy", form4_xml("AAA", "Jane Roe", "Director", "2026-01-27", "P"));

        let batch = ingest_with_fallback(&source, 2).await.unwrap();
        assert_eq!(batch.lookback_days, PRIMARY_LOOKBACK_DAYS);
        assert_eq!(source.queries(), vec![1]);
    }
}
