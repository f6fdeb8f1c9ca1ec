//! In-memory collaborators for unit tests.

use crate::broker::{Brokerage, OrderConfirmation, OrderRequest, Position};
use crate::decision::{PositionThesis, ThesisStore};
use crate::domain::decision::Action;
use crate::domain::recommendation::{Recommendation, RecommendationStatus};
use crate::domain::signal::ScoredSignal;
use crate::domain::transaction::TransactionRecord;
use crate::ingest::provider::FilingSource;
use crate::ingest::types::{DocumentLocation, FilingRef};
use crate::lifecycle::RecommendationStore;
use crate::llm::{DecisionInput, Provider, ReasoningClient};
use crate::notify::{DeliveryReceipt, Notifier, OutboundMessage};
use crate::pipeline::SignalStore;
use crate::schedule::{ScheduleHandle, ScheduleSpec, ScheduledJob, Scheduler};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Minimal form 4 with one owner and one non-derivative transaction of
/// 1,000 shares at $10. A role of "Director" sets the director flag; anything
/// else is used as the officer title.
pub fn form4_xml(ticker: &str, insider: &str, role: &str, date: &str, code: &str) -> String {
    let relationship = if role == "Director" {
        "<isDirector>1</isDirector>".to_string()
    } else {
        format!("<isOfficer>1</isOfficer><officerTitle>{role}</officerTitle>")
    };
    format!(
        r#"<?xml version="1.0"?>
<ownershipDocument>
  <issuer><issuerTradingSymbol>{ticker}</issuerTradingSymbol></issuer>
  <reportingOwner>
    <reportingOwnerId><rptOwnerName>{insider}</rptOwnerName></reportingOwnerId>
    <reportingOwnerRelationship>{relationship}</reportingOwnerRelationship>
  </reportingOwner>
  <nonDerivativeTable>
    <nonDerivativeTransaction>
      <transactionDate><value>{date}</value></transactionDate>
      <transactionCoding><transactionCode>{code}</transactionCode></transactionCoding>
      <transactionAmounts>
        <transactionShares><value>1,000</value></transactionShares>
        <transactionPricePerShare><value>10.00</value></transactionPricePerShare>
      </transactionAmounts>
    </nonDerivativeTransaction>
  </nonDerivativeTable>
</ownershipDocument>"#
    )
}

struct FakeFiling {
    lookback_days: u32,
    filing: FilingRef,
    xml: Option<String>,
}

#[derive(Default)]
pub struct FakeFilingSource {
    filings: Vec<FakeFiling>,
    fail_query: bool,
    fetch_delay_ms: u64,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    queries: Mutex<Vec<u32>>,
}

impl FakeFilingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// The filing is returned by every query whose lookback reaches `lookback_days`.
    pub fn with_filing(mut self, lookback_days: u32, accession: &str, xml: String) -> Self {
        self.filings.push(FakeFiling {
            lookback_days,
            filing: filing_ref(accession),
            xml: Some(xml),
        });
        self
    }

    pub fn with_unresolvable(mut self, lookback_days: u32, accession: &str) -> Self {
        self.filings.push(FakeFiling {
            lookback_days,
            filing: filing_ref(accession),
            xml: None,
        });
        self
    }

    pub fn failing_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    pub fn with_fetch_delay_ms(mut self, ms: u64) -> Self {
        self.fetch_delay_ms = ms;
        self
    }

    pub fn queries(&self) -> Vec<u32> {
        self.queries.lock().unwrap().clone()
    }
}

fn filing_ref(accession: &str) -> FilingRef {
    FilingRef {
        accession_number: accession.to_string(),
        ciks: vec!["0000000001".to_string()],
        file_name: None,
        filed_on: None,
    }
}

#[async_trait::async_trait]
impl FilingSource for FakeFilingSource {
    fn source_name(&self) -> &'static str {
        "fake"
    }

    async fn query(&self, lookback_days: u32) -> Result<Vec<FilingRef>> {
        self.queries.lock().unwrap().push(lookback_days);
        if self.fail_query {
            bail!("search endpoint returned HTTP 503");
        }
        Ok(self
            .filings
            .iter()
            .filter(|f| f.lookback_days <= lookback_days)
            .map(|f| f.filing.clone())
            .collect())
    }

    async fn resolve(&self, filing: &FilingRef) -> Result<DocumentLocation> {
        let known = self
            .filings
            .iter()
            .find(|f| f.filing.accession_number == filing.accession_number)
            .context("unknown filing")?;
        if known.xml.is_none() {
            bail!("no primary document for {}", filing.accession_number);
        }
        Ok(DocumentLocation {
            url: filing.accession_number.clone(),
        })
    }

    async fn fetch(&self, location: &DocumentLocation) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.fetch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.fetch_delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.filings
            .iter()
            .find(|f| f.filing.accession_number == location.url)
            .and_then(|f| f.xml.clone())
            .context("document not found")
    }
}

#[derive(Default)]
pub struct FakeScheduler {
    jobs: Mutex<Vec<ScheduledJob>>,
    fail: bool,
}

impl FakeScheduler {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl Scheduler for FakeScheduler {
    async fn schedule(
        &self,
        spec: ScheduleSpec,
        callback: &str,
        payload: serde_json::Value,
    ) -> Result<ScheduleHandle> {
        if self.fail {
            bail!("schedule table unavailable");
        }
        let handle = ScheduleHandle(Uuid::new_v4());
        let run_at = spec.first_run(Utc::now())?;
        self.jobs.lock().unwrap().push(ScheduledJob {
            handle,
            callback: callback.to_string(),
            payload,
            run_at,
            cron: spec.cron_expression().map(str::to_string),
        });
        Ok(handle)
    }

    async fn cancel(&self, handle: ScheduleHandle) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.handle != handle);
        Ok(jobs.len() != before)
    }

    async fn list_active(&self) -> Result<Vec<ScheduledJob>> {
        Ok(self.jobs.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<OutboundMessage>>,
    fail_after: Option<usize>,
}

impl FakeNotifier {
    /// Deliveries beyond the first `n` fail.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for FakeNotifier {
    fn channel_name(&self) -> &'static str {
        "fake"
    }

    fn default_recipient(&self) -> &str {
        "test-chat"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let mut sent = self.sent.lock().unwrap();
        if self.fail_after.is_some_and(|n| sent.len() >= n) {
            bail!("chat channel unavailable");
        }
        sent.push(message.clone());
        Ok(DeliveryReceipt {
            message_id: sent.len().to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakeBroker {
    positions: Vec<Position>,
    buying_power: f64,
    prices: HashMap<String, f64>,
    fail_positions: bool,
    fail_orders: bool,
    orders: Mutex<Vec<OrderRequest>>,
}

impl FakeBroker {
    pub fn with_buying_power(mut self, amount: f64) -> Self {
        self.buying_power = amount;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.push(position);
        self
    }

    pub fn with_price(mut self, ticker: &str, price: f64) -> Self {
        self.prices.insert(ticker.to_string(), price);
        self
    }

    pub fn failing_positions(mut self) -> Self {
        self.fail_positions = true;
        self
    }

    pub fn failing_orders(mut self) -> Self {
        self.fail_orders = true;
        self
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Brokerage for FakeBroker {
    fn broker_name(&self) -> &'static str {
        "fake"
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        if self.fail_positions {
            bail!("positions endpoint timed out");
        }
        Ok(self.positions.clone())
    }

    async fn buying_power(&self) -> Result<f64> {
        Ok(self.buying_power)
    }

    async fn latest_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>> {
        Ok(tickers
            .iter()
            .filter_map(|t| self.prices.get(t).map(|p| (t.clone(), *p)))
            .collect())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderConfirmation> {
        if self.fail_orders {
            bail!("insufficient buying power");
        }
        let mut orders = self.orders.lock().unwrap();
        orders.push(order.clone());
        Ok(OrderConfirmation {
            order_id: format!("order-{}", orders.len()),
            status: "accepted".to_string(),
        })
    }
}

pub struct FakeReasoning {
    reply: Option<String>,
    last_input: Mutex<Option<DecisionInput>>,
}

impl FakeReasoning {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            last_input: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            last_input: Mutex::new(None),
        }
    }

    pub fn last_input(&self) -> Option<DecisionInput> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReasoningClient for FakeReasoning {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn invoke(&self, input: &DecisionInput) -> Result<String> {
        *self.last_input.lock().unwrap() = Some(input.clone());
        self.reply.clone().context("reasoning service unavailable")
    }
}

/// Every store trait over one set of maps. Each method holds the lock for
/// its whole body, which makes the conditional updates atomic.
#[derive(Default)]
pub struct MemoryStore {
    recommendations: Mutex<HashMap<Uuid, Recommendation>>,
    transactions: Mutex<Vec<TransactionRecord>>,
    signals: Mutex<Vec<ScoredSignal>>,
}

impl MemoryStore {
    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl RecommendationStore for MemoryStore {
    async fn insert_recommendation(&self, rec: &Recommendation) -> Result<()> {
        let mut recs = self.recommendations.lock().unwrap();
        if recs.contains_key(&rec.id) {
            bail!("duplicate recommendation id {}", rec.id);
        }
        recs.insert(rec.id, rec.clone());
        Ok(())
    }

    async fn get_recommendation(&self, id: Uuid) -> Result<Option<Recommendation>> {
        Ok(self.recommendations.lock().unwrap().get(&id).cloned())
    }

    async fn list_recommendations(
        &self,
        status: Option<RecommendationStatus>,
        limit: i64,
    ) -> Result<Vec<Recommendation>> {
        let recs = self.recommendations.lock().unwrap();
        let mut out: Vec<Recommendation> = recs
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Recommendation>> {
        Ok(self
            .recommendations
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status.is_pending() && r.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn resolve_if_pending(
        &self,
        id: Uuid,
        to: RecommendationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut recs = self.recommendations.lock().unwrap();
        match recs.get_mut(&id) {
            Some(rec) if rec.status.is_pending() => {
                rec.status = to;
                rec.resolved_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_expiry_schedule(&self, id: Uuid, handle: ScheduleHandle) -> Result<()> {
        let mut recs = self.recommendations.lock().unwrap();
        let rec = recs.get_mut(&id).context("recommendation not found")?;
        rec.expiry_schedule_id = Some(handle.0);
        Ok(())
    }

    async fn mark_executed(&self, id: Uuid, order_id: &str, _at: DateTime<Utc>) -> Result<bool> {
        let mut recs = self.recommendations.lock().unwrap();
        match recs.get_mut(&id) {
            Some(rec) if rec.status == RecommendationStatus::Approved => {
                rec.status = RecommendationStatus::Executed;
                rec.order_id = Some(order_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_order_failure(&self, id: Uuid, error: &str) -> Result<()> {
        let mut recs = self.recommendations.lock().unwrap();
        let rec = recs.get_mut(&id).context("recommendation not found")?;
        rec.order_error = Some(error.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ThesisStore for MemoryStore {
    async fn open_position_theses(&self) -> Result<Vec<PositionThesis>> {
        let recs = self.recommendations.lock().unwrap();
        let signals = self.signals.lock().unwrap();
        let mut latest: HashMap<String, PositionThesis> = HashMap::new();
        for rec in recs
            .values()
            .filter(|r| r.action == Action::Buy && r.status == RecommendationStatus::Executed)
        {
            let executed_at = rec.resolved_at.unwrap_or(rec.created_at);
            if latest
                .get(&rec.ticker)
                .is_some_and(|t| t.executed_at >= executed_at)
            {
                continue;
            }
            let insider_name = rec
                .signal_id
                .and_then(|id| signals.iter().find(|s| s.id == Some(id)))
                .map(|s| s.record.insider_name.clone());
            latest.insert(
                rec.ticker.clone(),
                PositionThesis {
                    ticker: rec.ticker.clone(),
                    rationale: rec.rationale.clone(),
                    insider_name,
                    executed_at,
                },
            );
        }
        Ok(latest.into_values().collect())
    }
}

#[async_trait::async_trait]
impl SignalStore for MemoryStore {
    async fn append_transactions(&self, records: &[TransactionRecord]) -> Result<u64> {
        self.transactions
            .lock()
            .unwrap()
            .extend(records.iter().cloned());
        Ok(records.len() as u64)
    }

    async fn append_signals(&self, signals: Vec<ScoredSignal>) -> Result<Vec<ScoredSignal>> {
        let mut stored = self.signals.lock().unwrap();
        let mut out = Vec::with_capacity(signals.len());
        for mut s in signals {
            s.id = Some(stored.len() as i64 + 1);
            stored.push(s.clone());
            out.push(s);
        }
        Ok(out)
    }
}
