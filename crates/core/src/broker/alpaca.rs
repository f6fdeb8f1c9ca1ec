use crate::broker::{Brokerage, OrderConfirmation, OrderRequest, OrderSize, Position};
use crate::config::Settings;
use crate::domain::decision::Action;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://paper-api.alpaca.markets";
const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";
const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct AlpacaClient {
    http: reqwest::Client,
    base_url: String,
    data_url: String,
    key_id: String,
    secret_key: String,
}

impl AlpacaClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let (key_id, secret_key) = settings.require_alpaca_credentials()?;
        let base_url =
            std::env::var("ALPACA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let data_url =
            std::env::var("ALPACA_DATA_URL").unwrap_or_else(|_| DEFAULT_DATA_URL.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build Alpaca http client")?;

        Ok(Self {
            http,
            base_url,
            data_url,
            key_id: key_id.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("APCA-API-KEY-ID", HeaderValue::from_str(&self.key_id)?);
        headers.insert("APCA-API-SECRET-KEY", HeaderValue::from_str(&self.secret_key)?);
        Ok(headers)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        res: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read Alpaca {what} response"))?;
        if !status.is_success() {
            anyhow::bail!("Alpaca {what} HTTP {status}: {text}");
        }
        serde_json::from_str::<T>(&text)
            .with_context(|| format!("unexpected Alpaca {what} response: {text}"))
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), path)
    }
}

#[async_trait::async_trait]
impl Brokerage for AlpacaClient {
    fn broker_name(&self) -> &'static str {
        "alpaca"
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        let res = self
            .http
            .get(Self::url(&self.base_url, "/v2/positions"))
            .headers(self.headers()?)
            .send()
            .await
            .context("Alpaca positions request failed")?;
        let raw: Vec<AlpacaPosition> = Self::read_json(res, "positions").await?;
        raw.into_iter().map(AlpacaPosition::into_position).collect()
    }

    async fn buying_power(&self) -> Result<f64> {
        let res = self
            .http
            .get(Self::url(&self.base_url, "/v2/account"))
            .headers(self.headers()?)
            .send()
            .await
            .context("Alpaca account request failed")?;
        let account: AlpacaAccount = Self::read_json(res, "account").await?;
        parse_decimal(&account.buying_power, "buying_power")
    }

    async fn latest_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }
        let res = self
            .http
            .get(Self::url(&self.data_url, "/v2/stocks/trades/latest"))
            .headers(self.headers()?)
            .query(&[("symbols", tickers.join(","))])
            .send()
            .await
            .context("Alpaca latest trades request failed")?;
        let latest: LatestTrades = Self::read_json(res, "latest trades").await?;
        Ok(latest
            .trades
            .into_iter()
            .map(|(symbol, trade)| (symbol, trade.p))
            .collect())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderConfirmation> {
        let body = AlpacaOrder::from_request(order)?;
        let res = self
            .http
            .post(Self::url(&self.base_url, "/v2/orders"))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .context("Alpaca order request failed")?;
        let placed: AlpacaOrderResponse = Self::read_json(res, "order").await?;

        tracing::info!(
            ticker = %order.ticker,
            side = %order.side,
            order_id = %placed.id,
            status = %placed.status,
            "order submitted"
        );
        Ok(OrderConfirmation {
            order_id: placed.id,
            status: placed.status,
        })
    }
}

fn parse_decimal(s: &str, field: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .with_context(|| format!("Alpaca field {field} is not numeric: {s:?}"))
}

fn parse_optional(s: Option<String>) -> Option<f64> {
    s.and_then(|v| v.trim().parse::<f64>().ok())
}

#[derive(Debug, Clone, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    #[serde(default)]
    market_value: Option<String>,
    #[serde(default)]
    current_price: Option<String>,
    #[serde(default)]
    unrealized_plpc: Option<String>,
}

impl AlpacaPosition {
    fn into_position(self) -> Result<Position> {
        Ok(Position {
            quantity: parse_decimal(&self.qty, "qty")?,
            avg_entry_price: parse_decimal(&self.avg_entry_price, "avg_entry_price")?,
            market_value: parse_optional(self.market_value),
            current_price: parse_optional(self.current_price),
            unrealized_plpc: parse_optional(self.unrealized_plpc),
            ticker: self.symbol.to_ascii_uppercase(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AlpacaAccount {
    buying_power: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LatestTrades {
    #[serde(default)]
    trades: HashMap<String, LatestTrade>,
}

#[derive(Debug, Clone, Deserialize)]
struct LatestTrade {
    p: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct AlpacaOrder {
    symbol: String,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notional: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    take_profit: Option<TakeProfitLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<StopLossLeg>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct TakeProfitLeg {
    limit_price: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct StopLossLeg {
    stop_price: String,
}

impl AlpacaOrder {
    fn from_request(order: &OrderRequest) -> Result<Self> {
        let side = match order.side {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => anyhow::bail!("HOLD cannot be submitted as an order"),
        };

        let bracket = match (order.stop_price, order.take_profit) {
            (Some(stop), Some(tp)) => Some((stop, tp)),
            _ => None,
        };

        let (qty, notional) = match order.size {
            OrderSize::Quantity(q) => (Some(format_qty(q)), None),
            OrderSize::Notional(n) => {
                anyhow::ensure!(
                    bracket.is_none(),
                    "bracket orders require a share quantity, not a notional"
                );
                (None, Some(format!("{n:.2}")))
            }
        };

        Ok(Self {
            symbol: order.ticker.clone(),
            side,
            order_type: "market",
            // Notional and fractional orders must be DAY; bracket legs persist with GTC.
            time_in_force: if bracket.is_some() { "gtc" } else { "day" },
            qty,
            notional,
            order_class: bracket.map(|_| "bracket"),
            take_profit: bracket.map(|(_, tp)| TakeProfitLeg {
                limit_price: format!("{tp:.2}"),
            }),
            stop_loss: bracket.map(|(stop, _)| StopLossLeg {
                stop_price: format!("{stop:.2}"),
            }),
        })
    }
}

fn format_qty(q: f64) -> String {
    if q.fract() == 0.0 {
        format!("{q:.0}")
    } else {
        format!("{q}")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AlpacaOrderResponse {
    id: String,
    status: String,
}
