pub mod alpaca;

use crate::domain::decision::Action;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub market_value: Option<f64>,
    pub current_price: Option<f64>,
    /// Unrealized P&L as a fraction (0.05 = +5%).
    pub unrealized_plpc: Option<f64>,
}

impl Position {
    /// Live market value, else quantity x last known price, else cost basis.
    pub fn liquidation_value(&self) -> f64 {
        if let Some(v) = self.market_value.filter(|v| *v > 0.0) {
            return v;
        }
        let price = self
            .current_price
            .filter(|p| *p > 0.0)
            .unwrap_or(self.avg_entry_price);
        self.quantity * price
    }

    pub fn unrealized_pct(&self) -> Option<f64> {
        if let Some(plpc) = self.unrealized_plpc {
            return Some(plpc * 100.0);
        }
        let price = self.current_price?;
        if self.avg_entry_price <= 0.0 {
            return None;
        }
        Some((price - self.avg_entry_price) / self.avg_entry_price * 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSize {
    Notional(f64),
    Quantity(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: Action,
    pub size: OrderSize,
    pub stop_price: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub status: String,
}

#[async_trait::async_trait]
pub trait Brokerage: Send + Sync {
    fn broker_name(&self) -> &'static str;

    async fn positions(&self) -> Result<Vec<Position>>;

    async fn buying_power(&self) -> Result<f64>;

    async fn latest_prices(&self, tickers: &[String]) -> Result<HashMap<String, f64>>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderConfirmation>;
}
