use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::TradingPair;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
}

/// Aggregated resting quantity at one price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub total: Decimal,
    pub orders: usize,
}

/// Book depth, best price first on both sides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBookDepth {
    pub pair: TradingPair,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Rolling 24h market statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSummary {
    pub pair: TradingPair,
    pub last_price: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub volume_24h: Decimal,
    pub quote_volume_24h: Decimal,
    /// Percent change of the last price against the first trade of the window.
    pub change_24h: Option<Decimal>,
    pub trades_24h: usize,
    pub updated_at: DateTime<Utc>,
}
