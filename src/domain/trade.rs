use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::{Order, OrderSide};
use crate::domain::TradingPair;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub pair: TradingPair,
    pub price: Decimal,
    pub quantity: Decimal,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer: String,
    pub seller: String,
    pub taker_side: OrderSide, // side of the incoming order
    pub timestamp: DateTime<Utc>,
    /// Reservation the buy order gives up for this trade.
    #[serde(skip)]
    pub(crate) buyer_reserved: Decimal,
    /// Reservation the sell order gives up for this trade.
    #[serde(skip)]
    pub(crate) seller_reserved: Decimal,
}

impl Trade {
    /// Trade between an incoming order and a resting one, at the resting price.
    pub(crate) fn between(taker: &Order, maker: &Order, quantity: Decimal) -> Self {
        let (buy, sell) = match taker.side {
            OrderSide::Buy => (taker, maker),
            OrderSide::Sell => (maker, taker),
        };
        Self {
            id: Uuid::new_v4(),
            pair: maker.pair.clone(),
            price: maker.price,
            quantity,
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            buyer: buy.owner.clone(),
            seller: sell.owner.clone(),
            taker_side: taker.side,
            timestamp: Utc::now(),
            buyer_reserved: Decimal::ZERO,
            seller_reserved: Decimal::ZERO,
        }
    }

    /// Records what each side's reservation shrank by when the trade was filled.
    pub(crate) fn with_reservations(mut self, taker_consumed: Decimal, maker_consumed: Decimal) -> Self {
        (self.buyer_reserved, self.seller_reserved) = match self.taker_side {
            OrderSide::Buy => (taker_consumed, maker_consumed),
            OrderSide::Sell => (maker_consumed, taker_consumed),
        };
        self
    }

    pub fn total(&self) -> Decimal {
        self.price.saturating_mul(self.quantity)
    }
}
