use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Symbol, TradingPair};

/// `price × quantity` for an order whose quantity sits on a grid of
/// `base_precision` decimals.
///
/// `None` when that value, or the value of any partial fill of it, would not
/// be exactly representable.
pub fn order_value(price: Decimal, quantity: Decimal, base_precision: u32) -> Option<Decimal> {
    let units = quantity
        .checked_mul(Decimal::from(10u64.pow(base_precision)))?
        .normalize();
    if units.scale() != 0 {
        return None;
    }
    let mantissa = price.normalize().mantissa().checked_mul(units.mantissa())?;
    if mantissa > Decimal::MAX.mantissa() {
        return None;
    }
    price.checked_mul(quantity)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

/// Limit order. `remaining` only ever decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub owner: String,
    pub pair: TradingPair,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining: Decimal,
    /// Funds still held for the unfilled part: quote for buys, base for sells.
    #[serde(default)]
    pub reserved: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    /// Arrival sequence; breaks time-priority ties between equal timestamps.
    pub sequence: u64,
}

impl Order {
    pub fn new(
        id: Uuid,
        owner: impl Into<String>,
        pair: TradingPair,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            owner: owner.into(),
            pair,
            side,
            price,
            quantity,
            remaining: quantity,
            reserved: Decimal::ZERO,
            status: OrderStatus::Open,
            timestamp: Utc::now(),
            sequence,
        }
    }

    /// Marks `amount` as earmarked for this order.
    pub fn with_reservation(mut self, amount: Decimal) -> Self {
        self.reserved = amount;
        self
    }

    pub fn filled(&self) -> Decimal {
        self.quantity - self.remaining
    }

    pub fn is_filled(&self) -> bool {
        self.remaining.is_zero()
    }

    /// True if a resting order at `resting_price` on the other side can trade with this one.
    pub fn crosses(&self, resting_price: Decimal) -> bool {
        match self.side {
            OrderSide::Buy => resting_price <= self.price,
            OrderSide::Sell => resting_price >= self.price,
        }
    }

    /// Fills `qty` and returns the part of the reservation it consumes.
    /// The last fill consumes whatever is left.
    pub(crate) fn fill(&mut self, qty: Decimal) -> Decimal {
        debug_assert!(qty <= self.remaining);
        self.remaining -= qty;
        let consumed = if self.remaining.is_zero() {
            self.status = OrderStatus::Filled;
            self.reserved
        } else {
            self.status = OrderStatus::PartiallyFilled;
            self.reservation_for(qty).min(self.reserved)
        };
        self.reserved -= consumed;
        consumed
    }

    pub(crate) fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
        self.reserved = Decimal::ZERO;
    }

    /// Token a resting order keeps reserved: quote for buys, base for sells.
    pub fn reserved_symbol(&self) -> &Symbol {
        match self.side {
            OrderSide::Buy => &self.pair.quote,
            OrderSide::Sell => &self.pair.base,
        }
    }

    /// Amount reserved for `qty` of this order.
    pub fn reservation_for(&self, qty: Decimal) -> Decimal {
        match self.side {
            OrderSide::Buy => self.price.saturating_mul(qty),
            OrderSide::Sell => qty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn buy(price: &str, qty: &str) -> Order {
        let pair: TradingPair = "BLT/BLURT".parse().unwrap();
        let order = Order::new(Uuid::new_v4(), "alice", pair, OrderSide::Buy, d(price), d(qty), 1);
        let value = order_value(order.price, order.quantity, 3).unwrap();
        order.with_reservation(value)
    }

    #[test]
    fn test_fills_consume_exactly_the_reservation() {
        let mut order = buy("1.111", "10.001");
        assert_eq!(order.reserved, d("11.111111"));

        assert_eq!(order.fill(d("0.005")), d("0.005555"));
        assert_eq!(order.filled(), d("0.005"));
        assert_eq!(order.reserved, d("11.105556"));
        assert_eq!(order.reserved, order.reservation_for(order.remaining));

        assert_eq!(order.fill(d("9.996")), d("11.105556"));
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.reserved.is_zero());
        assert_eq!(order.filled(), order.quantity);
    }

    #[test]
    fn test_cancel_drops_the_reservation() {
        let mut order = buy("0.2", "5");
        order.fill(d("1"));
        order.cancel();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.reserved.is_zero());
    }

    #[test]
    fn test_order_value_must_be_exact() {
        assert_eq!(order_value(d("0.11"), d("10"), 3), Some(d("1.1")));
        assert_eq!(order_value(d("10000000000000000000000000"), d("100000"), 3), None);
        assert_eq!(order_value(Decimal::MAX, d("2"), 0), None);
        // 28 significant digits leave no room for a fill on a 3 decimal grid
        assert_eq!(order_value(d("1.111111111111111111111111111"), d("10.001"), 3), None);
        // quantity finer than the grid
        assert_eq!(order_value(d("1"), d("0.0001"), 3), None);
    }
}
