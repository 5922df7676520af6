use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    MarketSnapshot, MarketSummary, Order, OrderBookDepth, OrderSide, PriceLevel, Trade,
    TradingPair, MAX_PRECISION,
};
use crate::error::{ExchangeError, Result};

/// Filled and cancelled orders kept for lookups unless configured otherwise.
pub const DEFAULT_CLOSED_HISTORY: usize = 10_000;

/// Order book and matching for a single trading pair.
///
/// Knows nothing about balances: the caller reserves funds before submitting
/// and settles the trades before they are committed to the book.
pub struct MatchingEngine {
    pair: TradingPair,
    bids: Vec<Order>,                 // price desc, then arrival
    asks: Vec<Order>,                 // price asc, then arrival
    resting: HashMap<Uuid, OrderSide>,
    closed: HashMap<Uuid, Order>,     // filled or cancelled, kept for lookups
    closed_ids: VecDeque<Uuid>,       // eviction order of `closed`
    evicted: Vec<Uuid>,               // dropped from `closed`, not yet collected
    trades: VecDeque<Trade>,          // recent trades, oldest first
    max_trade_history: usize,
    max_closed_orders: usize,
}

impl MatchingEngine {
    pub fn new(pair: TradingPair, max_trade_history: usize) -> Self {
        Self {
            pair,
            bids: Vec::new(),
            asks: Vec::new(),
            resting: HashMap::new(),
            closed: HashMap::new(),
            closed_ids: VecDeque::new(),
            evicted: Vec::new(),
            trades: VecDeque::new(),
            max_trade_history,
            max_closed_orders: DEFAULT_CLOSED_HISTORY,
        }
    }

    pub fn with_closed_history(mut self, max_closed_orders: usize) -> Self {
        self.max_closed_orders = max_closed_orders;
        self
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    /// Matches `order` against the opposite side and rests any remainder.
    ///
    /// Returns the order in its final state together with the trades it produced.
    pub fn submit_order(&mut self, order: Order) -> Result<(Order, Vec<Trade>)> {
        self.submit_order_with(order, |_| Ok(()))
    }

    /// Like [`MatchingEngine::submit_order`], but hands the trades to `settle`
    /// first. The book only changes if `settle` succeeds.
    pub fn submit_order_with<F>(&mut self, mut order: Order, settle: F) -> Result<(Order, Vec<Trade>)>
    where
        F: FnOnce(&[Trade]) -> Result<()>,
    {
        if order.pair != self.pair {
            return Err(ExchangeError::InvalidPair(format!(
                "order for {} submitted to {} book",
                order.pair, self.pair
            )));
        }
        if order.price <= Decimal::ZERO {
            return Err(ExchangeError::InvalidPrice(order.price));
        }
        if order.remaining <= Decimal::ZERO {
            return Err(ExchangeError::InvalidQuantity {
                quantity: order.remaining,
                precision: MAX_PRECISION,
            });
        }
        if self.resting.contains_key(&order.id) || self.closed.contains_key(&order.id) {
            return Err(ExchangeError::DuplicateOrderId(order.id));
        }

        let (makers, trades) = self.match_order(&mut order);
        settle(&trades)?;

        self.commit_makers(order.side, makers);
        if order.is_filled() {
            self.close(order.clone());
        } else {
            self.resting.insert(order.id, order.side);
            match order.side {
                OrderSide::Buy => self.insert_bid(order.clone()),
                OrderSide::Sell => self.insert_ask(order.clone()),
            }
        }
        self.trades.extend(trades.iter().cloned());
        while self.trades.len() > self.max_trade_history {
            self.trades.pop_front();
        }

        Ok((order, trades))
    }

    /// Fills `taker` against copies of the resting orders it crosses.
    /// Returns the updated copies, front of the book first, and the trades.
    fn match_order(&self, taker: &mut Order) -> (Vec<Order>, Vec<Trade>) {
        let resting = match taker.side {
            OrderSide::Buy => &self.asks,
            OrderSide::Sell => &self.bids,
        };
        let mut makers = Vec::new();
        let mut trades = Vec::new();

        for resting_order in resting {
            if taker.is_filled() || !taker.crosses(resting_order.price) {
                break;
            }
            let mut maker = resting_order.clone();
            let qty = taker.remaining.min(maker.remaining);
            let trade = Trade::between(taker, &maker, qty);
            let maker_consumed = maker.fill(qty);
            let taker_consumed = taker.fill(qty);
            debug!(
                pair = %self.pair,
                price = %trade.price,
                quantity = %qty,
                maker = %maker.id,
                taker = %taker.id,
                "matched"
            );
            trades.push(trade.with_reservations(taker_consumed, maker_consumed));
            makers.push(maker);
        }

        (makers, trades)
    }

    /// Writes matched makers back: filled ones leave the book, a partial fill
    /// (always the last) stays at the front.
    fn commit_makers(&mut self, taker_side: OrderSide, makers: Vec<Order>) {
        for maker in makers {
            let resting = match taker_side {
                OrderSide::Buy => &mut self.asks,
                OrderSide::Sell => &mut self.bids,
            };
            debug_assert_eq!(resting.first().map(|o| o.id), Some(maker.id));
            if maker.is_filled() {
                resting.remove(0);
                self.resting.remove(&maker.id);
                self.close(maker);
            } else {
                resting[0] = maker;
            }
        }
    }

    fn close(&mut self, order: Order) {
        self.closed_ids.push_back(order.id);
        self.closed.insert(order.id, order);
        while self.closed_ids.len() > self.max_closed_orders {
            if let Some(id) = self.closed_ids.pop_front() {
                self.closed.remove(&id);
                self.evicted.push(id);
            }
        }
    }

    /// Ids of closed orders dropped from the history since the last call.
    pub fn take_evicted(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.evicted)
    }

    fn insert_bid(&mut self, order: Order) {
        // after every bid priced at or above it
        let pos = self.bids.partition_point(|o| o.price >= order.price);
        self.bids.insert(pos, order);
    }

    fn insert_ask(&mut self, order: Order) {
        // after every ask priced at or below it
        let pos = self.asks.partition_point(|o| o.price <= order.price);
        self.asks.insert(pos, order);
    }

    /// Removes a resting order owned by `account`.
    pub fn cancel_order(&mut self, id: Uuid, account: &str) -> Result<Order> {
        self.cancel_order_with(id, account, |_| Ok(()))
    }

    /// Like [`MatchingEngine::cancel_order`], but lets `release` free the
    /// order's funds first. The order stays in the book if `release` fails.
    pub fn cancel_order_with<F>(&mut self, id: Uuid, account: &str, release: F) -> Result<Order>
    where
        F: FnOnce(&Order) -> Result<()>,
    {
        let (side, idx) = self
            .locate(id)
            .ok_or_else(|| ExchangeError::not_found(format!("Open order {id}")))?;
        let resting = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        if resting[idx].owner != account {
            return Err(ExchangeError::unauthorized(account, format!("cancel order {id}")));
        }
        release(&resting[idx])?;

        let mut order = resting.remove(idx);
        order.cancel();
        self.resting.remove(&id);
        self.close(order.clone());
        Ok(order)
    }

    fn locate(&self, id: Uuid) -> Option<(OrderSide, usize)> {
        let side = *self.resting.get(&id)?;
        let orders = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        orders.iter().position(|o| o.id == id).map(|i| (side, i))
    }

    /// Looks up resting and closed orders.
    pub fn get_order(&self, id: Uuid) -> Option<Order> {
        match self.locate(id) {
            Some((OrderSide::Buy, i)) => Some(self.bids[i].clone()),
            Some((OrderSide::Sell, i)) => Some(self.asks[i].clone()),
            None => self.closed.get(&id).cloned(),
        }
    }

    pub fn open_orders(&self, account: &str) -> Vec<Order> {
        self.bids
            .iter()
            .chain(self.asks.iter())
            .filter(|o| o.owner == account)
            .cloned()
            .collect()
    }

    /// Resting orders in priority order: (bids, asks).
    pub fn get_orderbook(&self) -> (&[Order], &[Order]) {
        (&self.bids, &self.asks)
    }

    pub fn get_snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            best_bid: self.bids.first().map(|o| o.price),
            best_ask: self.asks.first().map(|o| o.price),
            last_trade_price: self.trades.back().map(|t| t.price),
        }
    }

    /// Aggregates at most `levels` price levels per side.
    pub fn depth(&self, levels: usize) -> OrderBookDepth {
        OrderBookDepth {
            pair: self.pair.clone(),
            bids: aggregate(&self.bids, levels),
            asks: aggregate(&self.asks, levels),
        }
    }

    /// Recent trades, oldest first.
    pub fn get_trades(&self) -> Vec<Trade> {
        self.trades.iter().cloned().collect()
    }

    pub fn summary(&self, now: DateTime<Utc>) -> MarketSummary {
        let since = now - Duration::hours(24);
        let window: Vec<&Trade> = self.trades.iter().filter(|t| t.timestamp >= since).collect();

        let high_24h = window.iter().map(|t| t.price).max();
        let low_24h = window.iter().map(|t| t.price).min();
        let volume_24h = window
            .iter()
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.quantity));
        let quote_volume_24h = window
            .iter()
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.total()));
        let change_24h = match (window.first(), window.last()) {
            (Some(first), Some(last)) => last
                .price
                .checked_sub(first.price)
                .and_then(|diff| diff.checked_div(first.price))
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .map(|pct| pct.round_dp(2)),
            _ => None,
        };
        let snapshot = self.get_snapshot();

        MarketSummary {
            pair: self.pair.clone(),
            last_price: snapshot.last_trade_price,
            best_bid: snapshot.best_bid,
            best_ask: snapshot.best_ask,
            high_24h,
            low_24h,
            volume_24h,
            quote_volume_24h,
            change_24h,
            trades_24h: window.len(),
            updated_at: now,
        }
    }
}

fn aggregate(orders: &[Order], levels: usize) -> Vec<PriceLevel> {
    let mut out: Vec<PriceLevel> = Vec::new();
    for order in orders {
        match out.last_mut() {
            Some(level) if level.price == order.price => {
                level.quantity = level.quantity.saturating_add(order.remaining);
                level.total = level.price.saturating_mul(level.quantity);
                level.orders += 1;
            }
            _ => {
                if out.len() == levels {
                    break;
                }
                out.push(PriceLevel {
                    price: order.price,
                    quantity: order.remaining,
                    total: order.price.saturating_mul(order.remaining),
                    orders: 1,
                });
            }
        }
    }
    out
}
