use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ExchangeConfig;
use crate::domain::{
    fits_precision, order_value, MarketSummary, Order, OrderBookDepth, OrderSide, Symbol, Token,
    TokenMeta, Trade, TradingPair, Transaction,
};
use crate::engine::MatchingEngine;
use crate::error::{ExchangeError, Result};
use crate::ledger::{AccountBalance, Ledger};
use crate::registry::TokenRegistry;

/// Order entry request.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    /// Caller-chosen id; makes retries safe.
    #[serde(default)]
    pub client_order_id: Option<Uuid>,
    pub account: String,
    pub pair: TradingPair,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Result of placing an order: its final state and the trades it produced.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPlacement {
    pub order: Order,
    pub trades: Vec<Trade>,
}

type Book = Arc<Mutex<MatchingEngine>>;

/// Owns the order books, the ledger and the token registry.
///
/// Each book has its own lock, so different pairs trade independently. The
/// ledger is only ever entered while holding at most one book lock.
pub struct Exchange {
    config: ExchangeConfig,
    registry: TokenRegistry,
    ledger: Ledger,
    books: RwLock<BTreeMap<TradingPair, Book>>,
    order_index: RwLock<HashMap<Uuid, TradingPair>>,
    sequence: AtomicU64,
}

impl Exchange {
    /// Creates an exchange with the native token registered.
    pub fn new(config: ExchangeConfig) -> Result<Self> {
        let registry = TokenRegistry::new();
        registry.create_token(config.native_token.clone(), &config.fee_account)?;
        let ledger = Ledger::with_history(config.max_transactions);
        Ok(Self {
            config,
            registry,
            ledger,
            books: RwLock::new(BTreeMap::new()),
            order_index: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn native_symbol(&self) -> &Symbol {
        &self.config.native_token.symbol
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    // ---- markets ----

    /// Opens the `base/quote` market. Opening an existing market is a no-op.
    pub fn open_market(&self, base: &Symbol, quote: &Symbol) -> Result<TradingPair> {
        self.registry.get(base)?;
        self.registry.get(quote)?;
        let pair = TradingPair::new(base.clone(), quote.clone())?;

        let mut books = self.books.write();
        if !books.contains_key(&pair) {
            info!(%pair, "market opened");
            books.insert(
                pair.clone(),
                Arc::new(Mutex::new(
                    MatchingEngine::new(pair.clone(), self.config.max_trade_history)
                        .with_closed_history(self.config.max_closed_orders),
                )),
            );
        }
        Ok(pair)
    }

    fn book(&self, pair: &TradingPair) -> Result<Book> {
        self.books
            .read()
            .get(pair)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found(format!("Market {pair}")))
    }

    pub fn markets(&self) -> Vec<MarketSummary> {
        let books: Vec<Book> = self.books.read().values().cloned().collect();
        let now = Utc::now();
        books.iter().map(|b| b.lock().summary(now)).collect()
    }

    pub fn market_summary(&self, pair: &TradingPair) -> Result<MarketSummary> {
        Ok(self.book(pair)?.lock().summary(Utc::now()))
    }

    pub fn order_book(&self, pair: &TradingPair, depth: usize) -> Result<OrderBookDepth> {
        Ok(self.book(pair)?.lock().depth(depth))
    }

    pub fn trades(&self, pair: &TradingPair) -> Result<Vec<Trade>> {
        Ok(self.book(pair)?.lock().get_trades())
    }

    // ---- orders ----

    /// Reserves funds, matches the order and settles every resulting trade.
    pub fn place_order(&self, req: PlaceOrder) -> Result<OrderPlacement> {
        let book = self.book(&req.pair)?;
        let base = self.registry.get(&req.pair.base)?;
        let quote = self.registry.get(&req.pair.quote)?;
        if req.price <= Decimal::ZERO || !fits_precision(req.price, quote.precision()) {
            return Err(ExchangeError::InvalidPrice(req.price));
        }
        base.check_movement(req.quantity)?;
        // sells are checked too: a resting sell prices the trades it takes part in
        let value = order_value(req.price, req.quantity, base.precision())
            .ok_or(ExchangeError::InvalidPrice(req.price))?;
        let reservation = match req.side {
            OrderSide::Buy => value,
            OrderSide::Sell => req.quantity,
        };

        let id = req.client_order_id.unwrap_or_else(Uuid::new_v4);
        match self.order_index.write().entry(id) {
            Entry::Occupied(_) => return Err(ExchangeError::DuplicateOrderId(id)),
            Entry::Vacant(slot) => {
                slot.insert(req.pair.clone());
            }
        }

        let result = self.execute(&book, id, req, reservation);
        if result.is_err() {
            self.order_index.write().remove(&id);
        }
        result
    }

    fn execute(&self, book: &Book, id: Uuid, req: PlaceOrder, reservation: Decimal) -> Result<OrderPlacement> {
        let mut book = book.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let order = Order::new(id, req.account, req.pair, req.side, req.price, req.quantity, sequence)
            .with_reservation(reservation);

        let owner = order.owner.clone();
        let reserved_symbol = order.reserved_symbol().clone();
        self.ledger.reserve(&owner, &reserved_symbol, reservation)?;

        let placed = book.submit_order_with(order, |trades| {
            self.ledger.settle(trades).map_err(|e| {
                error!(%id, "settlement failed: {}", e);
                e
            })
        });
        let (order, trades) = match placed {
            Ok(placed) => placed,
            Err(e) => {
                self.ledger.release(&owner, &reserved_symbol, reservation)?;
                return Err(e);
            }
        };
        let evicted = book.take_evicted();
        drop(book);
        self.forget(&evicted);

        for trade in &trades {
            info!(
                pair = %trade.pair,
                price = %trade.price,
                quantity = %trade.quantity,
                buyer = %trade.buyer,
                seller = %trade.seller,
                "trade"
            );
        }
        info!(
            id = %order.id,
            account = %order.owner,
            pair = %order.pair,
            side = ?order.side,
            price = %order.price,
            quantity = %order.quantity,
            filled = %order.filled(),
            status = ?order.status,
            "order placed"
        );
        Ok(OrderPlacement { order, trades })
    }

    /// Cancels a resting order of `account` and releases what it still reserves.
    pub fn cancel_order(&self, account: &str, id: Uuid) -> Result<Order> {
        let pair = self
            .order_index
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found(format!("Order {id}")))?;
        let book = self.book(&pair)?;
        let mut book = book.lock();

        let mut released = Decimal::ZERO;
        let order = book.cancel_order_with(id, account, |order| {
            released = order.reserved;
            self.ledger
                .release(&order.owner, order.reserved_symbol(), order.reserved)
                .map(|_| ())
        })?;
        let evicted = book.take_evicted();
        drop(book);
        self.forget(&evicted);

        info!(
            %id,
            account,
            %pair,
            filled = %order.filled(),
            remaining = %order.remaining,
            %released,
            "order cancelled"
        );
        Ok(order)
    }

    /// Drops ids whose orders the books no longer remember.
    fn forget(&self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        let mut index = self.order_index.write();
        for id in ids {
            index.remove(id);
        }
    }

    pub fn order(&self, id: Uuid) -> Result<Order> {
        let pair = self
            .order_index
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found(format!("Order {id}")))?;
        self.book(&pair)?
            .lock()
            .get_order(id)
            .ok_or_else(|| ExchangeError::not_found(format!("Order {id}")))
    }

    pub fn open_orders(&self, account: &str) -> Vec<Order> {
        let books: Vec<Book> = self.books.read().values().cloned().collect();
        books.iter().flat_map(|b| b.lock().open_orders(account)).collect()
    }

    // ---- wallet ----

    pub fn balances(&self, account: &str) -> Vec<AccountBalance> {
        self.ledger.balances(account)
    }

    pub fn transactions(&self, account: &str) -> Vec<Transaction> {
        self.ledger.transactions(account)
    }

    pub fn deposit(&self, account: &str, symbol: &Symbol, amount: Decimal) -> Result<Transaction> {
        self.registry.get(symbol)?.check_movement(amount)?;
        let tx = self.ledger.deposit(account, symbol, amount)?;
        info!(account, %symbol, %amount, "deposit");
        Ok(tx)
    }

    pub fn withdraw(
        &self,
        account: &str,
        symbol: &Symbol,
        amount: Decimal,
        address: Option<String>,
    ) -> Result<Transaction> {
        self.registry.get(symbol)?.check_amount(amount)?;
        let tx = self.ledger.withdraw(account, symbol, amount, address)?;
        info!(account, %symbol, %amount, "withdrawal");
        Ok(tx)
    }

    pub fn transfer(&self, from: &str, to: &str, symbol: &Symbol, amount: Decimal) -> Result<Transaction> {
        let token = self.registry.get(symbol)?;
        if !token.meta.transferable {
            return Err(ExchangeError::NotTransferable(symbol.clone()));
        }
        token.check_movement(amount)?;
        let tx = self.ledger.transfer(from, to, symbol, amount)?;
        info!(from, to, %symbol, %amount, "transfer");
        Ok(tx)
    }

    // ---- tokens ----

    pub fn tokens(&self) -> Vec<Token> {
        self.registry.list()
    }

    pub fn token(&self, symbol: &Symbol) -> Result<Token> {
        self.registry.get(symbol)
    }

    /// Creates a token, charging the creation fee, and opens its native market.
    pub fn create_token(&self, issuer: &str, meta: TokenMeta) -> Result<Token> {
        meta.validate()?;
        if self.registry.contains(&meta.symbol) {
            return Err(ExchangeError::DuplicateSymbol(meta.symbol));
        }

        let native = self.native_symbol().clone();
        let fee_account = self.config.fee_account.as_str();
        let fee = if issuer == fee_account {
            Decimal::ZERO
        } else {
            self.config.creation_fee
        };
        self.ledger.charge(issuer, &native, fee, fee_account)?;

        let token = match self.registry.create_token(meta, issuer) {
            Ok(token) => token,
            Err(e) => {
                self.ledger.charge(fee_account, &native, fee, issuer)?;
                return Err(e);
            }
        };
        self.open_market(token.symbol(), &native)?;
        Ok(token)
    }

    pub fn issue(&self, issuer: &str, symbol: &Symbol, amount: Decimal) -> Result<Token> {
        self.registry.issue(&self.ledger, symbol, amount, issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderStatus, TransactionKind};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn pair() -> TradingPair {
        "BLT/BLURT".parse().unwrap()
    }

    /// Exchange with BLT/BLURT open; alice holds BLURT, bob holds BLT.
    fn setup() -> Exchange {
        let exchange = Exchange::new(ExchangeConfig::default()).unwrap();
        exchange.deposit("issuer", &sym("BLURT"), d("1000")).unwrap();
        exchange
            .create_token("issuer", TokenMeta::new(sym("BLT"), "Blurt Token", 3, d("1000000")))
            .unwrap();
        exchange.issue("issuer", &sym("BLT"), d("10000")).unwrap();
        exchange.transfer("issuer", "bob", &sym("BLT"), d("1000")).unwrap();
        exchange.deposit("alice", &sym("BLURT"), d("500")).unwrap();
        exchange
    }

    fn req(account: &str, side: OrderSide, price: &str, qty: &str) -> PlaceOrder {
        PlaceOrder {
            client_order_id: None,
            account: account.to_string(),
            pair: pair(),
            side,
            price: d(price),
            quantity: d(qty),
        }
    }

    fn total(exchange: &Exchange, account: &str, symbol: &str) -> Decimal {
        exchange.ledger().balance(account, &sym(symbol)).total()
    }

    #[test]
    fn test_create_token_charges_fee_and_opens_market() {
        let exchange = setup();
        assert_eq!(exchange.ledger().balance("issuer", &sym("BLURT")).available, d("900"));
        assert_eq!(exchange.ledger().balance("engine", &sym("BLURT")).available, d("100"));
        assert!(exchange.order_book(&pair(), 10).unwrap().bids.is_empty());

        let err = exchange
            .create_token("alice", TokenMeta::new(sym("BLT"), "Copy", 3, d("5")))
            .unwrap_err();
        assert_eq!(err, ExchangeError::DuplicateSymbol(sym("BLT")));
        assert_eq!(exchange.ledger().balance("alice", &sym("BLURT")).available, d("500"));
    }

    #[test]
    fn test_create_token_requires_fee() {
        let exchange = Exchange::new(ExchangeConfig::default()).unwrap();
        exchange.deposit("poor", &sym("BLURT"), d("99.999")).unwrap();
        let err = exchange
            .create_token("poor", TokenMeta::new(sym("BGOLD"), "Blurt Gold", 2, d("100000")))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFunds { .. }));
        assert!(exchange.token(&sym("BGOLD")).is_err());
    }

    #[test]
    fn test_buy_then_crossing_sell_fills_both() {
        let exchange = setup();
        let buy = exchange.place_order(req("alice", OrderSide::Buy, "0.11", "10")).unwrap();
        assert!(buy.trades.is_empty());
        assert_eq!(exchange.ledger().balance("alice", &sym("BLURT")).reserved, d("1.1"));

        let sell = exchange.place_order(req("bob", OrderSide::Sell, "0.10", "10")).unwrap();
        assert_eq!(sell.trades.len(), 1);
        assert_eq!(sell.trades[0].price, d("0.11"));
        assert_eq!(sell.trades[0].quantity, d("10"));
        assert_eq!(sell.order.status, OrderStatus::Filled);
        assert_eq!(exchange.order(buy.order.id).unwrap().status, OrderStatus::Filled);

        let depth = exchange.order_book(&pair(), 10).unwrap();
        assert!(depth.bids.is_empty() && depth.asks.is_empty());

        assert_eq!(exchange.ledger().balance("alice", &sym("BLURT")).available, d("498.9"));
        assert!(exchange.ledger().balance("alice", &sym("BLURT")).reserved.is_zero());
        assert_eq!(exchange.ledger().balance("alice", &sym("BLT")).available, d("10"));
        assert_eq!(exchange.ledger().balance("bob", &sym("BLT")).available, d("990"));
        assert_eq!(exchange.ledger().balance("bob", &sym("BLURT")).available, d("1.1"));
    }

    #[test]
    fn test_taker_buy_gets_price_improvement_refunded() {
        let exchange = setup();
        exchange.place_order(req("bob", OrderSide::Sell, "0.10", "4")).unwrap();
        let placed = exchange.place_order(req("alice", OrderSide::Buy, "0.12", "10")).unwrap();
        assert_eq!(placed.trades.len(), 1);
        assert_eq!(placed.order.status, OrderStatus::PartiallyFilled);

        // 4 bought at 0.10, 6 still reserved at 0.12
        let balance = exchange.ledger().balance("alice", &sym("BLURT"));
        assert_eq!(balance.reserved, d("0.72"));
        assert_eq!(balance.available, d("500") - d("0.4") - d("0.72"));

        let cancelled = exchange.cancel_order("alice", placed.order.id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        let balance = exchange.ledger().balance("alice", &sym("BLURT"));
        assert!(balance.reserved.is_zero());
        assert_eq!(balance.available, d("499.6"));
    }

    #[test]
    fn test_balances_are_conserved_across_trading() {
        let exchange = setup();
        let accounts = ["alice", "bob"];
        let before: Vec<Decimal> = ["BLT", "BLURT"]
            .iter()
            .map(|s| accounts.iter().map(|a| total(&exchange, a, s)).sum())
            .collect();

        exchange.place_order(req("bob", OrderSide::Sell, "0.105", "800")).unwrap();
        exchange.place_order(req("bob", OrderSide::Sell, "0.11", "150")).unwrap();
        exchange.place_order(req("alice", OrderSide::Buy, "0.115", "900")).unwrap();
        exchange.place_order(req("alice", OrderSide::Buy, "0.09", "100")).unwrap();
        exchange.place_order(req("bob", OrderSide::Sell, "0.08", "30")).unwrap();

        let after: Vec<Decimal> = ["BLT", "BLURT"]
            .iter()
            .map(|s| accounts.iter().map(|a| total(&exchange, a, s)).sum())
            .collect();
        assert_eq!(before, after);
        assert_eq!(exchange.ledger().balance("alice", &sym("BLT")).total(), d("930"));
    }

    #[test]
    fn test_order_rejections_leave_state_untouched() {
        let exchange = setup();
        assert!(matches!(
            exchange.place_order(req("alice", OrderSide::Buy, "0", "10")),
            Err(ExchangeError::InvalidPrice(_))
        ));
        assert!(matches!(
            exchange.place_order(req("alice", OrderSide::Buy, "0.1", "0.0001")),
            Err(ExchangeError::InvalidQuantity { precision: 3, .. })
        ));
        assert!(matches!(
            exchange.place_order(req("alice", OrderSide::Buy, "1", "501")),
            Err(ExchangeError::InsufficientFunds { .. })
        ));
        let mut unknown = req("alice", OrderSide::Buy, "1", "1");
        unknown.pair = "BLURT/BLT".parse().unwrap();
        assert!(matches!(exchange.place_order(unknown), Err(ExchangeError::NotFound(_))));

        let balance = exchange.ledger().balance("alice", &sym("BLURT"));
        assert_eq!(balance.available, d("500"));
        assert!(balance.reserved.is_zero());
        assert!(exchange.open_orders("alice").is_empty());
    }

    #[test]
    fn test_client_order_id_is_idempotency_key() {
        let exchange = setup();
        let id = Uuid::new_v4();
        let mut first = req("alice", OrderSide::Buy, "0.1", "10");
        first.client_order_id = Some(id);
        assert_eq!(exchange.place_order(first.clone()).unwrap().order.id, id);
        assert!(matches!(
            exchange.place_order(first),
            Err(ExchangeError::DuplicateOrderId(dup)) if dup == id
        ));
        assert_eq!(exchange.ledger().balance("alice", &sym("BLURT")).reserved, d("1"));

        // a rejected order does not burn its id
        let retry_id = Uuid::new_v4();
        let mut too_big = req("alice", OrderSide::Buy, "1", "1000");
        too_big.client_order_id = Some(retry_id);
        assert!(exchange.place_order(too_big.clone()).is_err());
        too_big.quantity = d("1");
        assert_eq!(exchange.place_order(too_big).unwrap().order.id, retry_id);
    }

    #[test]
    fn test_cancel_rules() {
        let exchange = setup();
        let placed = exchange.place_order(req("bob", OrderSide::Sell, "0.2", "5")).unwrap();
        assert!(matches!(
            exchange.cancel_order("alice", placed.order.id),
            Err(ExchangeError::Unauthorized { .. })
        ));
        assert!(matches!(
            exchange.cancel_order("bob", Uuid::new_v4()),
            Err(ExchangeError::NotFound(_))
        ));
        assert_eq!(exchange.ledger().balance("bob", &sym("BLT")).reserved, d("5"));
        exchange.cancel_order("bob", placed.order.id).unwrap();
        assert_eq!(exchange.ledger().balance("bob", &sym("BLT")).available, d("1000"));
        assert!(matches!(
            exchange.cancel_order("bob", placed.order.id),
            Err(ExchangeError::NotFound(_))
        ));
    }

    #[test]
    fn test_withdraw_more_than_available() {
        let exchange = setup();
        exchange.place_order(req("alice", OrderSide::Buy, "0.1", "1000")).unwrap();
        let err = exchange
            .withdraw("alice", &sym("BLURT"), d("400.001"), Some("alice-cold".into()))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFunds { .. }));
        let balance = exchange.ledger().balance("alice", &sym("BLURT"));
        assert_eq!(balance.available, d("400"));
        assert_eq!(balance.reserved, d("100"));
        assert!(exchange.withdraw("alice", &sym("BLURT"), d("400"), None).is_ok());
    }

    #[test]
    fn test_wallet_operations_respect_token_rules() {
        let exchange = setup();
        assert!(matches!(
            exchange.deposit("alice", &sym("NOPE"), d("1")),
            Err(ExchangeError::NotFound(_))
        ));
        assert!(matches!(
            exchange.deposit("alice", &sym("BLURT"), d("0.0001")),
            Err(ExchangeError::InvalidQuantity { precision: 3, .. })
        ));

        let mut meta = TokenMeta::new(sym("BLP"), "Blurt Power", 3, d("1000"));
        meta.transferable = false;
        exchange.create_token("issuer", meta).unwrap();
        exchange.issue("issuer", &sym("BLP"), d("10")).unwrap();
        assert_eq!(
            exchange.transfer("issuer", "alice", &sym("BLP"), d("1")),
            Err(ExchangeError::NotTransferable(sym("BLP")))
        );

        let history = exchange.transactions("issuer");
        assert_eq!(history[0].kind, TransactionKind::Issue);
        assert_eq!(history[1].kind, TransactionKind::Fee);
    }

    #[test]
    fn test_issue_never_exceeds_max_supply() {
        let exchange = setup();
        let err = exchange.issue("issuer", &sym("BLT"), d("990000.001")).unwrap_err();
        assert!(matches!(err, ExchangeError::SupplyExceeded { .. }));
        exchange.issue("issuer", &sym("BLT"), d("990000")).unwrap();
        let token = exchange.token(&sym("BLT")).unwrap();
        assert_eq!(token.issued_supply, token.meta.max_supply);
        assert_eq!(exchange.ledger().total_held(&sym("BLT")), token.issued_supply);
    }

    #[test]
    fn test_markets_report_every_pair() {
        let exchange = setup();
        exchange.place_order(req("bob", OrderSide::Sell, "0.10", "10")).unwrap();
        exchange.place_order(req("alice", OrderSide::Buy, "0.10", "10")).unwrap();
        let markets = exchange.markets();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].pair, pair());
        assert_eq!(markets[0].last_price, Some(d("0.10")));
        assert_eq!(exchange.trades(&pair()).unwrap().len(), 1);
        assert!(exchange.open_market(&sym("BLT"), &sym("BLT")).is_err());
    }

    #[test]
    fn test_huge_inputs_are_rejected_without_side_effects() {
        let exchange = setup();
        let id = Uuid::new_v4();
        let mut huge = req("alice", OrderSide::Buy, "10000000000000000000000000", "100000");
        huge.client_order_id = Some(id);
        assert!(matches!(
            exchange.place_order(huge.clone()),
            Err(ExchangeError::InvalidPrice(_))
        ));
        huge.side = OrderSide::Sell;
        assert!(matches!(exchange.place_order(huge), Err(ExchangeError::InvalidPrice(_))));
        assert!(matches!(
            exchange.place_order(req("alice", OrderSide::Buy, "0.1234", "1")),
            Err(ExchangeError::InvalidPrice(_))
        ));

        // the id was never taken
        let mut fine = req("alice", OrderSide::Buy, "0.1", "10");
        fine.client_order_id = Some(id);
        assert_eq!(exchange.place_order(fine).unwrap().order.id, id);

        assert!(matches!(
            exchange.deposit("alice", &sym("BLURT"), Decimal::MAX),
            Err(ExchangeError::InvalidQuantity { .. })
        ));
        let supply = exchange.token(&sym("BLURT")).unwrap().meta.max_supply;
        exchange.deposit("whale", &sym("BLURT"), supply).unwrap();
        exchange.deposit("whale", &sym("BLURT"), supply).unwrap();
        assert_eq!(total(&exchange, "whale", "BLURT"), supply * Decimal::TWO);
    }

    #[test]
    fn test_cancel_after_partial_fill_releases_exact_remainder() {
        let exchange = setup();
        let buy = exchange.place_order(req("alice", OrderSide::Buy, "1.111", "10.001")).unwrap();
        assert_eq!(buy.order.reserved, d("11.111111"));

        let sell = exchange.place_order(req("bob", OrderSide::Sell, "1.111", "0.005")).unwrap();
        assert_eq!(sell.trades.len(), 1);
        let resting = exchange.order(buy.order.id).unwrap();
        assert_eq!(resting.filled(), d("0.005"));
        assert_eq!(resting.reserved, d("11.105556"));
        assert_eq!(exchange.ledger().balance("alice", &sym("BLURT")).reserved, resting.reserved);

        let cancelled = exchange.cancel_order("alice", buy.order.id).unwrap();
        assert_eq!(cancelled.filled(), d("0.005"));
        let balance = exchange.ledger().balance("alice", &sym("BLURT"));
        assert!(balance.reserved.is_zero());
        assert_eq!(balance.available, d("500") - d("0.005555"));
        assert!(exchange.open_orders("alice").is_empty());

        // 28 significant digits of price are rejected up front
        assert!(matches!(
            exchange.place_order(req("alice", OrderSide::Buy, "1.111111111111111111111111111", "10.001")),
            Err(ExchangeError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_order_ids_are_forgotten_with_closed_history() {
        let config = ExchangeConfig {
            max_closed_orders: 1,
            ..ExchangeConfig::default()
        };
        let exchange = Exchange::new(config).unwrap();
        exchange
            .create_token("engine", TokenMeta::new(sym("BLT"), "Blurt Token", 3, d("1000")))
            .unwrap();
        exchange.deposit("alice", &sym("BLURT"), d("10")).unwrap();

        let first = exchange.place_order(req("alice", OrderSide::Buy, "0.1", "1")).unwrap();
        exchange.cancel_order("alice", first.order.id).unwrap();
        assert!(exchange.order(first.order.id).is_ok());
        let second = exchange.place_order(req("alice", OrderSide::Buy, "0.1", "1")).unwrap();
        exchange.cancel_order("alice", second.order.id).unwrap();

        assert!(matches!(exchange.order(first.order.id), Err(ExchangeError::NotFound(_))));
        assert!(exchange.order(second.order.id).is_ok());
        assert!(!exchange.order_index.read().contains_key(&first.order.id));
    }

    #[test]
    fn test_concurrent_trading_on_two_pairs_conserves_funds() {
        let exchange = setup();
        exchange
            .create_token("issuer", TokenMeta::new(sym("BLD"), "Blurt Dollars", 3, d("1000000")))
            .unwrap();
        exchange.issue("issuer", &sym("BLD"), d("10000")).unwrap();

        let traders = ["t0", "t1", "t2", "t3"];
        let symbols = ["BLT", "BLD", "BLURT"];
        for t in traders {
            exchange.transfer("issuer", t, &sym("BLT"), d("1000")).unwrap();
            exchange.transfer("issuer", t, &sym("BLD"), d("1000")).unwrap();
            exchange.deposit(t, &sym("BLURT"), d("100")).unwrap();
        }
        let held = |symbol: &str| -> Decimal {
            traders.iter().map(|t| total(&exchange, t, symbol)).sum()
        };
        let before: Vec<Decimal> = symbols.iter().map(|s| held(*s)).collect();
        let pairs: [TradingPair; 2] = ["BLT/BLURT".parse().unwrap(), "BLD/BLURT".parse().unwrap()];

        std::thread::scope(|scope| {
            for (n, trader) in traders.iter().enumerate() {
                let exchange = &exchange;
                let pairs = &pairs;
                scope.spawn(move || {
                    let mut state: u64 = 0x9e37_79b9_7f4a_7c15 ^ (n as u64 + 1);
                    let mut next = move || {
                        state ^= state << 13;
                        state ^= state >> 7;
                        state ^= state << 17;
                        state
                    };
                    for _ in 0..300 {
                        let r = next();
                        if r % 7 == 0 {
                            if let Some(open) = exchange.open_orders(trader).first() {
                                // may race with a fill from another thread
                                let _ = exchange.cancel_order(trader, open.id);
                            }
                            continue;
                        }
                        let order = PlaceOrder {
                            client_order_id: None,
                            account: trader.to_string(),
                            pair: pairs[(r >> 3) as usize % 2].clone(),
                            side: if (r >> 5) % 2 == 0 { OrderSide::Buy } else { OrderSide::Sell },
                            price: Decimal::new(90 + ((r >> 8) % 21) as i64, 3),
                            quantity: Decimal::new(1 + ((r >> 16) % 20_000) as i64, 3),
                        };
                        match exchange.place_order(order) {
                            Ok(_) | Err(ExchangeError::InsufficientFunds { .. }) => {}
                            Err(e) => panic!("unexpected rejection: {e}"),
                        }
                    }
                });
            }
        });

        let after: Vec<Decimal> = symbols.iter().map(|s| held(*s)).collect();
        assert_eq!(before, after);
        for t in traders {
            let open = exchange.open_orders(t);
            for s in symbols {
                let balance = exchange.ledger().balance(t, &sym(s));
                assert!(balance.available >= Decimal::ZERO && balance.reserved >= Decimal::ZERO);
                let held_for_orders: Decimal = open
                    .iter()
                    .filter(|o| o.reserved_symbol() == &sym(s))
                    .map(|o| o.reserved)
                    .sum();
                assert_eq!(balance.reserved, held_for_orders, "{t} {s}");
            }
        }
        for pair in &pairs {
            let depth = exchange.order_book(pair, 1).unwrap();
            if let (Some(bid), Some(ask)) = (depth.bids.first(), depth.asks.first()) {
                assert!(bid.price < ask.price);
            }
        }
    }
}
