//! Per-account token balances with reservations for open orders.
//!
//! All state sits behind one lock, so every operation (including the
//! four-leg trade settlement) is applied atomically or not at all.

pub mod balance;

pub use balance::{AccountBalance, Balance};

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::{Symbol, Trade, Transaction, TransactionKind, TransactionStatus, MAX_PRECISION};
use crate::error::{ExchangeError, Result};

/// Wallet transactions kept unless configured otherwise.
pub const DEFAULT_TRANSACTION_HISTORY: usize = 100_000;

/// Balances touched by a multi-leg operation, written back only once every leg succeeded.
type Staged = HashMap<(String, Symbol), Balance>;

struct LedgerState {
    balances: HashMap<String, BTreeMap<Symbol, Balance>>,
    transactions: VecDeque<Transaction>, // oldest first
    max_transactions: usize,
}

impl LedgerState {
    fn balance(&self, account: &str, symbol: &Symbol) -> Balance {
        self.balances
            .get(account)
            .and_then(|b| b.get(symbol))
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, account: &str, symbol: &Symbol) -> &mut Balance {
        self.balances
            .entry(account.to_string())
            .or_default()
            .entry(symbol.clone())
            .or_default()
    }

    /// Applies `change` to a copy of the balance and stores it if that succeeds.
    fn update<F>(&mut self, account: &str, symbol: &Symbol, change: F) -> Result<Balance>
    where
        F: FnOnce(&mut Balance) -> Result<()>,
    {
        let mut balance = self.balance(account, symbol);
        change(&mut balance)?;
        *self.entry(account, symbol) = balance;
        Ok(balance)
    }

    fn staged<'s>(&self, staged: &'s mut Staged, account: &str, symbol: &Symbol) -> &'s mut Balance {
        staged
            .entry((account.to_string(), symbol.clone()))
            .or_insert_with(|| self.balance(account, symbol))
    }

    fn commit(&mut self, staged: Staged) {
        for ((account, symbol), balance) in staged {
            *self.entry(&account, &symbol) = balance;
        }
    }

    fn record(&mut self, tx: Transaction) -> Transaction {
        self.transactions.push_back(tx.clone());
        while self.transactions.len() > self.max_transactions {
            self.transactions.pop_front();
        }
        tx
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidQuantity {
            quantity: amount,
            precision: MAX_PRECISION,
        });
    }
    Ok(())
}

pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::with_history(DEFAULT_TRANSACTION_HISTORY)
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that keeps only the latest `max_transactions` wallet transactions.
    pub fn with_history(max_transactions: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                balances: HashMap::new(),
                transactions: VecDeque::new(),
                max_transactions,
            }),
        }
    }

    pub fn balance(&self, account: &str, symbol: &Symbol) -> Balance {
        self.state.lock().balance(account, symbol)
    }

    /// Every token the account has ever held, sorted by symbol.
    pub fn balances(&self, account: &str) -> Vec<AccountBalance> {
        self.state
            .lock()
            .balances
            .get(account)
            .map(|b| {
                b.iter()
                    .map(|(symbol, balance)| AccountBalance::new(symbol.clone(), *balance))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Wallet history of `account`, newest first.
    pub fn transactions(&self, account: &str) -> Vec<Transaction> {
        self.state
            .lock()
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.account == account)
            .cloned()
            .collect()
    }

    /// Sum of all balances held in `symbol`.
    pub fn total_held(&self, symbol: &Symbol) -> Decimal {
        self.state
            .lock()
            .balances
            .values()
            .filter_map(|b| b.get(symbol))
            .fold(Decimal::ZERO, |acc, b| acc.saturating_add(b.total()))
    }

    pub fn deposit(&self, account: &str, symbol: &Symbol, amount: Decimal) -> Result<Transaction> {
        ensure_positive(amount)?;
        let mut state = self.state.lock();
        state.update(account, symbol, |b| b.credit(amount))?;
        Ok(state.record(Transaction::new(
            account,
            TransactionKind::Deposit,
            symbol,
            amount,
            None,
            TransactionStatus::Completed,
        )))
    }

    /// Debits available funds. A rejected withdrawal is still recorded, as failed.
    pub fn withdraw(
        &self,
        account: &str,
        symbol: &Symbol,
        amount: Decimal,
        address: Option<String>,
    ) -> Result<Transaction> {
        ensure_positive(amount)?;
        let mut state = self.state.lock();
        if let Err(e) = state.update(account, symbol, |b| b.debit(symbol, amount)) {
            warn!(account, %symbol, %amount, "withdrawal rejected: {}", e);
            state.record(Transaction::new(
                account,
                TransactionKind::Withdraw,
                symbol,
                amount,
                address,
                TransactionStatus::Failed,
            ));
            return Err(e);
        }
        Ok(state.record(Transaction::new(
            account,
            TransactionKind::Withdraw,
            symbol,
            amount,
            address,
            TransactionStatus::Completed,
        )))
    }

    /// Moves available funds between accounts. Returns the sender's entry.
    pub fn transfer(&self, from: &str, to: &str, symbol: &Symbol, amount: Decimal) -> Result<Transaction> {
        ensure_positive(amount)?;
        let mut state = self.state.lock();
        let mut staged = Staged::new();
        state.staged(&mut staged, from, symbol).debit(symbol, amount)?;
        state.staged(&mut staged, to, symbol).credit(amount)?;
        state.commit(staged);
        state.record(Transaction::new(
            to,
            TransactionKind::TransferIn,
            symbol,
            amount,
            Some(from.to_string()),
            TransactionStatus::Completed,
        ));
        Ok(state.record(Transaction::new(
            from,
            TransactionKind::TransferOut,
            symbol,
            amount,
            Some(to.to_string()),
            TransactionStatus::Completed,
        )))
    }

    /// Debits a fee from `account` and credits it to `collector`.
    pub fn charge(&self, account: &str, symbol: &Symbol, amount: Decimal, collector: &str) -> Result<Transaction> {
        if amount.is_zero() {
            return Ok(Transaction::new(
                account,
                TransactionKind::Fee,
                symbol,
                amount,
                Some(collector.to_string()),
                TransactionStatus::Completed,
            ));
        }
        ensure_positive(amount)?;
        let mut state = self.state.lock();
        let mut staged = Staged::new();
        state.staged(&mut staged, account, symbol).debit(symbol, amount)?;
        state.staged(&mut staged, collector, symbol).credit(amount)?;
        state.commit(staged);
        Ok(state.record(Transaction::new(
            account,
            TransactionKind::Fee,
            symbol,
            amount,
            Some(collector.to_string()),
            TransactionStatus::Completed,
        )))
    }

    /// Credits freshly issued supply to the issuer.
    pub fn issue(&self, account: &str, symbol: &Symbol, amount: Decimal) -> Result<Transaction> {
        ensure_positive(amount)?;
        let mut state = self.state.lock();
        state.update(account, symbol, |b| b.credit(amount))?;
        Ok(state.record(Transaction::new(
            account,
            TransactionKind::Issue,
            symbol,
            amount,
            None,
            TransactionStatus::Completed,
        )))
    }

    /// Earmarks available funds for an open order.
    pub fn reserve(&self, account: &str, symbol: &Symbol, amount: Decimal) -> Result<Balance> {
        ensure_positive(amount)?;
        self.state
            .lock()
            .update(account, symbol, |b| b.reserve(symbol, amount))
    }

    /// Returns reserved funds to available.
    pub fn release(&self, account: &str, symbol: &Symbol, amount: Decimal) -> Result<Balance> {
        if amount.is_zero() {
            return Ok(self.balance(account, symbol));
        }
        ensure_positive(amount)?;
        self.state
            .lock()
            .update(account, symbol, |b| b.release(symbol, amount))
    }

    /// Applies trades as one unit. For each trade the buyer spends
    /// `price × qty` quote out of the reservation its order gave up and gets
    /// the rest back, the seller delivers `qty` base out of its reservation,
    /// and each side is credited what it bought.
    pub fn settle(&self, trades: &[Trade]) -> Result<()> {
        let mut state = self.state.lock();
        let mut staged = Staged::new();

        for trade in trades {
            let (base, quote) = (&trade.pair.base, &trade.pair.quote);
            let qty = trade.quantity;
            let cost = trade
                .price
                .checked_mul(qty)
                .ok_or(ExchangeError::InvalidPrice(trade.price))?;
            let refund = trade.buyer_reserved - cost;
            let leftover = trade.seller_reserved - qty;
            if refund < Decimal::ZERO {
                return Err(ExchangeError::InsufficientFunds {
                    symbol: quote.clone(),
                    available: trade.buyer_reserved,
                    requested: cost,
                });
            }
            if leftover < Decimal::ZERO {
                return Err(ExchangeError::InsufficientFunds {
                    symbol: base.clone(),
                    available: trade.seller_reserved,
                    requested: qty,
                });
            }

            let buyer_quote = state.staged(&mut staged, &trade.buyer, quote);
            buyer_quote.consume(quote, trade.buyer_reserved)?;
            buyer_quote.credit(refund)?;
            state.staged(&mut staged, &trade.buyer, base).credit(qty)?;
            let seller_base = state.staged(&mut staged, &trade.seller, base);
            seller_base.consume(base, trade.seller_reserved)?;
            seller_base.credit(leftover)?;
            state.staged(&mut staged, &trade.seller, quote).credit(cost)?;

            debug!(
                trade = %trade.id,
                buyer = %trade.buyer,
                seller = %trade.seller,
                %qty,
                %cost,
                "settled"
            );
        }

        state.commit(staged);
        Ok(())
    }
}
