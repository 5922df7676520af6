//! Token metadata and supply bookkeeping.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::{Symbol, Token, TokenMeta};
use crate::error::{ExchangeError, Result};
use crate::ledger::Ledger;

#[derive(Default)]
pub struct TokenRegistry {
    tokens: RwLock<BTreeMap<Symbol, Token>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token with zero issued supply.
    pub fn create_token(&self, meta: TokenMeta, issuer: &str) -> Result<Token> {
        meta.validate()?;
        let mut tokens = self.tokens.write();
        if tokens.contains_key(&meta.symbol) {
            return Err(ExchangeError::DuplicateSymbol(meta.symbol));
        }
        let token = Token::new(meta, issuer);
        info!(
            symbol = %token.symbol(),
            issuer,
            precision = token.precision(),
            max_supply = %token.meta.max_supply,
            "token created"
        );
        tokens.insert(token.symbol().clone(), token.clone());
        Ok(token)
    }

    /// Issues new supply and credits it to the issuer's balance.
    pub fn issue(&self, ledger: &Ledger, symbol: &Symbol, amount: Decimal, issuer: &str) -> Result<Token> {
        let mut tokens = self.tokens.write();
        let token = tokens
            .get_mut(symbol)
            .ok_or_else(|| ExchangeError::not_found(format!("Token {symbol}")))?;
        if token.issuer != issuer {
            return Err(ExchangeError::unauthorized(issuer, format!("issue {symbol}")));
        }
        token.check_amount(amount)?;
        let issued = token
            .issued_supply
            .checked_add(amount)
            .filter(|issued| *issued <= token.meta.max_supply);
        let Some(issued) = issued else {
            return Err(ExchangeError::SupplyExceeded {
                symbol: symbol.clone(),
                requested: amount,
                issued: token.issued_supply,
                max_supply: token.meta.max_supply,
            });
        };

        ledger.issue(issuer, symbol, amount)?;
        token.issued_supply = issued;
        info!(%symbol, issuer, %amount, issued = %token.issued_supply, "supply issued");
        Ok(token.clone())
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.tokens.read().contains_key(symbol)
    }

    pub fn get(&self, symbol: &Symbol) -> Result<Token> {
        self.tokens
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found(format!("Token {symbol}")))
    }

    /// All tokens, sorted by symbol.
    pub fn list(&self) -> Vec<Token> {
        self.tokens.read().values().cloned().collect()
    }

    pub fn issued_by(&self, account: &str) -> Vec<Token> {
        self.tokens
            .read()
            .values()
            .filter(|t| t.issuer == account)
            .cloned()
            .collect()
    }
}
