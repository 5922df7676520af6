use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

/// Finest precision a token may declare.
pub const MAX_PRECISION: u32 = 8;

/// Largest max supply a token may declare.
pub const MAX_SUPPLY: u64 = 1_000_000_000_000_000_000;

/// Token symbol, e.g. `BLURT` or `SWAP.BTC`. Always uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub const MAX_LEN: usize = 16;

    pub fn parse(raw: &str) -> Result<Self> {
        let s = raw.trim().to_uppercase();
        if s.is_empty() || s.len() > Self::MAX_LEN {
            return Err(ExchangeError::InvalidToken(format!(
                "symbol {raw:?} must be 1 to {} characters",
                Self::MAX_LEN
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(ExchangeError::InvalidToken(format!(
                "symbol {raw:?} may only contain letters, digits and '.'"
            )));
        }
        if s.starts_with('.') || s.ends_with('.') {
            return Err(ExchangeError::InvalidToken(format!(
                "symbol {raw:?} cannot start or end with '.'"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        Symbol::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ExchangeError;

    fn try_from(s: String) -> Result<Self> {
        Symbol::parse(&s)
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> Self {
        s.0
    }
}

/// True if `amount` has no more decimal places than `precision`.
pub fn fits_precision(amount: Decimal, precision: u32) -> bool {
    amount.normalize().scale() <= precision
}

fn default_transferable() -> bool {
    true
}

/// Metadata supplied when a token is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMeta {
    pub symbol: Symbol,
    pub name: String,
    pub precision: u32,
    pub max_supply: Decimal,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_transferable")]
    pub transferable: bool,
    #[serde(default)]
    pub stakeable: bool,
}

impl TokenMeta {
    pub fn new(symbol: Symbol, name: impl Into<String>, precision: u32, max_supply: Decimal) -> Self {
        Self {
            symbol,
            name: name.into(),
            precision,
            max_supply,
            url: None,
            description: None,
            transferable: true,
            stakeable: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ExchangeError::InvalidToken("name cannot be empty".into()));
        }
        if self.precision > MAX_PRECISION {
            return Err(ExchangeError::InvalidToken(format!(
                "precision {} exceeds {MAX_PRECISION}",
                self.precision
            )));
        }
        if self.max_supply <= Decimal::ZERO {
            return Err(ExchangeError::InvalidToken(format!(
                "max supply {} must be positive",
                self.max_supply
            )));
        }
        if self.max_supply > Decimal::from(MAX_SUPPLY) {
            return Err(ExchangeError::InvalidToken(format!(
                "max supply {} exceeds {MAX_SUPPLY}",
                self.max_supply
            )));
        }
        if !fits_precision(self.max_supply, self.precision) {
            return Err(ExchangeError::InvalidToken(format!(
                "max supply {} has more than {} decimal places",
                self.max_supply, self.precision
            )));
        }
        Ok(())
    }
}

/// A registered token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    #[serde(flatten)]
    pub meta: TokenMeta,
    pub issuer: String,
    pub issued_supply: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Token {
    pub fn new(meta: TokenMeta, issuer: impl Into<String>) -> Self {
        Self {
            meta,
            issuer: issuer.into(),
            issued_supply: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.meta.symbol
    }

    pub fn precision(&self) -> u32 {
        self.meta.precision
    }

    pub fn remaining_supply(&self) -> Decimal {
        self.meta.max_supply - self.issued_supply
    }

    /// Rejects non-positive amounts and amounts finer than the token precision.
    pub fn check_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO || !fits_precision(amount, self.meta.precision) {
            return Err(ExchangeError::InvalidQuantity {
                quantity: amount,
                precision: self.meta.precision,
            });
        }
        Ok(())
    }

    /// Like [`Token::check_amount`], and also rejects amounts above the max
    /// supply, which no single movement of the token can exceed.
    pub fn check_movement(&self, amount: Decimal) -> Result<()> {
        self.check_amount(amount)?;
        if amount > self.meta.max_supply {
            return Err(ExchangeError::InvalidQuantity {
                quantity: amount,
                precision: self.meta.precision,
            });
        }
        Ok(())
    }
}
