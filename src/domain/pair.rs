use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::Symbol;
use crate::error::{ExchangeError, Result};

/// A market: `base` is bought and sold, prices are quoted in `quote`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradingPair {
    pub base: Symbol,
    pub quote: Symbol,
}

impl TradingPair {
    pub fn new(base: Symbol, quote: Symbol) -> Result<Self> {
        if base == quote {
            return Err(ExchangeError::InvalidPair(format!(
                "{base}/{quote}: base and quote must differ"
            )));
        }
        Ok(Self { base, quote })
    }

    /// Path-friendly form, e.g. `BLT-BLURT`.
    pub fn slug(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = ExchangeError;

    /// Accepts `BASE/QUOTE`, `BASE-QUOTE` and `BASE_QUOTE`.
    fn from_str(s: &str) -> Result<Self> {
        let (base, quote) = s
            .split_once(['/', '-', '_'])
            .ok_or_else(|| ExchangeError::InvalidPair(s.to_string()))?;
        let base = Symbol::parse(base).map_err(|_| ExchangeError::InvalidPair(s.to_string()))?;
        let quote = Symbol::parse(quote).map_err(|_| ExchangeError::InvalidPair(s.to_string()))?;
        TradingPair::new(base, quote)
    }
}

impl TryFrom<String> for TradingPair {
    type Error = ExchangeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TradingPair> for String {
    fn from(p: TradingPair) -> Self {
        p.to_string()
    }
}
