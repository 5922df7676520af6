use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Symbol, MAX_PRECISION};
use crate::error::{ExchangeError, Result};

/// Funds of one account in one token. Neither field is ever negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub available: Decimal,
    pub reserved: Decimal,
}

fn overflow(amount: Decimal) -> ExchangeError {
    ExchangeError::InvalidQuantity {
        quantity: amount,
        precision: MAX_PRECISION,
    }
}

impl Balance {
    /// Never overflows: every credit keeps `available + reserved` representable.
    pub fn total(&self) -> Decimal {
        self.available.saturating_add(self.reserved)
    }

    pub(crate) fn credit(&mut self, amount: Decimal) -> Result<()> {
        let available = self
            .available
            .checked_add(amount)
            .filter(|a| a.checked_add(self.reserved).is_some())
            .ok_or_else(|| overflow(amount))?;
        self.available = available;
        Ok(())
    }

    pub(crate) fn debit(&mut self, symbol: &Symbol, amount: Decimal) -> Result<()> {
        self.ensure_available(symbol, amount)?;
        self.available -= amount;
        Ok(())
    }

    /// available → reserved
    pub(crate) fn reserve(&mut self, symbol: &Symbol, amount: Decimal) -> Result<()> {
        self.ensure_available(symbol, amount)?;
        self.available -= amount;
        self.reserved += amount;
        Ok(())
    }

    /// reserved → available
    pub(crate) fn release(&mut self, symbol: &Symbol, amount: Decimal) -> Result<()> {
        self.ensure_reserved(symbol, amount)?;
        self.reserved -= amount;
        self.available += amount;
        Ok(())
    }

    /// Spends reserved funds.
    pub(crate) fn consume(&mut self, symbol: &Symbol, amount: Decimal) -> Result<()> {
        self.ensure_reserved(symbol, amount)?;
        self.reserved -= amount;
        Ok(())
    }

    pub(crate) fn ensure_available(&self, symbol: &Symbol, amount: Decimal) -> Result<()> {
        if self.available < amount {
            return Err(ExchangeError::InsufficientFunds {
                symbol: symbol.clone(),
                available: self.available,
                requested: amount,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_reserved(&self, symbol: &Symbol, amount: Decimal) -> Result<()> {
        if self.reserved < amount {
            return Err(ExchangeError::InsufficientFunds {
                symbol: symbol.clone(),
                available: self.reserved,
                requested: amount,
            });
        }
        Ok(())
    }
}

/// Balance row as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountBalance {
    pub symbol: Symbol,
    pub available: Decimal,
    pub reserved: Decimal,
    pub total: Decimal,
}

impl AccountBalance {
    pub(crate) fn new(symbol: Symbol, balance: Balance) -> Self {
        Self {
            symbol,
            available: balance.available,
            reserved: balance.reserved,
            total: balance.total(),
        }
    }
}
