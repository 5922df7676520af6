use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::Symbol;

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Errors reported by the order books, the ledger and the token registry.
///
/// Every failing operation leaves the state it touched unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("Insufficient {symbol} funds: available {available}, requested {requested}")]
    InsufficientFunds {
        symbol: Symbol,
        available: Decimal,
        requested: Decimal,
    },
    #[error("Price must be positive, got {0}")]
    InvalidPrice(Decimal),
    #[error("Quantity {quantity} must be positive with at most {precision} decimal places")]
    InvalidQuantity { quantity: Decimal, precision: u32 },
    #[error("Token {0} already exists")]
    DuplicateSymbol(Symbol),
    #[error("Issuing {requested} {symbol} exceeds max supply {max_supply} (issued {issued})")]
    SupplyExceeded {
        symbol: Symbol,
        requested: Decimal,
        issued: Decimal,
        max_supply: Decimal,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("Account {account} is not allowed to {action}")]
    Unauthorized { account: String, action: String },
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Invalid trading pair: {0}")]
    InvalidPair(String),
    #[error("Token {0} is not transferable")]
    NotTransferable(Symbol),
    #[error("Order id {0} is already in use")]
    DuplicateOrderId(Uuid),
}

impl ExchangeError {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        ExchangeError::NotFound(what.to_string())
    }

    pub(crate) fn unauthorized(account: &str, action: impl Into<String>) -> Self {
        ExchangeError::Unauthorized {
            account: account.to_string(),
            action: action.into(),
        }
    }
}
