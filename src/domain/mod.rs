pub mod order;
pub mod pair;
pub mod snapshot;
pub mod token;
pub mod trade;
pub mod transaction;

pub use order::{order_value, Order, OrderSide, OrderStatus};
pub use pair::TradingPair;
pub use snapshot::{MarketSnapshot, MarketSummary, OrderBookDepth, PriceLevel};
pub use token::{fits_precision, Symbol, Token, TokenMeta, MAX_PRECISION, MAX_SUPPLY};
pub use trade::Trade;
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
