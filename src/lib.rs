pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logger;
pub mod registry;
pub mod seed;
pub mod websocket;

pub use config::{ExchangeConfig, Settings};
pub use engine::{Exchange, OrderPlacement, PlaceOrder};
pub use error::{ExchangeError, Result};
pub use ledger::Ledger;
pub use registry::TokenRegistry;
