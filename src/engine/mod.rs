pub mod exchange;
pub mod matching_engine;

pub use exchange::{Exchange, OrderPlacement, PlaceOrder};
pub use matching_engine::MatchingEngine;
