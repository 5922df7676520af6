use rust_decimal::Decimal;
use tracing::info;

use crate::domain::{OrderSide, Symbol, TokenMeta, TradingPair};
use crate::engine::{Exchange, PlaceOrder};
use crate::error::Result;

pub const MARKET_MAKER: &str = "market-maker";
pub const DEMO_USER: &str = "blurtuser";

struct DemoToken {
    symbol: &'static str,
    name: &'static str,
    precision: u32,
    max_supply: u64,
    transferable: bool,
    stakeable: bool,
}

const TOKENS: &[DemoToken] = &[
    DemoToken { symbol: "BLT", name: "Blurt Token", precision: 3, max_supply: 100_000_000, transferable: true, stakeable: false },
    DemoToken { symbol: "BLD", name: "Blurt Dollars", precision: 3, max_supply: 10_000_000, transferable: true, stakeable: false },
    DemoToken { symbol: "BLP", name: "Blurt Power", precision: 3, max_supply: 50_000_000, transferable: false, stakeable: true },
    DemoToken { symbol: "SWAP.BTC", name: "Bitcoin", precision: 8, max_supply: 21_000_000, transferable: true, stakeable: false },
    DemoToken { symbol: "SWAP.ETH", name: "Ethereum", precision: 8, max_supply: 120_000_000, transferable: true, stakeable: false },
];

// (price, quantity), price in thousandths of the native token
const BIDS: &[(i64, i64)] = &[(95, 1000), (90, 2000), (85, 3000), (80, 5000), (75, 8000)];
const ASKS: &[(i64, i64)] = &[(105, 800), (110, 1500), (115, 2000), (120, 3000), (125, 5000)];

/// Wallet of the demo user as (symbol, mantissa, scale).
const WALLET: &[(&str, i64, u32)] = &[
    ("BLT", 5000, 0),
    ("SWAP.BTC", 125, 4),
    ("SWAP.ETH", 5, 1),
];

/// Registers the demo tokens, funds the demo accounts and rests a book on BLT.
/// Returns the BLT market.
pub fn seed_demo(exchange: &Exchange) -> Result<TradingPair> {
    let operator = exchange.config().fee_account.clone();
    let native = exchange.native_symbol().clone();

    for t in TOKENS {
        let symbol = Symbol::parse(t.symbol)?;
        let mut meta = TokenMeta::new(symbol.clone(), t.name, t.precision, Decimal::from(t.max_supply));
        meta.transferable = t.transferable;
        meta.stakeable = t.stakeable;
        exchange.create_token(&operator, meta)?;
        // a tenth of the supply is minted up front
        exchange.issue(&operator, &symbol, Decimal::from(t.max_supply / 10))?;
    }

    let blt = Symbol::parse("BLT")?;
    exchange.deposit(MARKET_MAKER, &native, Decimal::from(100_000))?;
    exchange.transfer(&operator, MARKET_MAKER, &blt, Decimal::from(100_000))?;

    exchange.deposit(DEMO_USER, &native, Decimal::new(1_245_320, 3))?;
    for &(symbol, mantissa, scale) in WALLET {
        let symbol = Symbol::parse(symbol)?;
        exchange.transfer(&operator, DEMO_USER, &symbol, Decimal::new(mantissa, scale))?;
    }

    let pair = TradingPair::new(blt, native)?;
    let levels = BIDS
        .iter()
        .map(|level| (OrderSide::Buy, level))
        .chain(ASKS.iter().map(|level| (OrderSide::Sell, level)));
    for (side, &(price, quantity)) in levels {
        exchange.place_order(PlaceOrder {
            client_order_id: None,
            account: MARKET_MAKER.to_string(),
            pair: pair.clone(),
            side,
            price: Decimal::new(price, 3),
            quantity: Decimal::from(quantity),
        })?;
    }

    info!(tokens = TOKENS.len(), %pair, "demo data seeded");
    Ok(pair)
}
