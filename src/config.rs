use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use eyre::{eyre, WrapErr};
use rust_decimal::Decimal;

use crate::domain::{Symbol, TokenMeta};
use crate::engine::matching_engine::DEFAULT_CLOSED_HISTORY;
use crate::ledger::DEFAULT_TRANSACTION_HISTORY;

/// Parameters of the exchange core.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Native token, registered at start-up; every created token is listed against it.
    pub native_token: TokenMeta,
    /// Charged in the native token when a token is created.
    pub creation_fee: Decimal,
    /// Receives fees and issues the native token.
    pub fee_account: String,
    /// Recent trades kept per pair.
    pub max_trade_history: usize,
    /// Filled and cancelled orders kept per pair for lookups and duplicate id checks.
    pub max_closed_orders: usize,
    /// Wallet transactions kept across all accounts.
    pub max_transactions: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            native_token: TokenMeta {
                symbol: Symbol::parse("BLURT").expect("valid symbol"),
                name: "Blurt".to_string(),
                precision: 3,
                max_supply: Decimal::from(1_000_000_000u64),
                url: Some("https://blurt.blog".to_string()),
                description: None,
                transferable: true,
                stakeable: true,
            },
            creation_fee: Decimal::ONE_HUNDRED,
            fee_account: "engine".to_string(),
            max_trade_history: 1000,
            max_closed_orders: DEFAULT_CLOSED_HISTORY,
            max_transactions: DEFAULT_TRANSACTION_HISTORY,
        }
    }
}

/// Process settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: IpAddr,
    pub port: u16,
    /// Daily log files are written here when set.
    pub log_dir: Option<PathBuf>,
    pub exchange: ExchangeConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            log_dir: None,
            exchange: ExchangeConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> eyre::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let defaults = Settings::default();
        let mut exchange = defaults.exchange;

        if let Some(raw) = lookup("BLURT_NATIVE_TOKEN") {
            exchange.native_token.symbol =
                Symbol::parse(&raw).map_err(|e| eyre!("BLURT_NATIVE_TOKEN: {}", e))?;
            exchange.native_token.name = exchange.native_token.symbol.to_string();
        }
        exchange.native_token.precision =
            parse_or(&lookup, "BLURT_NATIVE_PRECISION", exchange.native_token.precision)?;
        exchange.native_token.max_supply =
            parse_or(&lookup, "BLURT_NATIVE_MAX_SUPPLY", exchange.native_token.max_supply)?;
        exchange.creation_fee = parse_or(&lookup, "BLURT_TOKEN_CREATION_FEE", exchange.creation_fee)?;
        exchange.max_trade_history =
            parse_or(&lookup, "BLURT_TRADE_HISTORY", exchange.max_trade_history)?;
        exchange.max_closed_orders =
            parse_or(&lookup, "BLURT_CLOSED_ORDER_HISTORY", exchange.max_closed_orders)?;
        exchange.max_transactions =
            parse_or(&lookup, "BLURT_TRANSACTION_HISTORY", exchange.max_transactions)?;
        if let Some(account) = lookup("BLURT_FEE_ACCOUNT") {
            exchange.fee_account = account;
        }

        exchange
            .native_token
            .validate()
            .map_err(|e| eyre!("native token: {}", e))?;
        if exchange.creation_fee < Decimal::ZERO {
            return Err(eyre!("BLURT_TOKEN_CREATION_FEE must not be negative"));
        }

        Ok(Self {
            host: parse_or(&lookup, "BLURT_ENGINE_HOST", defaults.host)?,
            port: parse_or(&lookup, "BLURT_ENGINE_PORT", defaults.port)?,
            log_dir: lookup("BLURT_LOG_DIR").map(PathBuf::from),
            exchange,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> eyre::Result<T>
where
    T: FromStr,
    T::Err: Display + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| eyre!("{}", e))
            .wrap_err_with(|| format!("invalid value {raw:?} for {key}")),
        None => Ok(default),
    }
}
