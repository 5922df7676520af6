use std::sync::Arc;

use color_eyre::eyre;
use structopt::StructOpt;
use tracing::info;

use blurt_engine::config::Settings;
use blurt_engine::domain::OrderBookDepth;
use blurt_engine::engine::Exchange;
use blurt_engine::gateway::{self, AppState};
use blurt_engine::logger::init_tracing;
use blurt_engine::seed::seed_demo;

#[derive(Debug, StructOpt)]
#[structopt(name = "blurt-engine", about = "Token exchange engine for the Blurt blockchain")]
enum Command {
    /// Start the HTTP/WebSocket gateway
    Serve {
        /// Overrides BLURT_ENGINE_PORT
        #[structopt(short, long)]
        port: Option<u16>,
        /// Load demo tokens, wallets and a BLT order book before serving
        #[structopt(long)]
        demo: bool,
    },
    /// Seed the demo data and print the resulting markets
    Demo,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let mut settings = Settings::from_env()?;
    let _guards = init_tracing(settings.log_dir.as_deref())?;

    match Command::from_args() {
        Command::Serve { port, demo } => {
            if let Some(port) = port {
                settings.port = port;
            }
            serve(settings, demo).await
        }
        Command::Demo => demo(settings),
    }
}

async fn serve(settings: Settings, demo: bool) -> eyre::Result<()> {
    let exchange = Exchange::new(settings.exchange.clone())?;
    if demo {
        seed_demo(&exchange)?;
    }
    info!(
        native = %exchange.native_symbol(),
        fee = %settings.exchange.creation_fee,
        "exchange ready"
    );

    let state = AppState::new(Arc::new(exchange));
    gateway::serve(state, settings.bind_addr()).await
}

fn demo(settings: Settings) -> eyre::Result<()> {
    let exchange = Exchange::new(settings.exchange)?;
    let pair = seed_demo(&exchange)?;

    println!("{:<16} {:>12} {:>12} {:>12}", "MARKET", "BID", "ASK", "LAST");
    for m in exchange.markets() {
        println!(
            "{:<16} {:>12} {:>12} {:>12}",
            m.pair.to_string(),
            fmt_opt(m.best_bid),
            fmt_opt(m.best_ask),
            fmt_opt(m.last_price),
        );
    }
    println!();
    print_depth(&exchange.order_book(&pair, 10)?);
    Ok(())
}

fn print_depth(depth: &OrderBookDepth) {
    println!("{} order book", depth.pair);
    println!("{:>10} {:>12} {:>12}", "PRICE", "QUANTITY", "TOTAL");
    for level in depth.asks.iter().rev() {
        println!("{:>10} {:>12} {:>12}  ask", level.price, level.quantity, level.total);
    }
    println!("{:-<36}", "");
    for level in &depth.bids {
        println!("{:>10} {:>12} {:>12}  bid", level.price, level.quantity, level.total);
    }
}

fn fmt_opt(value: Option<rust_decimal::Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
