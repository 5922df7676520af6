use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::{OrderBookDepth, Trade, TradingPair};
use crate::engine::Exchange;
use crate::gateway::AppState;

/// Price levels per side pushed to feed subscribers.
pub const FEED_DEPTH: usize = 20;

pub type BroadcastTx = broadcast::Sender<WebSocketMessage>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WebSocketMessage {
    OrderBook(OrderBookDepth),
    // only the trades of the last update, not the whole history
    Trades { pair: TradingPair, trades: Vec<Trade> },
}

pub fn create_broadcast() -> BroadcastTx {
    broadcast::channel(100).0
}

/// Pushes the current depth of `pair`, and `trades` if there are any.
pub fn publish_market(tx: &BroadcastTx, exchange: &Exchange, pair: &TradingPair, trades: &[Trade]) {
    // no subscribers is not an error
    if let Ok(depth) = exchange.order_book(pair, FEED_DEPTH) {
        let _ = tx.send(WebSocketMessage::OrderBook(depth));
    }
    if !trades.is_empty() {
        let _ = tx.send(WebSocketMessage::Trades {
            pair: pair.clone(),
            trades: trades.to_vec(),
        });
    }
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &WebSocketMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!("failed to encode feed message: {}", e);
            Ok(())
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    // subscribe before the snapshot so no update falls in between
    let mut rx = state.broadcast.subscribe();

    let initial: Vec<WebSocketMessage> = state
        .exchange
        .markets()
        .into_iter()
        .filter_map(|m| state.exchange.order_book(&m.pair, FEED_DEPTH).ok())
        .map(WebSocketMessage::OrderBook)
        .collect();
    for msg in &initial {
        if send_json(&mut sender, msg).await.is_err() {
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if send_json(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client lagging behind the feed");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // drain client frames until it closes
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
    debug!("websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::domain::{Symbol, TokenMeta};
    use rust_decimal::Decimal;

    #[test]
    fn test_publish_market_sends_depth_and_trades() {
        let exchange = Exchange::new(ExchangeConfig::default()).unwrap();
        let blt = Symbol::parse("BLT").unwrap();
        exchange
            .create_token("engine", TokenMeta::new(blt.clone(), "Blurt Token", 3, Decimal::from(1000)))
            .unwrap();
        let pair = TradingPair::new(blt, exchange.native_symbol().clone()).unwrap();

        let tx = create_broadcast();
        let mut rx = tx.subscribe();
        publish_market(&tx, &exchange, &pair, &[]);
        match rx.try_recv().unwrap() {
            WebSocketMessage::OrderBook(depth) => assert_eq!(depth.pair, pair),
            other => panic!("unexpected message {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "no trades message without trades");

        let json = serde_json::to_value(WebSocketMessage::Trades { pair, trades: vec![] }).unwrap();
        assert_eq!(json["type"], "trades");
        assert_eq!(json["data"]["pair"], "BLT/BLURT");
    }
}
