use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    MarketSummary, Order, OrderBookDepth, Symbol, Token, TokenMeta, Trade, TradingPair,
    Transaction,
};
use crate::engine::{Exchange, OrderPlacement, PlaceOrder};
use crate::error::ExchangeError;
use crate::ledger::AccountBalance;
use crate::websocket::{create_broadcast, publish_market, websocket_handler, BroadcastTx};

const DEFAULT_DEPTH: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<Exchange>,
    pub broadcast: BroadcastTx,
}

impl AppState {
    pub fn new(exchange: Arc<Exchange>) -> Self {
        Self {
            exchange,
            broadcast: create_broadcast(),
        }
    }
}

/// `ExchangeError` rendered as `{"error": "..."}` with a matching status code.
pub struct ApiError(ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ExchangeError::InvalidPrice(_)
            | ExchangeError::InvalidQuantity { .. }
            | ExchangeError::InvalidToken(_)
            | ExchangeError::InvalidPair(_) => StatusCode::BAD_REQUEST,
            ExchangeError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            ExchangeError::NotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::DuplicateSymbol(_) | ExchangeError::DuplicateOrderId(_) => {
                StatusCode::CONFLICT
            }
            ExchangeError::InsufficientFunds { .. }
            | ExchangeError::SupplyExceeded { .. }
            | ExchangeError::NotTransferable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub account: String,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub symbol: Symbol,
    pub amount: Decimal,
    /// Destination of a withdrawal.
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to: String,
    pub symbol: Symbol,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub issuer: String,
    #[serde(flatten)]
    pub meta: TokenMeta,
}

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub issuer: String,
    pub amount: Decimal,
}

fn parse_pair(raw: &str) -> Result<TradingPair, ApiError> {
    Ok(raw.parse::<TradingPair>()?)
}

fn parse_symbol(raw: &str) -> Result<Symbol, ApiError> {
    Ok(Symbol::parse(raw)?)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn markets_handler(State(state): State<AppState>) -> Json<Vec<MarketSummary>> {
    Json(state.exchange.markets())
}

async fn orderbook_handler(
    State(state): State<AppState>,
    Path(pair): Path<String>,
    Query(query): Query<DepthQuery>,
) -> ApiResult<OrderBookDepth> {
    let pair = parse_pair(&pair)?;
    let depth = query.depth.unwrap_or(DEFAULT_DEPTH);
    Ok(Json(state.exchange.order_book(&pair, depth)?))
}

async fn trades_handler(
    State(state): State<AppState>,
    Path(pair): Path<String>,
) -> ApiResult<Vec<Trade>> {
    let pair = parse_pair(&pair)?;
    Ok(Json(state.exchange.trades(&pair)?))
}

async fn place_order_handler(
    State(state): State<AppState>,
    Json(req): Json<PlaceOrder>,
) -> ApiResult<OrderPlacement> {
    let pair = req.pair.clone();
    let placement = state.exchange.place_order(req)?;
    publish_market(&state.broadcast, &state.exchange, &pair, &placement.trades);
    Ok(Json(placement))
}

async fn get_order_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Order> {
    Ok(Json(state.exchange.order(id)?))
}

async fn cancel_order_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<CancelQuery>,
) -> ApiResult<Order> {
    let order = state.exchange.cancel_order(&query.account, id)?;
    publish_market(&state.broadcast, &state.exchange, &order.pair, &[]);
    Ok(Json(order))
}

async fn open_orders_handler(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Json<Vec<Order>> {
    Json(state.exchange.open_orders(&account))
}

async fn balances_handler(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Json<Vec<AccountBalance>> {
    Json(state.exchange.balances(&account))
}

async fn transactions_handler(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Json<Vec<Transaction>> {
    Json(state.exchange.transactions(&account))
}

async fn deposit_handler(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<Transaction> {
    Ok(Json(state.exchange.deposit(&account, &req.symbol, req.amount)?))
}

async fn withdraw_handler(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<Transaction> {
    Ok(Json(state.exchange.withdraw(
        &account,
        &req.symbol,
        req.amount,
        req.address,
    )?))
}

async fn transfer_handler(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<Transaction> {
    Ok(Json(state.exchange.transfer(
        &account,
        &req.to,
        &req.symbol,
        req.amount,
    )?))
}

async fn tokens_handler(State(state): State<AppState>) -> Json<Vec<Token>> {
    Json(state.exchange.tokens())
}

async fn token_handler(State(state): State<AppState>, Path(symbol): Path<String>) -> ApiResult<Token> {
    let symbol = parse_symbol(&symbol)?;
    Ok(Json(state.exchange.token(&symbol)?))
}

async fn create_token_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<Token>), ApiError> {
    let token = state.exchange.create_token(&req.issuer, req.meta)?;
    Ok((StatusCode::CREATED, Json(token)))
}

async fn issue_handler(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(req): Json<IssueRequest>,
) -> ApiResult<Token> {
    let symbol = parse_symbol(&symbol)?;
    Ok(Json(state.exchange.issue(&req.issuer, &symbol, req.amount)?))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/markets", get(markets_handler))
        .route("/orderbook/:pair", get(orderbook_handler))
        .route("/trades/:pair", get(trades_handler))
        .route("/orders", post(place_order_handler))
        .route("/orders/:id", get(get_order_handler).delete(cancel_order_handler))
        .route("/accounts/:account/orders", get(open_orders_handler))
        .route("/accounts/:account/balances", get(balances_handler))
        .route("/accounts/:account/transactions", get(transactions_handler))
        .route("/accounts/:account/deposit", post(deposit_handler))
        .route("/accounts/:account/withdraw", post(withdraw_handler))
        .route("/accounts/:account/transfer", post(transfer_handler))
        .route("/tokens", get(tokens_handler).post(create_token_handler))
        .route("/tokens/:symbol", get(token_handler))
        .route("/tokens/:symbol/issue", post(issue_handler))
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> eyre::Result<()> {
    let app = router(state);

    info!("Blurt Engine listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
