use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    TransferIn,
    TransferOut,
    Issue,
    Fee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Failed,
}

/// Wallet history entry. Trades are kept in the order books, not here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account: String,
    pub kind: TransactionKind,
    pub symbol: Symbol,
    pub amount: Decimal,
    /// Withdrawal address, or the other account of a transfer or fee.
    pub counterparty: Option<String>,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        account: &str,
        kind: TransactionKind,
        symbol: &Symbol,
        amount: Decimal,
        counterparty: Option<String>,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account: account.to_string(),
            kind,
            symbol: symbol.clone(),
            amount,
            counterparty,
            status,
            timestamp: Utc::now(),
        }
    }
}
