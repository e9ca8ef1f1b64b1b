// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ledger error type shared by all storage-backed operations.

use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("wallet {wallet_id} has insufficient funds")]
    InsufficientFunds { wallet_id: String },

    #[error("wallet {wallet_id} is not active")]
    WalletFrozen { wallet_id: String },

    #[error("reference generation exhausted after {attempts} attempts")]
    ReferenceExhausted { attempts: u32 },

    #[error("{entity} {id} is in state {state}, operation not allowed")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
    },

    #[error("user {approver_id} is not an approver on this proposal")]
    NotAnApprover { approver_id: String },

    #[error("amount must be a positive decimal, got {amount}")]
    InvalidAmount { amount: Decimal },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
