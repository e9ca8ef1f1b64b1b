// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Ledger Store
//!
//! Durable record of wallets, balances, references and transactions, backed
//! by an embedded redb database. This module is the single source of truth
//! for balance mutations: the deposit matcher, allocation workflow and
//! conversion engine all request mutations through [`LedgerDb`] rather than
//! writing balances directly, which keeps one enforcement point for the
//! non-negative-balance invariant.

pub mod db;
pub mod entry;
pub mod error;
pub mod reference;
pub mod wallet;

pub use db::LedgerDb;
pub use entry::{EntryKind, LedgerEntry};
pub use error::{LedgerError, LedgerResult};
pub use reference::{ReferenceStatus, ReferenceType, UniqueReference};
pub use wallet::{UserInfo, Wallet, WalletStatus, WalletType};
