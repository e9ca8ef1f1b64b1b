// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Pool Ledger
//!
//! Wallet and ledger service for broker pool accounts: unique payment
//! references, bank deposit matching, multi-signature allocation of
//! unallocated funds, and quote-then-confirm currency conversion.
//!
//! ## Architecture
//!
//! - [`ledger`] — the single source of truth for wallets, balances,
//!   references and entries, backed by an embedded redb database
//! - [`reconcile`] — bank scraping, deposit matching and the allocation
//!   workflow for deposits that could not be matched
//! - [`convert`] — rate sources, server-held quotes and atomic conversion
//! - [`idempotency`] — retry-safe response replay for mutating endpoints
//! - [`audit`] — append-only JSONL audit trail
//! - [`report`] — CSV statements and FIFO/LIFO tax reports
//! - [`api`] + [`auth`] — the axum HTTP surface and JWT session handling

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod convert;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod reconcile;
pub mod report;
pub mod state;
