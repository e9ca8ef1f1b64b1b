// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deposit reconciliation: bank scraping, reference matching and the manual
//! allocation workflow for deposits that could not be matched.

pub mod allocation;
pub mod bank;
pub mod matcher;

pub use allocation::{
    AllocationProposal, ProposalStatus, UnallocatedDeposit, UnallocatedStatus,
};
pub use bank::{BankClient, BankDepositRecord, BankError, HttpBankClient, ScrapeRequest};
pub use matcher::{
    scrape_and_apply, DepositDisposition, DepositOutcome, MatchOutcome, ScrapeApplyReport,
};
