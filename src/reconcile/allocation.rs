// SPDX-License-Identifier: AGPL-3.0-or-later

//! Multi-signature allocation workflow for unallocated deposits.
//!
//! State machine: `pending → approved → executed`; `pending → rejected`;
//! `approved → rejected` (pre-execution only). Execution performs the ledger
//! credit, the proposal transition and the deposit transition in ONE redb
//! write transaction, guarded by a status check inside that transaction, so
//! concurrent execute calls credit the ledger at most once.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ledger::db::{LedgerDb, ENTRIES, PROPOSALS, UNALLOCATED, WALLETS, WALLET_ENTRY_INDEX};
use crate::ledger::entry::EntryKind;
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::wallet::apply_delta;
use crate::ledger::Wallet;

/// Lifecycle of an unallocated deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UnallocatedStatus {
    /// Awaiting a proposal.
    Pending,
    /// A proposal is in flight.
    Proposed,
    /// Terminal: credited to a wallet.
    Allocated,
    /// Terminal: allocation rejected.
    Rejected,
}

/// A bank deposit that could not be auto-matched to any active reference.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnallocatedDeposit {
    pub deposit_id: String,
    pub broker_id: String,
    pub amount: Decimal,
    pub currency: String,
    /// Raw bank narrative as scraped; kept verbatim for manual triage.
    pub raw_reference: String,
    pub status: UnallocatedStatus,
    pub received_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl UnallocatedDeposit {
    pub fn new(
        broker_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        raw_reference: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            deposit_id: uuid::Uuid::new_v4().to_string(),
            broker_id: broker_id.into(),
            amount,
            currency: currency.into(),
            raw_reference: raw_reference.into(),
            status: UnallocatedStatus::Pending,
            received_at,
            recorded_at: Utc::now(),
        }
    }
}

/// Proposal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Executed => "executed",
        }
    }
}

/// A multi-signature request to credit an unallocated deposit to a wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AllocationProposal {
    pub proposal_id: String,
    pub deposit_id: String,
    pub proposed_by: String,
    /// Wallet to credit on execution.
    pub target_wallet_id: String,
    pub amount: Decimal,
    pub approvals_required: u32,
    /// Users authorized to approve; invariant: approvals ⊆ approvers.
    pub approvers: Vec<String>,
    pub approvals: Vec<String>,
    pub status: ProposalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerDb {
    /// Persist a manually reported or scrape-produced unallocated deposit.
    pub fn record_unallocated_deposit(
        &self,
        deposit: &UnallocatedDeposit,
    ) -> LedgerResult<()> {
        if deposit.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: deposit.amount,
            });
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(UNALLOCATED)?;
            let json = serde_json::to_vec(deposit)?;
            table.insert(deposit.deposit_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up one unallocated deposit.
    pub fn get_unallocated_deposit(
        &self,
        deposit_id: &str,
    ) -> LedgerResult<Option<UnallocatedDeposit>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UNALLOCATED)?;
        match table.get(deposit_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// List unallocated deposits, optionally filtered by broker and status.
    pub fn list_unallocated_deposits(
        &self,
        broker_id: Option<&str>,
        status: Option<UnallocatedStatus>,
    ) -> LedgerResult<Vec<UnallocatedDeposit>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UNALLOCATED)?;

        let mut deposits = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let deposit: UnallocatedDeposit = serde_json::from_slice(value.value())?;
            if broker_id.is_some_and(|b| b != deposit.broker_id) {
                continue;
            }
            if status.is_some_and(|s| s != deposit.status) {
                continue;
            }
            deposits.push(deposit);
        }
        deposits.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(deposits)
    }

    /// Create a proposal to credit an unallocated deposit to a wallet.
    ///
    /// The deposit transitions to `proposed` in the same transaction, so two
    /// racing proposals for one deposit cannot both be created.
    pub fn create_allocation_proposal(
        &self,
        deposit_id: &str,
        proposed_by: &str,
        target_wallet_id: &str,
        amount: Decimal,
        approvals_required: u32,
        approvers: Vec<String>,
    ) -> LedgerResult<AllocationProposal> {
        let mut approvers = approvers;
        approvers.sort();
        approvers.dedup();

        if approvals_required < 1 {
            return Err(LedgerError::Validation(
                "approvals_required must be at least 1".to_string(),
            ));
        }
        if (approvals_required as usize) > approvers.len() {
            return Err(LedgerError::Validation(
                "approvals_required cannot exceed the number of approvers".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount { amount });
        }

        let write_txn = self.db.begin_write()?;
        let proposal = {
            let mut deposits = write_txn.open_table(UNALLOCATED)?;
            let mut proposals = write_txn.open_table(PROPOSALS)?;
            let wallets = write_txn.open_table(WALLETS)?;

            let raw = {
                let guard = deposits
                    .get(deposit_id)?
                    .ok_or_else(|| LedgerError::NotFound(format!("deposit {deposit_id}")))?;
                guard.value().to_vec()
            };
            let mut deposit: UnallocatedDeposit = serde_json::from_slice(&raw)?;
            if deposit.status != UnallocatedStatus::Pending {
                return Err(LedgerError::InvalidState {
                    entity: "deposit",
                    id: deposit_id.to_string(),
                    state: format!("{:?}", deposit.status).to_lowercase(),
                });
            }
            if amount > deposit.amount {
                return Err(LedgerError::Validation(
                    "proposed amount exceeds the deposit amount".to_string(),
                ));
            }
            if wallets.get(target_wallet_id)?.is_none() {
                return Err(LedgerError::NotFound(format!(
                    "wallet {target_wallet_id}"
                )));
            }

            let now = Utc::now();
            let proposal = AllocationProposal {
                proposal_id: uuid::Uuid::new_v4().to_string(),
                deposit_id: deposit_id.to_string(),
                proposed_by: proposed_by.to_string(),
                target_wallet_id: target_wallet_id.to_string(),
                amount,
                approvals_required,
                approvers,
                approvals: Vec::new(),
                status: ProposalStatus::Pending,
                rejection_reason: None,
                created_at: now,
                updated_at: now,
            };

            deposit.status = UnallocatedStatus::Proposed;
            let deposit_json = serde_json::to_vec(&deposit)?;
            deposits.insert(deposit_id, deposit_json.as_slice())?;

            let proposal_json = serde_json::to_vec(&proposal)?;
            proposals.insert(proposal.proposal_id.as_str(), proposal_json.as_slice())?;
            proposal
        };
        write_txn.commit()?;
        Ok(proposal)
    }

    /// Look up one proposal.
    pub fn get_allocation_proposal(
        &self,
        proposal_id: &str,
    ) -> LedgerResult<Option<AllocationProposal>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROPOSALS)?;
        match table.get(proposal_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Record one approval. Duplicate approvals from the same approver are
    /// no-ops; the proposal transitions to `approved` once the threshold is
    /// reached.
    pub fn approve_allocation_proposal(
        &self,
        proposal_id: &str,
        approver_id: &str,
    ) -> LedgerResult<AllocationProposal> {
        let write_txn = self.db.begin_write()?;
        let proposal = {
            let mut proposals = write_txn.open_table(PROPOSALS)?;
            let mut proposal = read_proposal(&proposals, proposal_id)?;

            if !matches!(
                proposal.status,
                ProposalStatus::Pending | ProposalStatus::Approved
            ) {
                return Err(invalid_proposal_state(&proposal));
            }
            if !proposal.approvers.iter().any(|a| a == approver_id) {
                return Err(LedgerError::NotAnApprover {
                    approver_id: approver_id.to_string(),
                });
            }

            if !proposal.approvals.iter().any(|a| a == approver_id) {
                proposal.approvals.push(approver_id.to_string());
                if proposal.approvals.len() >= proposal.approvals_required as usize {
                    proposal.status = ProposalStatus::Approved;
                }
                proposal.updated_at = Utc::now();
                let json = serde_json::to_vec(&proposal)?;
                proposals.insert(proposal_id, json.as_slice())?;
            }
            proposal
        };
        write_txn.commit()?;
        Ok(proposal)
    }

    /// Reject a proposal. Valid from `pending` or `approved` (pre-execution).
    /// The underlying deposit transitions to its terminal `rejected` state.
    pub fn reject_allocation_proposal(
        &self,
        proposal_id: &str,
        approver_id: &str,
        reason: &str,
    ) -> LedgerResult<AllocationProposal> {
        let write_txn = self.db.begin_write()?;
        let proposal = {
            let mut proposals = write_txn.open_table(PROPOSALS)?;
            let mut deposits = write_txn.open_table(UNALLOCATED)?;
            let mut proposal = read_proposal(&proposals, proposal_id)?;

            if !matches!(
                proposal.status,
                ProposalStatus::Pending | ProposalStatus::Approved
            ) {
                return Err(invalid_proposal_state(&proposal));
            }
            if !proposal.approvers.iter().any(|a| a == approver_id) {
                return Err(LedgerError::NotAnApprover {
                    approver_id: approver_id.to_string(),
                });
            }

            proposal.status = ProposalStatus::Rejected;
            proposal.rejection_reason = Some(reason.to_string());
            proposal.updated_at = Utc::now();
            let json = serde_json::to_vec(&proposal)?;
            proposals.insert(proposal_id, json.as_slice())?;

            let raw = deposits
                .get(proposal.deposit_id.as_str())?
                .map(|v| v.value().to_vec());
            if let Some(raw) = raw {
                let mut deposit: UnallocatedDeposit = serde_json::from_slice(&raw)?;
                deposit.status = UnallocatedStatus::Rejected;
                let deposit_json = serde_json::to_vec(&deposit)?;
                deposits.insert(proposal.deposit_id.as_str(), deposit_json.as_slice())?;
            }
            proposal
        };
        write_txn.commit()?;
        Ok(proposal)
    }

    /// Execute an approved proposal: credit the target wallet, mark the
    /// proposal executed and the deposit allocated, all in one transaction.
    ///
    /// The status check happens inside the write transaction, which redb
    /// serializes against all other writers, so a second concurrent execute
    /// observes `executed` and fails with `InvalidState` instead of crediting
    /// twice.
    pub fn execute_allocation(&self, proposal_id: &str) -> LedgerResult<(AllocationProposal, Wallet)> {
        let write_txn = self.db.begin_write()?;
        let (proposal, wallet) = {
            let mut proposals = write_txn.open_table(PROPOSALS)?;
            let mut deposits = write_txn.open_table(UNALLOCATED)?;
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut entries = write_txn.open_table(ENTRIES)?;
            let mut entry_index = write_txn.open_table(WALLET_ENTRY_INDEX)?;

            let mut proposal = read_proposal(&proposals, proposal_id)?;
            if proposal.status != ProposalStatus::Approved {
                return Err(invalid_proposal_state(&proposal));
            }

            let wallet = apply_delta(
                &mut wallets,
                &mut entries,
                &mut entry_index,
                &proposal.target_wallet_id,
                proposal.amount,
                EntryKind::Allocation,
                &proposal.deposit_id,
            )?;

            proposal.status = ProposalStatus::Executed;
            proposal.updated_at = Utc::now();
            let json = serde_json::to_vec(&proposal)?;
            proposals.insert(proposal_id, json.as_slice())?;

            let raw = {
                let guard = deposits
                    .get(proposal.deposit_id.as_str())?
                    .ok_or_else(|| {
                        LedgerError::NotFound(format!("deposit {}", proposal.deposit_id))
                    })?;
                guard.value().to_vec()
            };
            let mut deposit: UnallocatedDeposit = serde_json::from_slice(&raw)?;
            deposit.status = UnallocatedStatus::Allocated;
            let deposit_json = serde_json::to_vec(&deposit)?;
            deposits.insert(proposal.deposit_id.as_str(), deposit_json.as_slice())?;

            (proposal, wallet)
        };
        write_txn.commit()?;
        Ok((proposal, wallet))
    }
}

fn read_proposal(
    proposals: &redb::Table<'_, &str, &[u8]>,
    proposal_id: &str,
) -> LedgerResult<AllocationProposal> {
    let raw = {
        let guard = proposals
            .get(proposal_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("proposal {proposal_id}")))?;
        guard.value().to_vec()
    };
    Ok(serde_json::from_slice(&raw)?)
}

fn invalid_proposal_state(proposal: &AllocationProposal) -> LedgerError {
    LedgerError::InvalidState {
        entity: "proposal",
        id: proposal.proposal_id.clone(),
        state: proposal.status.as_str().to_string(),
    }
}
