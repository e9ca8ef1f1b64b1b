// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `wallets`: wallet_id → serialized Wallet
//! - `wallet_keys`: composite key (user|tenant|broker|type|currency) → wallet_id
//! - `entries`: entry_id → serialized LedgerEntry
//! - `wallet_entry_index`: composite key (wallet_id|!timestamp_millis|entry_id) → entry kind
//! - `references`: reference string → serialized UniqueReference
//! - `persistent_refs`: composite key (user|tenant|broker|currency) → reference string
//! - `unallocated`: deposit_id → serialized UnallocatedDeposit
//! - `bank_records`: bank record id → disposition ("credited"|"unallocated")
//! - `proposals`: proposal_id → serialized AllocationProposal
//!
//! All balance mutations go through a single `begin_write()` transaction.
//! redb serializes writers, which is what gives per-wallet mutation ordering,
//! insert-or-fetch reference creation, and at-most-once allocation execution
//! their correctness under concurrent callers.

use std::path::Path;

use redb::{Database, TableDefinition};

use super::error::LedgerResult;

/// Primary wallet table: wallet_id → serialized Wallet (JSON bytes).
pub(crate) const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

/// Uniqueness index: `user|tenant|broker|wallet_type|currency` → wallet_id.
/// Insert-or-fetch against this table is what makes provisioning idempotent.
pub(crate) const WALLET_KEYS: TableDefinition<&str, &str> = TableDefinition::new("wallet_keys");

/// Append-only ledger entries: entry_id → serialized LedgerEntry.
pub(crate) const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Index: composite key → entry kind string.
/// Key format: `wallet_id|!timestamp_millis_be|entry_id` for descending-time scans.
pub(crate) const WALLET_ENTRY_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("wallet_entry_index");

/// Payment references: reference string → serialized UniqueReference.
pub(crate) const REFERENCES: TableDefinition<&str, &[u8]> = TableDefinition::new("references");

/// Persistent reference uniqueness index:
/// `user|tenant|broker|currency` → reference string.
pub(crate) const PERSISTENT_REFS: TableDefinition<&str, &str> =
    TableDefinition::new("persistent_refs");

/// Unallocated deposits awaiting manual allocation: deposit_id → JSON bytes.
pub(crate) const UNALLOCATED: TableDefinition<&str, &[u8]> = TableDefinition::new("unallocated");

/// Bank record dedup: bank record id → disposition.
/// A scrape run that re-delivers a record already present here is a no-op.
pub(crate) const BANK_RECORDS: TableDefinition<&str, &str> = TableDefinition::new("bank_records");

/// Allocation proposals: proposal_id → serialized AllocationProposal.
pub(crate) const PROPOSALS: TableDefinition<&str, &[u8]> = TableDefinition::new("proposals");

/// Build a composite key for the wallet_entry_index table.
///
/// Format: `wallet_id | inverted_timestamp_millis_be_bytes | entry_id`
///
/// The inverted timestamp ensures newest-first ordering when scanning
/// forward; millisecond granularity keeps entries written in the same
/// second in creation order.
pub(crate) fn make_entry_index_key(wallet_id: &str, timestamp_millis: i64, entry_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(wallet_id.len() + 1 + 8 + 1 + entry_id.len());
    key.extend_from_slice(wallet_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!timestamp_millis as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(entry_id.as_bytes());
    key
}

/// Build a prefix key for range scanning all entries of a wallet.
pub(crate) fn make_entry_prefix(wallet_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(wallet_id.len() + 1);
    prefix.extend_from_slice(wallet_id.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Build the upper bound for a range scan (prefix with 0xFF bytes appended).
pub(crate) fn make_entry_prefix_end(wallet_id: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(wallet_id.len() + 1 + 20);
    end.extend_from_slice(wallet_id.as_bytes());
    end.push(b'|');
    end.extend_from_slice(&[0xFF; 20]);
    end
}

/// Extract the entry_id portion from a composite index key.
///
/// The timestamp bytes can contain the separator byte themselves, so the id
/// is sliced at a fixed offset past the wallet id, never by delimiter search.
pub(crate) fn extract_entry_id_from_key(key: &[u8], wallet_id: &str) -> Option<String> {
    let offset = wallet_id.len() + 1 + 8 + 1;
    if key.len() <= offset || !key.starts_with(wallet_id.as_bytes()) {
        return None;
    }
    String::from_utf8(key[offset..].to_vec()).ok()
}

/// Join scoping parts into a composite string key.
///
/// Parts must not contain `|`; caller-supplied IDs are validated at the API
/// boundary before they reach the ledger.
pub(crate) fn scope_key(parts: &[&str]) -> String {
    parts.join("|")
}

/// Embedded ACID ledger database.
///
/// All domain operations (wallet mutation, reference issuance, deposit
/// matching, allocation execution) are implemented as methods on this type in
/// their respective modules; this is the single enforcement point for the
/// non-negative-balance invariant.
pub struct LedgerDb {
    pub(crate) db: Database,
}

impl LedgerDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(WALLET_KEYS)?;
            let _ = write_txn.open_table(ENTRIES)?;
            let _ = write_txn.open_table(WALLET_ENTRY_INDEX)?;
            let _ = write_txn.open_table(REFERENCES)?;
            let _ = write_txn.open_table(PERSISTENT_REFS)?;
            let _ = write_txn.open_table(UNALLOCATED)?;
            let _ = write_txn.open_table(BANK_RECORDS)?;
            let _ = write_txn.open_table(PROPOSALS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}
