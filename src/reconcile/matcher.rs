// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deposit reconciliation: match scraped bank records against payment
//! references and apply credits.
//!
//! Matching policy: exact reference-string match against an active,
//! non-expired reference of the same currency. The deposit AMOUNT is
//! deliberately not required to match the reference's expected amount —
//! depositors round, split, and overpay — so the actual deposited amount is
//! what gets credited. Amount mismatches are logged for audit.

use chrono::Utc;
use redb::{ReadableDatabase, ReadableTable};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::ledger::db::{
    scope_key, LedgerDb, BANK_RECORDS, ENTRIES, REFERENCES, UNALLOCATED, WALLETS,
    WALLET_ENTRY_INDEX, WALLET_KEYS,
};
use crate::ledger::entry::EntryKind;
use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::reference::consume_reference_in;
use crate::ledger::wallet::{apply_delta, WalletType};
use crate::ledger::UniqueReference;

use super::allocation::UnallocatedDeposit;
use super::bank::{BankClient, BankDepositRecord, BankError, ScrapeRequest};

/// Result of matching one deposit narrative against the reference table.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MatchOutcome {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_id: Option<String>,
}

impl MatchOutcome {
    fn unmatched() -> Self {
        Self {
            matched: false,
            reference: None,
            user_id: None,
            tenant_id: None,
            broker_id: None,
        }
    }

    fn from_reference(reference: &UniqueReference) -> Self {
        Self {
            matched: true,
            reference: Some(reference.reference.clone()),
            user_id: Some(reference.user_id.clone()),
            tenant_id: Some(reference.tenant_id.clone()),
            broker_id: Some(reference.broker_id.clone()),
        }
    }
}

/// How one bank record was handled by the apply pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DepositDisposition {
    /// Matched an active reference and credited the wallet.
    Credited,
    /// No matching reference; persisted for manual allocation.
    Unallocated,
    /// Record id already processed by an earlier run; no-op.
    Duplicate,
}

impl DepositDisposition {
    fn as_str(&self) -> &'static str {
        match self {
            DepositDisposition::Credited => "credited",
            DepositDisposition::Unallocated => "unallocated",
            DepositDisposition::Duplicate => "duplicate",
        }
    }
}

/// Outcome of processing one deposit record.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DepositOutcome {
    pub disposition: DepositDisposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_id: Option<String>,
}

/// Split a bank narrative into candidate reference tokens.
///
/// Depositors append noise ("ACME-JD-7F3K9Q rent march"), so the whole
/// narrative is tried first, then each whitespace token, uppercased.
fn candidate_tokens(raw_reference: &str) -> Vec<String> {
    let trimmed = raw_reference.trim().to_uppercase();
    let mut candidates = vec![trimmed.clone()];
    for token in trimmed.split_whitespace() {
        if token.len() >= 6 && !candidates.iter().any(|c| c == token) {
            candidates.push(token.to_string());
        }
    }
    candidates
}

impl LedgerDb {
    /// Match a deposit narrative against the reference table (read-only).
    ///
    /// Returns `matched: false` when no active, non-expired reference of the
    /// deposit's currency is found.
    pub fn auto_match_deposit(
        &self,
        raw_reference: &str,
        currency: &str,
    ) -> LedgerResult<MatchOutcome> {
        let read_txn = self.db.begin_read()?;
        let refs = read_txn.open_table(REFERENCES)?;
        let now = Utc::now();

        for candidate in candidate_tokens(raw_reference) {
            let Some(raw) = refs.get(candidate.as_str())? else {
                continue;
            };
            let reference: UniqueReference = serde_json::from_slice(raw.value())?;
            if reference.is_matchable(now) && reference.currency == currency {
                return Ok(MatchOutcome::from_reference(&reference));
            }
        }
        Ok(MatchOutcome::unmatched())
    }

    /// Apply one deposit record: credit on match, persist as unallocated
    /// otherwise. Idempotent per bank record id — re-delivered records are
    /// no-ops. All writes commit in one transaction.
    pub fn process_fiat_deposit(&self, record: &BankDepositRecord) -> LedgerResult<DepositOutcome> {
        if record.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: record.amount,
            });
        }

        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut bank_records = write_txn.open_table(BANK_RECORDS)?;
            let mut refs = write_txn.open_table(REFERENCES)?;
            let keys = write_txn.open_table(WALLET_KEYS)?;
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut entries = write_txn.open_table(ENTRIES)?;
            let mut entry_index = write_txn.open_table(WALLET_ENTRY_INDEX)?;
            let mut unallocated = write_txn.open_table(UNALLOCATED)?;

            if bank_records.get(record.record_id.as_str())?.is_some() {
                debug!(record_id = %record.record_id, "bank record already processed, skipping");
                return Ok(DepositOutcome {
                    disposition: DepositDisposition::Duplicate,
                    wallet_id: None,
                    reference: None,
                    deposit_id: None,
                });
            }

            let now = Utc::now();
            let mut matched: Option<UniqueReference> = None;
            for candidate in candidate_tokens(&record.raw_reference) {
                let raw = match refs.get(candidate.as_str())? {
                    Some(guard) => guard.value().to_vec(),
                    None => continue,
                };
                let reference: UniqueReference = serde_json::from_slice(&raw)?;
                if reference.is_matchable(now) && reference.currency == record.currency {
                    matched = Some(reference);
                    break;
                }
            }

            let target_wallet_id = match matched.as_ref() {
                Some(reference) => {
                    let scope = scope_key(&[
                        &reference.user_id,
                        &reference.tenant_id,
                        &reference.broker_id,
                        WalletType::Fiat.as_str(),
                        &reference.currency,
                    ]);
                    keys.get(scope.as_str())?.map(|v| v.value().to_string())
                }
                None => None,
            };

            match (matched, target_wallet_id) {
                (Some(reference), Some(wallet_id)) => {
                    if let Some(expected) = reference.expected_amount {
                        if expected != record.amount {
                            warn!(
                                reference = %reference.reference,
                                expected = %expected,
                                actual = %record.amount,
                                "deposit amount differs from expected; crediting actual amount"
                            );
                        }
                    }

                    let wallet = apply_delta(
                        &mut wallets,
                        &mut entries,
                        &mut entry_index,
                        &wallet_id,
                        record.amount,
                        EntryKind::Deposit,
                        &reference.reference,
                    )?;
                    consume_reference_in(&mut refs, &reference.reference)?;
                    bank_records.insert(
                        record.record_id.as_str(),
                        DepositDisposition::Credited.as_str(),
                    )?;

                    DepositOutcome {
                        disposition: DepositDisposition::Credited,
                        wallet_id: Some(wallet.wallet_id),
                        reference: Some(reference.reference),
                        deposit_id: None,
                    }
                }
                _ => {
                    let deposit = UnallocatedDeposit::new(
                        broker_for_record(record),
                        record.amount,
                        record.currency.clone(),
                        record.raw_reference.clone(),
                        record.received_at,
                    );
                    let json = serde_json::to_vec(&deposit)?;
                    unallocated.insert(deposit.deposit_id.as_str(), json.as_slice())?;
                    bank_records.insert(
                        record.record_id.as_str(),
                        DepositDisposition::Unallocated.as_str(),
                    )?;

                    DepositOutcome {
                        disposition: DepositDisposition::Unallocated,
                        wallet_id: None,
                        reference: None,
                        deposit_id: Some(deposit.deposit_id),
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }
}

// The scrape record does not carry a broker id of its own; the pipeline
// stamps it from the scrape request before persisting. Manual records pass
// through process_fiat_deposit with the broker already stamped in the id.
fn broker_for_record(record: &BankDepositRecord) -> String {
    record
        .record_id
        .split_once(':')
        .map(|(broker, _)| broker.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-record row in a batch apply report.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecordReport {
    pub record_id: String,
    pub matched: bool,
    pub credited: bool,
    pub disposition: Option<DepositDisposition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one scrape-and-apply run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScrapeApplyReport {
    pub dry_run: bool,
    pub total: usize,
    pub matched: usize,
    pub credited: usize,
    pub unallocated: usize,
    pub failed: usize,
    pub records: Vec<RecordReport>,
}

/// Pull deposits from the bank, match them, and (unless `dry_run`) credit
/// matched records and persist the rest as unallocated.
///
/// Per-record failures are isolated: one bad record never aborts the batch;
/// its error lands in the report and processing continues.
pub async fn scrape_and_apply(
    ledger: &LedgerDb,
    bank: &dyn BankClient,
    request: &ScrapeRequest,
    dry_run: bool,
) -> Result<ScrapeApplyReport, BankError> {
    let scraped = bank.scrape_deposits(request).await?;

    let mut report = ScrapeApplyReport {
        dry_run,
        total: scraped.len(),
        matched: 0,
        credited: 0,
        unallocated: 0,
        failed: 0,
        records: Vec::with_capacity(scraped.len()),
    };

    for raw_record in scraped {
        // Stamp the broker into the dedup key so two brokers' banks can both
        // deliver a row id "1" without colliding.
        let record = BankDepositRecord {
            record_id: format!("{}:{}", request.broker_id, raw_record.record_id),
            ..raw_record
        };

        if dry_run {
            let outcome = match ledger.auto_match_deposit(&record.raw_reference, &record.currency) {
                Ok(outcome) => outcome,
                Err(error) => {
                    report.failed += 1;
                    report.records.push(RecordReport {
                        record_id: record.record_id,
                        matched: false,
                        credited: false,
                        disposition: None,
                        error: Some(error.to_string()),
                    });
                    continue;
                }
            };
            if outcome.matched {
                report.matched += 1;
            }
            report.records.push(RecordReport {
                record_id: record.record_id,
                matched: outcome.matched,
                credited: false,
                disposition: None,
                error: None,
            });
            continue;
        }

        match ledger.process_fiat_deposit(&record) {
            Ok(outcome) => {
                match outcome.disposition {
                    DepositDisposition::Credited => {
                        report.matched += 1;
                        report.credited += 1;
                    }
                    DepositDisposition::Unallocated => report.unallocated += 1,
                    DepositDisposition::Duplicate => {}
                }
                report.records.push(RecordReport {
                    record_id: record.record_id,
                    matched: outcome.disposition == DepositDisposition::Credited,
                    credited: outcome.disposition == DepositDisposition::Credited,
                    disposition: Some(outcome.disposition),
                    error: None,
                });
            }
            Err(error) => {
                warn!(record_id = %record.record_id, error = %error, "failed to apply deposit record");
                report.failed += 1;
                report.records.push(RecordReport {
                    record_id: record.record_id,
                    matched: false,
                    credited: false,
                    disposition: None,
                    error: Some(error.to_string()),
                });
            }
        }
    }

    Ok(report)
}
