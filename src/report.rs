// SPDX-License-Identifier: AGPL-3.0-or-later

//! CSV exports: account statements and a capital-gains tax report.
//!
//! The tax report pairs the fiat and crypto legs of each conversion by
//! their shared reference id (the quote id), builds acquisition lots from
//! crypto credits, and consumes them FIFO or LIFO on disposal.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::ledger::{EntryKind, LedgerDb, LedgerError, LedgerResult, WalletType};

/// Largest entry page pulled per wallet when exporting.
const EXPORT_PAGE: usize = 500;

/// Lot consumption order for disposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LotMethod {
    Fifo,
    Lifo,
}

impl LotMethod {
    fn as_str(&self) -> &'static str {
        match self {
            LotMethod::Fifo => "fifo",
            LotMethod::Lifo => "lifo",
        }
    }
}

/// Export a statement of all entries across a user's wallets as CSV.
///
/// Rows are ordered oldest-first within each wallet. The optional date
/// bounds are inclusive.
pub fn statement_csv(
    ledger: &LedgerDb,
    user_id: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> LedgerResult<Vec<u8>> {
    let wallets = ledger.list_user_wallets(user_id)?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "date",
            "wallet_id",
            "wallet_type",
            "currency",
            "kind",
            "amount",
            "balance_after",
            "reference",
        ])
        .map_err(csv_error)?;

    for wallet in &wallets {
        let mut entries = collect_entries(ledger, &wallet.wallet_id)?;
        entries.reverse(); // storage order is newest-first
        for entry in entries {
            if from.is_some_and(|f| entry.created_at < f) {
                continue;
            }
            if to.is_some_and(|t| entry.created_at > t) {
                continue;
            }
            writer
                .write_record([
                    entry.created_at.to_rfc3339().as_str(),
                    wallet.wallet_id.as_str(),
                    wallet.wallet_type.as_str(),
                    entry.currency.as_str(),
                    entry.kind.as_str(),
                    entry.amount.to_string().as_str(),
                    entry.balance_after.to_string().as_str(),
                    entry.reference_id.as_str(),
                ])
                .map_err(csv_error)?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| LedgerError::Validation(format!("csv write failed: {e}")))
}

/// One side of a conversion, reassembled from its ledger legs.
#[derive(Debug, Clone)]
struct ConversionLeg {
    at: DateTime<Utc>,
    currency: String,
    /// Crypto quantity moved; positive for acquisitions.
    quantity: Decimal,
    /// Fiat counter-value, fees included.
    fiat_value: Decimal,
    acquired: bool,
}

#[derive(Debug, Clone)]
struct Lot {
    quantity: Decimal,
    cost: Decimal,
}

/// Export a capital-gains report over the user's conversions as CSV.
///
/// Columns: disposal date, currency, quantity, proceeds, cost basis, gain.
/// Disposals with no remaining lot coverage carry a zero cost basis for the
/// uncovered portion, which is the conservative reading for assets acquired
/// outside this ledger.
pub fn tax_report_csv(
    ledger: &LedgerDb,
    user_id: &str,
    method: LotMethod,
) -> LedgerResult<Vec<u8>> {
    let legs = conversion_legs(ledger, user_id)?;

    // Acquisition lots per currency, oldest first.
    let mut lots: HashMap<String, VecDeque<Lot>> = HashMap::new();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "date",
            "currency",
            "quantity",
            "proceeds",
            "cost_basis",
            "gain",
            "method",
        ])
        .map_err(csv_error)?;

    for leg in legs {
        if leg.acquired {
            lots.entry(leg.currency.clone()).or_default().push_back(Lot {
                quantity: leg.quantity,
                cost: leg.fiat_value,
            });
            continue;
        }

        let open = lots.entry(leg.currency.clone()).or_default();
        let cost_basis = consume_lots(open, leg.quantity, method);
        let gain = leg.fiat_value - cost_basis;
        writer
            .write_record([
                leg.at.to_rfc3339().as_str(),
                leg.currency.as_str(),
                leg.quantity.to_string().as_str(),
                leg.fiat_value.to_string().as_str(),
                cost_basis.to_string().as_str(),
                gain.to_string().as_str(),
                method.as_str(),
            ])
            .map_err(csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| LedgerError::Validation(format!("csv write failed: {e}")))
}

/// Take `quantity` out of the open lots and return the consumed cost basis.
fn consume_lots(lots: &mut VecDeque<Lot>, mut quantity: Decimal, method: LotMethod) -> Decimal {
    let mut cost_basis = Decimal::ZERO;
    while quantity > Decimal::ZERO {
        let lot = match method {
            LotMethod::Fifo => lots.front_mut(),
            LotMethod::Lifo => lots.back_mut(),
        };
        let Some(lot) = lot else {
            break; // uncovered remainder carries zero basis
        };

        if lot.quantity <= quantity {
            quantity -= lot.quantity;
            cost_basis += lot.cost;
            match method {
                LotMethod::Fifo => lots.pop_front(),
                LotMethod::Lifo => lots.pop_back(),
            };
        } else {
            let fraction = quantity / lot.quantity;
            let consumed_cost = (lot.cost * fraction).round_dp(8);
            lot.cost -= consumed_cost;
            lot.quantity -= quantity;
            cost_basis += consumed_cost;
            quantity = Decimal::ZERO;
        }
    }
    cost_basis
}

/// Reassemble conversions from ledger entries, chronologically.
///
/// Each conversion's legs share a reference id. The crypto-wallet leg gives
/// direction and quantity; the fiat-wallet legs (debit + fee, or credit) give
/// the fiat counter-value.
fn conversion_legs(ledger: &LedgerDb, user_id: &str) -> LedgerResult<Vec<ConversionLeg>> {
    struct Pending {
        at: DateTime<Utc>,
        crypto_currency: Option<String>,
        crypto_amount: Decimal,
        fiat_amount: Decimal,
    }

    let wallets = ledger.list_user_wallets(user_id)?;
    let mut by_reference: BTreeMap<String, Pending> = BTreeMap::new();

    for wallet in &wallets {
        let is_crypto = matches!(
            wallet.wallet_type,
            WalletType::CryptoHot | WalletType::CryptoCold
        );
        for entry in collect_entries(ledger, &wallet.wallet_id)? {
            if !matches!(
                entry.kind,
                EntryKind::ConversionDebit | EntryKind::ConversionCredit | EntryKind::ConversionFee
            ) {
                continue;
            }
            let pending =
                by_reference
                    .entry(entry.reference_id.clone())
                    .or_insert_with(|| Pending {
                        at: entry.created_at,
                        crypto_currency: None,
                        crypto_amount: Decimal::ZERO,
                        fiat_amount: Decimal::ZERO,
                    });
            pending.at = pending.at.min(entry.created_at);
            if is_crypto {
                pending.crypto_currency = Some(entry.currency.clone());
                pending.crypto_amount += entry.amount;
            } else {
                pending.fiat_amount += entry.amount;
            }
        }
    }

    let mut legs: Vec<ConversionLeg> = by_reference
        .into_values()
        .filter_map(|p| {
            let currency = p.crypto_currency?;
            if p.crypto_amount.is_zero() {
                return None;
            }
            Some(ConversionLeg {
                at: p.at,
                currency,
                quantity: p.crypto_amount.abs(),
                fiat_value: p.fiat_amount.abs(),
                acquired: p.crypto_amount > Decimal::ZERO,
            })
        })
        .collect();
    legs.sort_by_key(|l| l.at);
    Ok(legs)
}

fn collect_entries(
    ledger: &LedgerDb,
    wallet_id: &str,
) -> LedgerResult<Vec<crate::ledger::LedgerEntry>> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let (page, next) = ledger.list_entries(wallet_id, cursor.as_deref(), EXPORT_PAGE)?;
        all.extend(page);
        match next {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }
    Ok(all)
}

fn csv_error(e: csv::Error) -> LedgerError {
    LedgerError::Validation(format!("csv write failed: {e}"))
}
