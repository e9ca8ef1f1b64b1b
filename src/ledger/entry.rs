// SPDX-License-Identifier: AGPL-3.0-or-later

//! Append-only ledger entries (the double-entry legs of balance mutations).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Category of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Bank deposit credited to a fiat wallet.
    Deposit,
    /// Credit from an approved allocation of an unallocated deposit.
    Allocation,
    /// Debit leg of a currency conversion.
    ConversionDebit,
    /// Credit leg of a currency conversion.
    ConversionCredit,
    /// Fee retained from a conversion.
    ConversionFee,
    /// Manual adjustment (admin).
    Adjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Allocation => "allocation",
            EntryKind::ConversionDebit => "conversion_debit",
            EntryKind::ConversionCredit => "conversion_credit",
            EntryKind::ConversionFee => "conversion_fee",
            EntryKind::Adjustment => "adjustment",
        }
    }
}

/// A single signed balance delta applied to one wallet.
///
/// Entries are append-only: once written inside the same transaction as the
/// balance mutation they describe, they are never updated or deleted. The sum
/// of signed amounts for a wallet always equals its stored balance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    /// Unique entry identifier (UUID).
    pub entry_id: String,
    /// Wallet whose balance this entry moved.
    pub wallet_id: String,
    /// Signed amount: positive for credits, negative for debits.
    pub amount: Decimal,
    /// Currency of the wallet at time of writing.
    pub currency: String,
    /// What produced this entry.
    pub kind: EntryKind,
    /// External correlation id: payment reference, deposit id, quote id.
    pub reference_id: String,
    /// Balance after this entry was applied.
    pub balance_after: Decimal,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        wallet_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        kind: EntryKind,
        reference_id: impl Into<String>,
        balance_after: Decimal,
    ) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            wallet_id: wallet_id.into(),
            amount,
            currency: currency.into(),
            kind,
            reference_id: reference_id.into(),
            balance_after,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_has_fresh_id() {
        let ten: Decimal = "10.00".parse().unwrap();
        let a = LedgerEntry::new("w1", ten, "ZAR", EntryKind::Deposit, "REF1", ten);
        let b = LedgerEntry::new("w1", ten, "ZAR", EntryKind::Deposit, "REF1", ten + ten);
        assert_ne!(a.entry_id, b.entry_id);
        assert_eq!(a.kind.as_str(), "deposit");
    }

    #[test]
    fn entry_serializes_amount_as_decimal_string() {
        let amount: Decimal = "150.25".parse().unwrap();
        let entry = LedgerEntry::new("w1", amount, "ZAR", EntryKind::Deposit, "REF1", amount);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["amount"], serde_json::json!("150.25"));
    }
}
