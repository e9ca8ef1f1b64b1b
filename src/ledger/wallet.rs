// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wallet records and balance mutation.
//!
//! The ledger is the only component allowed to mutate balances. Every
//! mutation appends a [`LedgerEntry`](super::entry::LedgerEntry) inside the
//! same redb write transaction, so a wallet's balance and its entry history
//! can never diverge.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::db::{
    extract_entry_id_from_key, make_entry_index_key, make_entry_prefix, make_entry_prefix_end,
    scope_key, LedgerDb, ENTRIES, WALLETS, WALLET_ENTRY_INDEX, WALLET_KEYS,
};
use super::entry::{EntryKind, LedgerEntry};
use super::error::{LedgerError, LedgerResult};

/// Wallet category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    /// Fiat balance holder, credited by bank deposits.
    Fiat,
    /// Hot crypto wallet with an on-chain address.
    CryptoHot,
    /// Cold crypto wallet (custody, no automated mutation).
    CryptoCold,
    /// Broker pool account mirror.
    Pool,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Fiat => "fiat",
            WalletType::CryptoHot => "crypto_hot",
            WalletType::CryptoCold => "crypto_cold",
            WalletType::Pool => "pool",
        }
    }
}

/// Wallet lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// Wallet can be credited and debited.
    Active,
    /// Balance mutations are rejected pending review.
    Frozen,
    /// Terminal state; wallets are never hard-deleted.
    Closed,
}

/// One (user, tenant, broker, currency, type) balance holder.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Wallet {
    /// Unique wallet identifier (UUID).
    pub wallet_id: String,
    /// Owning user.
    pub user_id: String,
    /// Tenant scope.
    pub tenant_id: String,
    /// Broker scope.
    pub broker_id: String,
    /// Wallet category.
    pub wallet_type: WalletType,
    /// ISO-style currency code (e.g. "ZAR", "BTC").
    pub currency: String,
    /// On-chain address for crypto wallets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Current status.
    pub status: WalletStatus,
    /// Balance as an arbitrary-precision decimal; never negative.
    pub balance: Decimal,
    /// Display name captured at provisioning, used for reference initials.
    pub display_name: String,
    /// Whether MFA is required for outbound operations on this wallet.
    pub mfa_enabled: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    fn new(
        user_id: &str,
        tenant_id: &str,
        broker_id: &str,
        wallet_type: WalletType,
        currency: &str,
        address: Option<String>,
        user_info: &UserInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            wallet_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            broker_id: broker_id.to_string(),
            wallet_type,
            currency: currency.to_string(),
            address,
            status: WalletStatus::Active,
            balance: Decimal::ZERO,
            display_name: user_info.display_name.clone(),
            mfa_enabled: user_info.mfa_enabled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Uniqueness key for the wallet_keys index table.
    fn scope(&self) -> String {
        scope_key(&[
            &self.user_id,
            &self.tenant_id,
            &self.broker_id,
            self.wallet_type.as_str(),
            &self.currency,
        ])
    }
}

/// User details captured at provisioning time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    /// Full display name; initials are derived from it for payment references.
    pub display_name: String,
    /// Whether MFA is enabled for the user.
    #[serde(default)]
    pub mfa_enabled: bool,
}

/// Apply a signed balance delta to a wallet and append the matching entry.
///
/// This is the single write path for balances. Callers already hold a write
/// transaction and pass the open table handles, so multi-leg operations
/// (conversion, allocation execution) commit atomically as a unit.
pub(crate) fn apply_delta(
    wallets: &mut redb::Table<'_, &str, &[u8]>,
    entries: &mut redb::Table<'_, &str, &[u8]>,
    entry_index: &mut redb::Table<'_, &[u8], &str>,
    wallet_id: &str,
    signed_amount: Decimal,
    kind: EntryKind,
    reference_id: &str,
) -> LedgerResult<Wallet> {
    let raw = {
        let guard = wallets
            .get(wallet_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("wallet {wallet_id}")))?;
        guard.value().to_vec()
    };
    let mut wallet: Wallet = serde_json::from_slice(&raw)?;

    if wallet.status != WalletStatus::Active {
        return Err(LedgerError::WalletFrozen {
            wallet_id: wallet_id.to_string(),
        });
    }

    let new_balance = wallet.balance + signed_amount;
    if new_balance < Decimal::ZERO {
        return Err(LedgerError::InsufficientFunds {
            wallet_id: wallet_id.to_string(),
        });
    }

    wallet.balance = new_balance;
    wallet.updated_at = Utc::now();

    let entry = LedgerEntry::new(
        wallet_id,
        signed_amount,
        wallet.currency.clone(),
        kind,
        reference_id,
        new_balance,
    );

    let wallet_json = serde_json::to_vec(&wallet)?;
    wallets.insert(wallet_id, wallet_json.as_slice())?;

    let entry_json = serde_json::to_vec(&entry)?;
    entries.insert(entry.entry_id.as_str(), entry_json.as_slice())?;
    let index_key =
        make_entry_index_key(wallet_id, entry.created_at.timestamp_millis(), &entry.entry_id);
    entry_index.insert(index_key.as_slice(), kind.as_str())?;

    Ok(wallet)
}

fn require_positive(amount: Decimal) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(())
}

impl LedgerDb {
    /// Provision the canonical wallet set (fiat + crypto hot) for a user.
    ///
    /// Idempotent: a second call for the same (user, tenant, broker) scope
    /// returns the existing wallets instead of duplicating them. The
    /// insert-or-fetch runs inside one write transaction, so two concurrent
    /// provisioning calls cannot both create a wallet for the same scope.
    pub fn provision_infrastructure(
        &self,
        user_id: &str,
        tenant_id: &str,
        broker_id: &str,
        fiat_currency: &str,
        crypto_currency: &str,
        user_info: &UserInfo,
    ) -> LedgerResult<Vec<Wallet>> {
        let candidates = [
            Wallet::new(
                user_id,
                tenant_id,
                broker_id,
                WalletType::Fiat,
                fiat_currency,
                None,
                user_info,
            ),
            Wallet::new(
                user_id,
                tenant_id,
                broker_id,
                WalletType::CryptoHot,
                crypto_currency,
                Some(format!("0x{}", uuid::Uuid::new_v4().simple())),
                user_info,
            ),
        ];

        let mut provisioned = Vec::with_capacity(candidates.len());

        let write_txn = self.db.begin_write()?;
        {
            let mut keys = write_txn.open_table(WALLET_KEYS)?;
            let mut wallets = write_txn.open_table(WALLETS)?;

            for candidate in candidates {
                let scope = candidate.scope();
                let existing_id = keys.get(scope.as_str())?.map(|v| v.value().to_string());
                match existing_id {
                    Some(wallet_id) => {
                        let raw = wallets
                            .get(wallet_id.as_str())?
                            .ok_or_else(|| LedgerError::NotFound(format!("wallet {wallet_id}")))?
                            .value()
                            .to_vec();
                        provisioned.push(serde_json::from_slice(&raw)?);
                    }
                    None => {
                        let json = serde_json::to_vec(&candidate)?;
                        wallets.insert(candidate.wallet_id.as_str(), json.as_slice())?;
                        keys.insert(scope.as_str(), candidate.wallet_id.as_str())?;
                        provisioned.push(candidate);
                    }
                }
            }
        }
        write_txn.commit()?;

        Ok(provisioned)
    }

    /// Credit a wallet. Fails if the wallet is missing or not active.
    pub fn credit(
        &self,
        wallet_id: &str,
        amount: Decimal,
        kind: EntryKind,
        reference_id: &str,
    ) -> LedgerResult<Wallet> {
        require_positive(amount)?;

        let write_txn = self.db.begin_write()?;
        let wallet = {
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut entries = write_txn.open_table(ENTRIES)?;
            let mut index = write_txn.open_table(WALLET_ENTRY_INDEX)?;
            apply_delta(
                &mut wallets,
                &mut entries,
                &mut index,
                wallet_id,
                amount,
                kind,
                reference_id,
            )?
        };
        write_txn.commit()?;
        Ok(wallet)
    }

    /// Debit a wallet. Fails with `InsufficientFunds` if the balance would
    /// go negative and `WalletFrozen` if the wallet is not active.
    pub fn debit(
        &self,
        wallet_id: &str,
        amount: Decimal,
        kind: EntryKind,
        reference_id: &str,
    ) -> LedgerResult<Wallet> {
        require_positive(amount)?;

        let write_txn = self.db.begin_write()?;
        let wallet = {
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut entries = write_txn.open_table(ENTRIES)?;
            let mut index = write_txn.open_table(WALLET_ENTRY_INDEX)?;
            apply_delta(
                &mut wallets,
                &mut entries,
                &mut index,
                wallet_id,
                -amount,
                kind,
                reference_id,
            )?
        };
        write_txn.commit()?;
        Ok(wallet)
    }

    /// Look up a single wallet by ID.
    pub fn get_wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        match table.get(wallet_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// List all wallets owned by a user, across tenants and brokers.
    pub fn list_user_wallets(&self, user_id: &str) -> LedgerResult<Vec<Wallet>> {
        let read_txn = self.db.begin_read()?;
        let keys = read_txn.open_table(WALLET_KEYS)?;
        let wallets = read_txn.open_table(WALLETS)?;

        let prefix = format!("{user_id}|");
        let mut result = Vec::new();
        for item in keys.range(prefix.as_str()..)? {
            let (key, wallet_id) = item?;
            if !key.value().starts_with(prefix.as_str()) {
                break;
            }
            if let Some(raw) = wallets.get(wallet_id.value())? {
                result.push(serde_json::from_slice::<Wallet>(raw.value())?);
            }
        }
        Ok(result)
    }

    /// Find one wallet of a user by type and currency within a scope.
    pub fn find_wallet(
        &self,
        user_id: &str,
        tenant_id: &str,
        broker_id: &str,
        wallet_type: WalletType,
        currency: &str,
    ) -> LedgerResult<Option<Wallet>> {
        let read_txn = self.db.begin_read()?;
        let keys = read_txn.open_table(WALLET_KEYS)?;
        let wallets = read_txn.open_table(WALLETS)?;

        let scope = scope_key(&[user_id, tenant_id, broker_id, wallet_type.as_str(), currency]);
        match keys.get(scope.as_str())? {
            Some(wallet_id) => match wallets.get(wallet_id.value())? {
                Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Transition a wallet's status (freeze, unfreeze, close).
    ///
    /// Closed is terminal; reopening a closed wallet is rejected.
    pub fn set_wallet_status(&self, wallet_id: &str, status: WalletStatus) -> LedgerResult<Wallet> {
        let write_txn = self.db.begin_write()?;
        let wallet = {
            let mut wallets = write_txn.open_table(WALLETS)?;
            let raw = {
                let guard = wallets
                    .get(wallet_id)?
                    .ok_or_else(|| LedgerError::NotFound(format!("wallet {wallet_id}")))?;
                guard.value().to_vec()
            };
            let mut wallet: Wallet = serde_json::from_slice(&raw)?;
            if wallet.status == WalletStatus::Closed {
                return Err(LedgerError::InvalidState {
                    entity: "wallet",
                    id: wallet_id.to_string(),
                    state: "closed".to_string(),
                });
            }
            wallet.status = status;
            wallet.updated_at = Utc::now();
            let json = serde_json::to_vec(&wallet)?;
            wallets.insert(wallet_id, json.as_slice())?;
            wallet
        };
        write_txn.commit()?;
        Ok(wallet)
    }

    /// Newest-first paginated listing of ledger entries for a wallet.
    ///
    /// Returns `(entries, next_cursor)`; pass the cursor back to continue.
    pub fn list_entries(
        &self,
        wallet_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> LedgerResult<(Vec<LedgerEntry>, Option<String>)> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(WALLET_ENTRY_INDEX)?;
        let entries = read_txn.open_table(ENTRIES)?;

        let prefix = make_entry_prefix(wallet_id);
        let prefix_end = make_entry_prefix_end(wallet_id);

        let start: Vec<u8> = match cursor {
            Some(cursor_str) => {
                let decoded = hex::decode(cursor_str).map_err(|_| {
                    LedgerError::Validation("malformed entries cursor".to_string())
                })?;
                if !decoded.starts_with(&prefix) {
                    return Err(LedgerError::Validation(
                        "cursor does not belong to this wallet".to_string(),
                    ));
                }
                decoded
            }
            None => prefix.clone(),
        };

        let mut results = Vec::with_capacity(limit + 1);
        let mut skip_first = cursor.is_some();
        let mut last_key: Option<Vec<u8>> = None;

        for item in index.range(start.as_slice()..prefix_end.as_slice())? {
            let item = item?;
            let key_bytes = item.0.value().to_vec();

            if skip_first {
                skip_first = false;
                continue;
            }

            if let Some(entry_id) = extract_entry_id_from_key(&key_bytes, wallet_id) {
                if let Some(raw) = entries.get(entry_id.as_str())? {
                    results.push(serde_json::from_slice::<LedgerEntry>(raw.value())?);
                    last_key = Some(key_bytes);
                }
            }

            if results.len() >= limit {
                break;
            }
        }

        let next_cursor = if results.len() >= limit {
            last_key.map(|k| hex::encode(k))
        } else {
            None
        };

        Ok((results, next_cursor))
    }
}
