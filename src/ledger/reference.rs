// SPDX-License-Identifier: AGPL-3.0-or-later

//! Unique payment reference generation and lookup.
//!
//! A reference is the token a depositor puts in their bank transfer
//! narrative so the scraped deposit can be matched back to a wallet. Format:
//! `{BROKER_CODE}-{INITIALS}-{SUFFIX}`, e.g. `ACME-JD-7F3K9Q`.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use redb::{ReadableDatabase, ReadableTable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::db::{scope_key, LedgerDb, PERSISTENT_REFS, REFERENCES};
use super::error::{LedgerError, LedgerResult};

/// Retry budget for collision regeneration.
const MAX_GENERATION_ATTEMPTS: u32 = 8;

/// Random suffix alphabet. 0/O and 1/I are excluded so a reference survives
/// being read over the phone and typed into a banking app.
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Suffix length; 32^6 ≈ 1e9 active combinations per broker/user pair.
const SUFFIX_LEN: usize = 6;

/// Default validity window for one-time references.
pub const ONE_TIME_TTL_HOURS: i64 = 72;

/// Reference lifetime category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceType {
    /// Valid for a single deposit, then consumed; time-expires.
    OneTime,
    /// Stable per (user, tenant, broker, currency); never expires.
    Persistent,
}

/// Reference lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceStatus {
    Active,
    Consumed,
    Expired,
}

/// A payment reference tying bank deposits to a wallet scope.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UniqueReference {
    /// The reference string itself (unique).
    pub reference: String,
    pub reference_type: ReferenceType,
    pub user_id: String,
    pub tenant_id: String,
    pub broker_id: String,
    /// Currency deposits under this reference must carry.
    pub currency: String,
    /// Advisory expected amount; deposits are matched regardless of amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<Decimal>,
    pub status: ReferenceStatus,
    /// Absent for persistent references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UniqueReference {
    /// Whether this reference can still match a deposit at `now`.
    ///
    /// Expiry is enforced lazily on use; no background sweeper flips status.
    pub fn is_matchable(&self, now: DateTime<Utc>) -> bool {
        self.status == ReferenceStatus::Active
            && self.expires_at.map_or(true, |deadline| now <= deadline)
    }
}

/// Derive uppercase initials from a display name ("Jane Dlamini" → "JD").
pub(crate) fn derive_initials(display_name: &str) -> String {
    let initials: String = display_name
        .split_whitespace()
        .filter_map(|word| word.chars().find(|c| c.is_alphabetic()))
        .take(3)
        .collect::<String>()
        .to_uppercase();
    if initials.is_empty() {
        "XX".to_string()
    } else {
        initials
    }
}

/// Derive a short broker code from a broker id ("acme-broker-7" → "ACME").
pub(crate) fn derive_broker_code(broker_id: &str) -> String {
    let code: String = broker_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect::<String>()
        .to_uppercase();
    if code.is_empty() {
        "POOL".to_string()
    } else {
        code
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect()
}

fn compose(broker_id: &str, display_name: &str) -> String {
    format!(
        "{}-{}-{}",
        derive_broker_code(broker_id),
        derive_initials(display_name),
        random_suffix()
    )
}

impl LedgerDb {
    /// Generate a one-time or persistent reference for a wallet scope.
    ///
    /// Collision on the random suffix triggers regeneration with a fresh
    /// suffix, up to a bounded retry count. The candidate check and insert
    /// happen in one write transaction, so concurrent generators cannot both
    /// claim the same string.
    pub fn generate_reference(
        &self,
        user_id: &str,
        tenant_id: &str,
        broker_id: &str,
        reference_type: ReferenceType,
        currency: &str,
        expected_amount: Option<Decimal>,
    ) -> LedgerResult<UniqueReference> {
        if currency.trim().is_empty() {
            return Err(LedgerError::Validation("currency is required".to_string()));
        }
        if let Some(amount) = expected_amount {
            if amount <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount { amount });
            }
        }

        if reference_type == ReferenceType::Persistent {
            return self.get_or_create_persistent_reference(user_id, tenant_id, broker_id, currency);
        }

        let display_name = self.display_name_for(user_id)?;
        let now = Utc::now();

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut refs = write_txn.open_table(REFERENCES)?;

            let mut created = None;
            for _ in 0..MAX_GENERATION_ATTEMPTS {
                let candidate = compose(broker_id, &display_name);
                if refs.get(candidate.as_str())?.is_some() {
                    continue;
                }
                let record = UniqueReference {
                    reference: candidate.clone(),
                    reference_type: ReferenceType::OneTime,
                    user_id: user_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    broker_id: broker_id.to_string(),
                    currency: currency.to_string(),
                    expected_amount,
                    status: ReferenceStatus::Active,
                    expires_at: Some(now + Duration::hours(ONE_TIME_TTL_HOURS)),
                    created_at: now,
                };
                let json = serde_json::to_vec(&record)?;
                refs.insert(candidate.as_str(), json.as_slice())?;
                created = Some(record);
                break;
            }
            created.ok_or(LedgerError::ReferenceExhausted {
                attempts: MAX_GENERATION_ATTEMPTS,
            })?
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Fetch-or-create the persistent reference for a wallet scope.
    ///
    /// Safe under concurrent calls for the same tuple: the index lookup and
    /// insert run in one write transaction (redb serializes writers), so
    /// exactly one persistent reference ever exists per scope and all
    /// callers receive the same record.
    pub fn get_or_create_persistent_reference(
        &self,
        user_id: &str,
        tenant_id: &str,
        broker_id: &str,
        currency: &str,
    ) -> LedgerResult<UniqueReference> {
        if currency.trim().is_empty() {
            return Err(LedgerError::Validation("currency is required".to_string()));
        }

        let scope = scope_key(&[user_id, tenant_id, broker_id, currency]);
        let display_name = self.display_name_for(user_id)?;

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut index = write_txn.open_table(PERSISTENT_REFS)?;
            let mut refs = write_txn.open_table(REFERENCES)?;

            let existing = index.get(scope.as_str())?.map(|v| v.value().to_string());
            match existing {
                Some(reference) => {
                    let raw = refs
                        .get(reference.as_str())?
                        .ok_or_else(|| LedgerError::NotFound(format!("reference {reference}")))?
                        .value()
                        .to_vec();
                    serde_json::from_slice(&raw)?
                }
                None => {
                    let mut created = None;
                    for _ in 0..MAX_GENERATION_ATTEMPTS {
                        let candidate = compose(broker_id, &display_name);
                        if refs.get(candidate.as_str())?.is_some() {
                            continue;
                        }
                        let record = UniqueReference {
                            reference: candidate.clone(),
                            reference_type: ReferenceType::Persistent,
                            user_id: user_id.to_string(),
                            tenant_id: tenant_id.to_string(),
                            broker_id: broker_id.to_string(),
                            currency: currency.to_string(),
                            expected_amount: None,
                            status: ReferenceStatus::Active,
                            expires_at: None,
                            created_at: Utc::now(),
                        };
                        let json = serde_json::to_vec(&record)?;
                        refs.insert(candidate.as_str(), json.as_slice())?;
                        index.insert(scope.as_str(), candidate.as_str())?;
                        created = Some(record);
                        break;
                    }
                    created.ok_or(LedgerError::ReferenceExhausted {
                        attempts: MAX_GENERATION_ATTEMPTS,
                    })?
                }
            }
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Look up a reference by its exact string.
    pub fn get_reference(&self, reference: &str) -> LedgerResult<Option<UniqueReference>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REFERENCES)?;
        match table.get(reference)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Display name recorded at provisioning, for initials derivation.
    ///
    /// Falls back to an empty name (initials "XX") when the user has no
    /// wallet yet, so reference issuance does not hard-depend on
    /// provisioning order.
    fn display_name_for(&self, user_id: &str) -> LedgerResult<String> {
        let wallets = self.list_user_wallets(user_id)?;
        Ok(wallets
            .first()
            .map(|w| w.display_name.clone())
            .unwrap_or_default())
    }
}

/// Mark a reference consumed inside an already-open write transaction.
///
/// Used by the deposit matcher so the credit and the consumption commit
/// atomically. Persistent references stay active across deposits.
pub(crate) fn consume_reference_in(
    refs: &mut redb::Table<'_, &str, &[u8]>,
    reference: &str,
) -> LedgerResult<()> {
    let raw = {
        let guard = refs
            .get(reference)?
            .ok_or_else(|| LedgerError::NotFound(format!("reference {reference}")))?;
        guard.value().to_vec()
    };
    let mut record: UniqueReference = serde_json::from_slice(&raw)?;
    if record.reference_type == ReferenceType::OneTime {
        record.status = ReferenceStatus::Consumed;
        let json = serde_json::to_vec(&record)?;
        refs.insert(reference, json.as_slice())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::wallet::UserInfo;
    use super::*;

    fn temp_db() -> (LedgerDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        (db, dir)
    }

    fn seed_user(db: &LedgerDb) {
        db.provision_infrastructure(
            "user-1",
            "tenant-1",
            "acme-broker",
            "ZAR",
            "BTC",
            &UserInfo {
                display_name: "Jane Dlamini".to_string(),
                mfa_enabled: false,
            },
        )
        .unwrap();
    }

    #[test]
    fn initials_and_broker_code_derivation() {
        assert_eq!(derive_initials("Jane Dlamini"), "JD");
        assert_eq!(derive_initials("maría de los santos"), "MDL");
        assert_eq!(derive_initials("  "), "XX");
        assert_eq!(derive_broker_code("acme-broker"), "ACME");
        assert_eq!(derive_broker_code("__"), "POOL");
    }

    #[test]
    fn one_time_reference_has_expected_shape() {
        let (db, _dir) = temp_db();
        seed_user(&db);

        let reference = db
            .generate_reference("user-1", "tenant-1", "acme-broker", ReferenceType::OneTime, "ZAR", None)
            .unwrap();

        assert!(reference.reference.starts_with("ACME-JD-"));
        assert_eq!(reference.status, ReferenceStatus::Active);
        assert!(reference.expires_at.is_some());
        assert!(reference.is_matchable(Utc::now()));
    }

    #[test]
    fn missing_currency_is_a_validation_error() {
        let (db, _dir) = temp_db();
        let err = db
            .generate_reference("user-1", "tenant-1", "b", ReferenceType::OneTime, "  ", None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn persistent_reference_is_stable() {
        let (db, _dir) = temp_db();
        seed_user(&db);

        let first = db
            .get_or_create_persistent_reference("user-1", "tenant-1", "acme-broker", "ZAR")
            .unwrap();
        let second = db
            .get_or_create_persistent_reference("user-1", "tenant-1", "acme-broker", "ZAR")
            .unwrap();
        assert_eq!(first.reference, second.reference);
        assert_eq!(first.reference_type, ReferenceType::Persistent);
        assert!(first.expires_at.is_none());

        // A different currency gets its own reference
        let usd = db
            .get_or_create_persistent_reference("user-1", "tenant-1", "acme-broker", "USD")
            .unwrap();
        assert_ne!(usd.reference, first.reference);
    }

    #[test]
    fn concurrent_persistent_creation_yields_one_reference() {
        let (db, _dir) = temp_db();
        seed_user(&db);
        let db = Arc::new(db);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    db.get_or_create_persistent_reference("user-1", "tenant-1", "acme-broker", "ZAR")
                        .unwrap()
                        .reference
                })
            })
            .collect();

        let mut results: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort();
        results.dedup();
        assert_eq!(results.len(), 1, "all callers must receive the same reference");
    }

    #[test]
    fn lookup_returns_none_for_unknown_reference() {
        let (db, _dir) = temp_db();
        assert!(db.get_reference("NOPE-XX-AAAAAA").unwrap().is_none());
    }

    #[test]
    fn expired_reference_is_not_matchable() {
        let record = UniqueReference {
            reference: "ACME-JD-AAAAAA".to_string(),
            reference_type: ReferenceType::OneTime,
            user_id: "u".to_string(),
            tenant_id: "t".to_string(),
            broker_id: "b".to_string(),
            currency: "ZAR".to_string(),
            expected_amount: None,
            status: ReferenceStatus::Active,
            expires_at: Some(Utc::now() - Duration::hours(1)),
            created_at: Utc::now() - Duration::hours(80),
        };
        assert!(!record.is_matchable(Utc::now()));
    }
}
