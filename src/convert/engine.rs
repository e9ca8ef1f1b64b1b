// SPDX-License-Identifier: AGPL-3.0-or-later

//! Quote-then-confirm conversion between a user's wallets.
//!
//! Pricing happens at quote time and is frozen into the quote; confirmation
//! either executes those exact numbers atomically or fails. The debit, fee
//! and credit legs commit in one write transaction so no partial conversion
//! is ever visible.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ledger::db::{ENTRIES, WALLETS, WALLET_ENTRY_INDEX};
use crate::ledger::entry::EntryKind;
use crate::ledger::error::LedgerError;
use crate::ledger::wallet::{apply_delta, WalletType};
use crate::ledger::{LedgerDb, Wallet};

use super::quote::{ConversionQuote, QuoteStore};
use super::rates::RateSource;

/// Decimal places kept on converted target amounts.
const TARGET_SCALE: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("no rate available for {from} -> {to}")]
    UnsupportedPair { from: String, to: String },

    #[error("conversion amount must be positive, got {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("source and target currency must differ")]
    SameCurrency,

    #[error("no {currency} wallet found for user {user_id}")]
    NoWallet { user_id: String, currency: String },

    #[error("quote {quote_id} not found")]
    QuoteNotFound { quote_id: String },

    #[error("quote {quote_id} has expired")]
    QuoteExpired { quote_id: String },

    #[error("fees must be accepted to confirm a conversion")]
    FeesNotAccepted,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result of an executed conversion.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConversionReceipt {
    pub quote_id: String,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub debited: Decimal,
    pub fee: Decimal,
    pub credited: Decimal,
    pub from_balance_after: Decimal,
    pub to_balance_after: Decimal,
}

/// Prices and executes conversions against the ledger.
pub struct ConversionEngine {
    quotes: QuoteStore,
    rates: Arc<dyn RateSource>,
    fee_bps: u32,
}

impl ConversionEngine {
    pub fn new(quotes: QuoteStore, rates: Arc<dyn RateSource>, fee_bps: u32) -> Self {
        Self {
            quotes,
            rates,
            fee_bps,
        }
    }

    /// Price a conversion and hold the quote server-side until it expires.
    pub fn get_quote(
        &self,
        user_id: &str,
        tenant_id: &str,
        broker_id: &str,
        from_currency: &str,
        to_currency: &str,
        amount: Decimal,
    ) -> Result<ConversionQuote, ConvertError> {
        if amount <= Decimal::ZERO {
            return Err(ConvertError::InvalidAmount { amount });
        }
        let from_currency = from_currency.to_uppercase();
        let to_currency = to_currency.to_uppercase();
        if from_currency == to_currency {
            return Err(ConvertError::SameCurrency);
        }

        let rate = self
            .rates
            .rate(&from_currency, &to_currency)
            .ok_or_else(|| ConvertError::UnsupportedPair {
                from: from_currency.clone(),
                to: to_currency.clone(),
            })?;

        let fee_amount =
            (amount * Decimal::from(self.fee_bps) / Decimal::from(10_000u32)).round_dp(TARGET_SCALE);
        let net_source = amount - fee_amount;
        let target_amount = (net_source * rate).round_dp(TARGET_SCALE);

        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.quotes.ttl())
            .unwrap_or_else(|_| ChronoDuration::seconds(120));
        let quote = ConversionQuote {
            quote_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            broker_id: broker_id.to_string(),
            from_currency,
            to_currency,
            source_amount: amount,
            fee_bps: self.fee_bps,
            fee_amount,
            net_source_amount: net_source,
            rate,
            target_amount,
            created_at: now,
            expires_at: now + ttl,
        };
        self.quotes.put(quote.clone());
        Ok(quote)
    }

    /// Execute a previously issued quote.
    ///
    /// `accept_fees` must be true; refusal leaves the quote in the store and
    /// the ledger untouched. Consuming the quote and applying all three legs
    /// happens exactly once even under racing confirms.
    pub fn confirm(
        &self,
        ledger: &LedgerDb,
        user_id: &str,
        quote_id: &str,
        accept_fees: bool,
    ) -> Result<ConversionReceipt, ConvertError> {
        if !accept_fees {
            return Err(ConvertError::FeesNotAccepted);
        }

        // Never confirm (or consume) someone else's quote; report it as
        // unknown rather than leaking its existence.
        match self.quotes.peek(quote_id) {
            Some(held) if held.user_id == user_id => {}
            _ => {
                return Err(ConvertError::QuoteNotFound {
                    quote_id: quote_id.to_string(),
                })
            }
        }

        let quote = self
            .quotes
            .take(quote_id)
            .ok_or_else(|| ConvertError::QuoteNotFound {
                quote_id: quote_id.to_string(),
            })?;
        if quote.is_expired(Utc::now()) {
            return Err(ConvertError::QuoteExpired {
                quote_id: quote_id.to_string(),
            });
        }

        let from_wallet = find_wallet_for_currency(ledger, &quote, &quote.from_currency)?;
        let to_wallet = find_wallet_for_currency(ledger, &quote, &quote.to_currency)?;

        let receipt = ledger.execute_conversion(&quote, &from_wallet, &to_wallet)?;
        info!(
            quote_id = %receipt.quote_id,
            from = %quote.from_currency,
            to = %quote.to_currency,
            debited = %receipt.debited,
            credited = %receipt.credited,
            "conversion executed"
        );
        Ok(receipt)
    }
}

/// Resolve the wallet holding `currency` within the quote's scope.
///
/// Fiat and crypto wallets share the scope layout, so both types are tried.
fn find_wallet_for_currency(
    ledger: &LedgerDb,
    quote: &ConversionQuote,
    currency: &str,
) -> Result<Wallet, ConvertError> {
    for wallet_type in [WalletType::Fiat, WalletType::CryptoHot] {
        if let Some(wallet) = ledger.find_wallet(
            &quote.user_id,
            &quote.tenant_id,
            &quote.broker_id,
            wallet_type,
            currency,
        )? {
            return Ok(wallet);
        }
    }
    Err(ConvertError::NoWallet {
        user_id: quote.user_id.clone(),
        currency: currency.to_string(),
    })
}

impl LedgerDb {
    /// Apply the debit, fee and credit legs of a conversion in one
    /// transaction. The source wallet is checked for sufficient funds across
    /// both debit legs; any failing leg aborts the whole conversion.
    fn execute_conversion(
        &self,
        quote: &ConversionQuote,
        from_wallet: &Wallet,
        to_wallet: &Wallet,
    ) -> Result<ConversionReceipt, LedgerError> {
        let write_txn = self.db.begin_write()?;
        let receipt = {
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut entries = write_txn.open_table(ENTRIES)?;
            let mut entry_index = write_txn.open_table(WALLET_ENTRY_INDEX)?;

            let after_debit = apply_delta(
                &mut wallets,
                &mut entries,
                &mut entry_index,
                &from_wallet.wallet_id,
                -quote.net_source_amount,
                EntryKind::ConversionDebit,
                &quote.quote_id,
            )?;

            let from_after = if quote.fee_amount > Decimal::ZERO {
                apply_delta(
                    &mut wallets,
                    &mut entries,
                    &mut entry_index,
                    &from_wallet.wallet_id,
                    -quote.fee_amount,
                    EntryKind::ConversionFee,
                    &quote.quote_id,
                )?
            } else {
                after_debit
            };

            let to_after = apply_delta(
                &mut wallets,
                &mut entries,
                &mut entry_index,
                &to_wallet.wallet_id,
                quote.target_amount,
                EntryKind::ConversionCredit,
                &quote.quote_id,
            )?;

            ConversionReceipt {
                quote_id: quote.quote_id.clone(),
                from_wallet_id: from_wallet.wallet_id.clone(),
                to_wallet_id: to_wallet.wallet_id.clone(),
                debited: quote.source_amount,
                fee: quote.fee_amount,
                credited: quote.target_amount,
                from_balance_after: from_after.balance,
                to_balance_after: to_after.balance,
            }
        };
        write_txn.commit()?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::ledger::wallet::UserInfo;

    use super::super::rates::StaticRateTable;
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn temp_db() -> (LedgerDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        (db, dir)
    }

    fn engine(quote_ttl: Duration) -> ConversionEngine {
        let rates = Arc::new(StaticRateTable::new().with_pair("BTC", "ZAR", dec("1000000")));
        ConversionEngine::new(QuoteStore::new(64, quote_ttl), rates, 50)
    }

    fn seed(db: &LedgerDb) -> (String, String) {
        let wallets = db
            .provision_infrastructure(
                "user-1",
                "tenant-1",
                "acme",
                "ZAR",
                "BTC",
                &UserInfo {
                    display_name: "Jane Dlamini".to_string(),
                    mfa_enabled: false,
                },
            )
            .unwrap();
        let fiat = wallets
            .iter()
            .find(|w| w.wallet_type == WalletType::Fiat)
            .unwrap()
            .wallet_id
            .clone();
        let crypto = wallets
            .iter()
            .find(|w| w.wallet_type == WalletType::CryptoHot)
            .unwrap()
            .wallet_id
            .clone();
        db.credit(&fiat, dec("10000.00"), EntryKind::Deposit, "seed")
            .unwrap();
        (fiat, crypto)
    }

    #[test]
    fn quote_prices_fee_and_target() {
        let engine = engine(Duration::from_secs(120));
        let quote = engine
            .get_quote("user-1", "tenant-1", "acme", "zar", "btc", dec("1000"))
            .unwrap();
        assert_eq!(quote.fee_amount, dec("5"));
        assert_eq!(quote.net_source_amount, dec("995"));
        // 995 ZAR at 0.000001 BTC/ZAR
        assert_eq!(quote.target_amount, dec("0.00099500"));
    }

    #[test]
    fn confirm_moves_both_legs_atomically() {
        let (db, _dir) = temp_db();
        let (fiat, crypto) = seed(&db);
        let engine = engine(Duration::from_secs(120));

        let quote = engine
            .get_quote("user-1", "tenant-1", "acme", "ZAR", "BTC", dec("1000"))
            .unwrap();
        let receipt = engine
            .confirm(&db, "user-1", &quote.quote_id, true)
            .unwrap();

        assert_eq!(receipt.from_balance_after, dec("9000.00"));
        assert_eq!(receipt.to_balance_after, quote.target_amount);
        assert_eq!(
            db.get_wallet(&fiat).unwrap().unwrap().balance,
            dec("9000.00")
        );
        assert_eq!(
            db.get_wallet(&crypto).unwrap().unwrap().balance,
            quote.target_amount
        );
    }

    #[test]
    fn quote_is_single_use() {
        let (db, _dir) = temp_db();
        seed(&db);
        let engine = engine(Duration::from_secs(120));

        let quote = engine
            .get_quote("user-1", "tenant-1", "acme", "ZAR", "BTC", dec("1000"))
            .unwrap();
        engine.confirm(&db, "user-1", &quote.quote_id, true).unwrap();

        let err = engine
            .confirm(&db, "user-1", &quote.quote_id, true)
            .unwrap_err();
        assert!(matches!(err, ConvertError::QuoteNotFound { .. }));
    }

    #[test]
    fn expired_quote_is_rejected() {
        let (db, _dir) = temp_db();
        let (fiat, _) = seed(&db);
        let engine = engine(Duration::from_millis(1));

        let quote = engine
            .get_quote("user-1", "tenant-1", "acme", "ZAR", "BTC", dec("1000"))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let err = engine
            .confirm(&db, "user-1", &quote.quote_id, true)
            .unwrap_err();
        assert!(matches!(err, ConvertError::QuoteExpired { .. }));
        assert_eq!(
            db.get_wallet(&fiat).unwrap().unwrap().balance,
            dec("10000.00")
        );
    }

    #[test]
    fn refusing_fees_leaves_quote_and_balances_untouched() {
        let (db, _dir) = temp_db();
        let (fiat, _) = seed(&db);
        let engine = engine(Duration::from_secs(120));

        let quote = engine
            .get_quote("user-1", "tenant-1", "acme", "ZAR", "BTC", dec("1000"))
            .unwrap();
        let err = engine
            .confirm(&db, "user-1", &quote.quote_id, false)
            .unwrap_err();
        assert!(matches!(err, ConvertError::FeesNotAccepted));
        assert_eq!(
            db.get_wallet(&fiat).unwrap().unwrap().balance,
            dec("10000.00")
        );

        // The quote is still usable afterwards.
        engine.confirm(&db, "user-1", &quote.quote_id, true).unwrap();
    }

    #[test]
    fn other_users_cannot_confirm_a_quote() {
        let (db, _dir) = temp_db();
        seed(&db);
        let engine = engine(Duration::from_secs(120));

        let quote = engine
            .get_quote("user-1", "tenant-1", "acme", "ZAR", "BTC", dec("1000"))
            .unwrap();
        let err = engine
            .confirm(&db, "user-2", &quote.quote_id, true)
            .unwrap_err();
        assert!(matches!(err, ConvertError::QuoteNotFound { .. }));

        // The attempt did not consume the owner's quote.
        engine.confirm(&db, "user-1", &quote.quote_id, true).unwrap();
    }

    #[test]
    fn insufficient_funds_aborts_whole_conversion() {
        let (db, _dir) = temp_db();
        let (fiat, crypto) = seed(&db);
        let engine = engine(Duration::from_secs(120));

        let quote = engine
            .get_quote("user-1", "tenant-1", "acme", "ZAR", "BTC", dec("50000"))
            .unwrap();
        let err = engine
            .confirm(&db, "user-1", &quote.quote_id, true)
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Ledger(LedgerError::InsufficientFunds { .. })
        ));

        // No partial legs were written.
        assert_eq!(
            db.get_wallet(&fiat).unwrap().unwrap().balance,
            dec("10000.00")
        );
        assert_eq!(db.get_wallet(&crypto).unwrap().unwrap().balance, Decimal::ZERO);
        assert!(db
            .list_entries(&fiat, None, 10)
            .unwrap()
            .0
            .iter()
            .all(|e| e.kind == EntryKind::Deposit));
    }

    #[test]
    fn unsupported_pair_is_rejected_at_quote_time() {
        let engine = engine(Duration::from_secs(120));
        let err = engine
            .get_quote("user-1", "tenant-1", "acme", "ZAR", "USD", dec("100"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedPair { .. }));
    }
}
