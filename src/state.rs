// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::audit::AuditSink;
use crate::convert::ConversionEngine;
use crate::idempotency::IdempotencyCache;
use crate::ledger::LedgerDb;
use crate::reconcile::BankClient;

/// JWT verification configuration.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// HS256 shared secret; development mode (no signature check) when unset.
    pub secret: Option<String>,
    /// Expected issuer claim, if enforced.
    pub issuer: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerDb>,
    pub conversion: Arc<ConversionEngine>,
    pub idempotency: Arc<IdempotencyCache>,
    pub bank: Arc<dyn BankClient>,
    pub audit: Arc<AuditSink>,
    pub auth_config: Arc<AuthConfig>,
}

impl AppState {
    pub fn new(
        ledger: LedgerDb,
        conversion: ConversionEngine,
        idempotency: IdempotencyCache,
        bank: Arc<dyn BankClient>,
        audit: AuditSink,
        auth_config: AuthConfig,
    ) -> Self {
        Self {
            ledger: Arc::new(ledger),
            conversion: Arc::new(conversion),
            idempotency: Arc::new(idempotency),
            bank,
            audit: Arc::new(audit),
            auth_config: Arc::new(auth_config),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> (AppState, tempfile::TempDir) {
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::convert::{QuoteStore, StaticRateTable};
    use crate::reconcile::bank::{
        BankDepositRecord, BankError, PayoutReceipt, PayoutRequest, ScrapeRequest,
    };

    struct StubBank;

    #[async_trait]
    impl BankClient for StubBank {
        async fn scrape_deposits(
            &self,
            _request: &ScrapeRequest,
        ) -> Result<Vec<BankDepositRecord>, BankError> {
            Ok(Vec::new())
        }

        async fn initiate_payout(
            &self,
            _request: &PayoutRequest,
        ) -> Result<PayoutReceipt, BankError> {
            Ok(PayoutReceipt {
                success: true,
                payout_id: None,
            })
        }
    }

    let temp = tempfile::tempdir().unwrap();
    let ledger = LedgerDb::open(&temp.path().join("ledger.redb")).unwrap();
    let rates = Arc::new(
        StaticRateTable::new().with_pair("BTC", "ZAR", "1000000".parse().unwrap()),
    );
    let conversion = ConversionEngine::new(
        QuoteStore::new(64, Duration::from_secs(120)),
        rates,
        50,
    );
    let idempotency = IdempotencyCache::new(256, Duration::from_secs(3600));
    let audit = AuditSink::new(temp.path().join("audit")).unwrap();

    let state = AppState::new(
        ledger,
        conversion,
        idempotency,
        Arc::new(StubBank),
        audit,
        AuthConfig::default(),
    );
    (state, temp)
}
