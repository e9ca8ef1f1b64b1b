// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server-side quote storage for the quote-then-confirm conversion flow.
//!
//! Quotes live only in process memory: a restart invalidates outstanding
//! quotes, which is acceptable because clients re-quote on a 404/410 and the
//! TTL is short anyway.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A priced conversion offer, valid until `expires_at`.
///
/// All amount fields are fixed at quote time; confirmation executes exactly
/// these numbers or fails, never reprices.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversionQuote {
    pub quote_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub broker_id: String,
    pub from_currency: String,
    pub to_currency: String,
    /// Amount debited from the source wallet, fees included.
    pub source_amount: Decimal,
    /// Fee in basis points of the source amount.
    pub fee_bps: u32,
    /// Fee portion of the source amount.
    pub fee_amount: Decimal,
    /// Source amount net of fees; this is what gets converted.
    pub net_source_amount: Decimal,
    /// Units of target currency per unit of source currency.
    pub rate: Decimal,
    /// Amount credited to the target wallet.
    pub target_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConversionQuote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process store of outstanding quotes, LRU-bounded with a TTL.
///
/// Quotes are single-use: confirmation takes them out atomically, so two
/// racing confirms of the same quote cannot both execute.
pub struct QuoteStore {
    quotes: Mutex<LruCache<String, ConversionQuote>>,
    ttl: Duration,
}

impl QuoteStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            quotes: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
            ttl,
        }
    }

    /// Quote lifetime, used when pricing new quotes.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn put(&self, quote: ConversionQuote) {
        if let Ok(mut quotes) = self.quotes.lock() {
            quotes.put(quote.quote_id.clone(), quote);
        }
    }

    /// Look at a quote without consuming it.
    pub fn peek(&self, quote_id: &str) -> Option<ConversionQuote> {
        let mut quotes = self.quotes.lock().ok()?;
        quotes.get(quote_id).cloned()
    }

    /// Remove and return a quote. At most one caller gets it.
    pub fn take(&self, quote_id: &str) -> Option<ConversionQuote> {
        let mut quotes = self.quotes.lock().ok()?;
        quotes.pop(quote_id)
    }
}
