// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exchange rate sources for currency conversion.

use std::collections::HashMap;

use rust_decimal::Decimal;

/// Provider of exchange rates between currency pairs.
///
/// The engine treats rates as opaque: it asks for `from -> to` and either
/// gets a rate or the pair is unsupported.
pub trait RateSource: Send + Sync {
    fn rate(&self, from_currency: &str, to_currency: &str) -> Option<Decimal>;
}

/// Fixed in-memory rate table.
///
/// Stores each pair directionally; registering a pair also registers its
/// inverse so `rate("ZAR", "BTC")` and `rate("BTC", "ZAR")` stay consistent.
pub struct StaticRateTable {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRateTable {
    pub fn new() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    /// Register `from -> to = rate` and its inverse.
    pub fn with_pair(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if !rate.is_zero() {
            self.rates
                .insert((to.clone(), from.clone()), Decimal::ONE / rate);
        }
        self.rates.insert((from, to), rate);
        self
    }
}

impl Default for StaticRateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RateSource for StaticRateTable {
    fn rate(&self, from_currency: &str, to_currency: &str) -> Option<Decimal> {
        self.rates
            .get(&(from_currency.to_uppercase(), to_currency.to_uppercase()))
            .copied()
    }
}
