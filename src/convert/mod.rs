// SPDX-License-Identifier: AGPL-3.0-or-later

//! Currency conversion: rate sources, server-held quotes and atomic
//! execution against the ledger.

pub mod engine;
pub mod quote;
pub mod rates;

pub use engine::{ConversionEngine, ConversionReceipt, ConvertError};
pub use quote::{ConversionQuote, QuoteStore};
pub use rates::{RateSource, StaticRateTable};
