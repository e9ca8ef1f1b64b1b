// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for the ledger database and audit trail | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `JWT_SECRET` | HS256 secret for session token verification | Required for production |
//! | `JWT_ISSUER` | Expected JWT issuer claim | Optional |
//! | `BANK_API_URL` | Banking-scrape collaborator base URL | Required for scrape runs |
//! | `BANK_API_KEY` | Banking-scrape collaborator API key | Required for scrape runs |
//! | `CONVERT_FEE_BPS` | Conversion fee in basis points | `50` |
//! | `QUOTE_TTL_SECS` | Conversion quote lifetime | `120` |
//! | `IDEMPOTENCY_TTL_SECS` | Idempotent response replay window | `86400` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

/// Environment variable name for the data directory path.
///
/// The ledger database (`ledger.redb`) and the audit trail directory
/// (`audit/`) both live under it.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Default data directory when `DATA_DIR` is unset.
pub const DEFAULT_DATA_DIR: &str = "./data";

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";

pub const CONVERT_FEE_BPS_ENV: &str = "CONVERT_FEE_BPS";
pub const DEFAULT_CONVERT_FEE_BPS: u32 = 50;

pub const QUOTE_TTL_SECS_ENV: &str = "QUOTE_TTL_SECS";
pub const DEFAULT_QUOTE_TTL_SECS: u64 = 120;

pub const IDEMPOTENCY_TTL_SECS_ENV: &str = "IDEMPOTENCY_TTL_SECS";
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 86_400;

/// Read an env var, falling back to a default when unset or unparsable.
pub fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_missing_var() {
        assert_eq!(env_or("POOL_LEDGER_TEST_UNSET_VAR", 42u32), 42);
    }
}
