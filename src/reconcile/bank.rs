// SPDX-License-Identifier: AGPL-3.0-or-later

//! Banking-scrape collaborator boundary.
//!
//! The core never talks to the bank directly; it consumes this trait.
//! Production wires in [`HttpBankClient`]; tests substitute fixtures.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Environment variable for the scrape service base URL.
pub const BANK_API_URL_ENV: &str = "BANK_API_URL";
/// Environment variable for the scrape service API key.
pub const BANK_API_KEY_ENV: &str = "BANK_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("bank client configuration error: {0}")]
    MissingConfig(String),

    #[error("bank request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bank returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// One scraped deposit row from a broker pool account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BankDepositRecord {
    /// Bank-side unique id for the row; dedup key across scrape runs.
    pub record_id: String,
    /// Deposited amount as reported by the bank.
    pub amount: Decimal,
    /// Deposit currency.
    pub currency: String,
    /// Raw transfer narrative; may contain a payment reference plus noise.
    pub raw_reference: String,
    /// Value date of the deposit.
    pub received_at: DateTime<Utc>,
}

/// Parameters for a scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub broker_id: String,
    pub pool_account_number: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

/// Payout instruction against a pool account.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutRequest {
    pub broker_id: String,
    pub pool_account_number: String,
    pub beneficiary_account: String,
    pub amount: Decimal,
    pub currency: String,
    pub narrative: String,
}

/// Acknowledgement from the banking collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutReceipt {
    pub success: bool,
    #[serde(default)]
    pub payout_id: Option<String>,
}

/// External banking-scrape service.
#[async_trait]
pub trait BankClient: Send + Sync {
    /// Pull raw deposit records for a pool account over a bounded date range.
    async fn scrape_deposits(&self, request: &ScrapeRequest)
        -> Result<Vec<BankDepositRecord>, BankError>;

    /// Instruct the bank to pay out from a pool account.
    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BankError>;
}

/// HTTP implementation over the scrape service's JSON API.
pub struct HttpBankClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpBankClient {
    /// Build a client from `BANK_API_URL` / `BANK_API_KEY`.
    pub fn from_env() -> Result<Self, BankError> {
        let base_url = std::env::var(BANK_API_URL_ENV)
            .map_err(|_| BankError::MissingConfig(format!("{BANK_API_URL_ENV} is not set")))?;
        let api_key = std::env::var(BANK_API_KEY_ENV)
            .map_err(|_| BankError::MissingConfig(format!("{BANK_API_KEY_ENV} is not set")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http: reqwest::Client::new(),
        })
    }

    /// Whether the environment carries bank client configuration.
    pub fn is_configured() -> bool {
        std::env::var(BANK_API_URL_ENV).is_ok() && std::env::var(BANK_API_KEY_ENV).is_ok()
    }
}

/// Stand-in used when `BANK_API_URL`/`BANK_API_KEY` are not configured.
///
/// Every call fails with `MissingConfig`, which the API surfaces as 503, so
/// the rest of the service stays usable without a bank integration.
pub struct DisabledBankClient;

#[async_trait]
impl BankClient for DisabledBankClient {
    async fn scrape_deposits(
        &self,
        _request: &ScrapeRequest,
    ) -> Result<Vec<BankDepositRecord>, BankError> {
        Err(BankError::MissingConfig(
            "bank scrape integration is not configured".to_string(),
        ))
    }

    async fn initiate_payout(&self, _request: &PayoutRequest) -> Result<PayoutReceipt, BankError> {
        Err(BankError::MissingConfig(
            "bank payout integration is not configured".to_string(),
        ))
    }
}

#[async_trait]
impl BankClient for HttpBankClient {
    async fn scrape_deposits(
        &self,
        request: &ScrapeRequest,
    ) -> Result<Vec<BankDepositRecord>, BankError> {
        let url = format!("{}/v1/deposits/scrape", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("brokerId", request.broker_id.as_str()),
                ("poolAccountNumber", request.pool_account_number.as_str()),
                ("fromDate", &request.from_date.to_string()),
                ("toDate", &request.to_date.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BankError::InvalidResponse(format!(
                "scrape returned HTTP {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct ScrapeResponse {
            records: Vec<BankDepositRecord>,
        }

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| BankError::InvalidResponse(e.to_string()))?;
        Ok(body.records)
    }

    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, BankError> {
        let url = format!("{}/v1/payouts", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BankError::InvalidResponse(format!(
                "payout returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| BankError::InvalidResponse(e.to_string()))
    }
}
