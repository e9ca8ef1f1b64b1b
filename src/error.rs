// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::convert::ConvertError;
use crate::ledger::LedgerError;
use crate::reconcile::BankError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        match &error {
            LedgerError::NotFound(_) => Self::not_found(error.to_string()),
            LedgerError::Validation(_) | LedgerError::InvalidAmount { .. } => {
                Self::bad_request(error.to_string())
            }
            LedgerError::InsufficientFunds { .. } | LedgerError::WalletFrozen { .. } => {
                Self::bad_request(error.to_string())
            }
            LedgerError::InvalidState { .. } => Self::conflict(error.to_string()),
            LedgerError::NotAnApprover { .. } => Self::forbidden(error.to_string()),
            LedgerError::ReferenceExhausted { .. } => Self::service_unavailable(error.to_string()),
            // Storage and serialization failures never leak internals
            _ => Self::internal("internal storage error"),
        }
    }
}

impl From<ConvertError> for ApiError {
    fn from(error: ConvertError) -> Self {
        match error {
            ConvertError::UnsupportedPair { .. }
            | ConvertError::InvalidAmount { .. }
            | ConvertError::SameCurrency
            | ConvertError::FeesNotAccepted => Self::bad_request(error.to_string()),
            ConvertError::NoWallet { .. } | ConvertError::QuoteNotFound { .. } => {
                Self::not_found(error.to_string())
            }
            ConvertError::QuoteExpired { .. } => Self::conflict(error.to_string()),
            ConvertError::Ledger(inner) => inner.into(),
        }
    }
}

impl From<BankError> for ApiError {
    fn from(error: BankError) -> Self {
        match error {
            BankError::MissingConfig(_) => Self::service_unavailable(error.to_string()),
            BankError::Request(_) | BankError::InvalidResponse(_) => {
                Self::bad_gateway(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let conflict = ApiError::conflict("already executed");
        assert_eq!(conflict.status, StatusCode::CONFLICT);
    }

    #[test]
    fn ledger_errors_map_to_the_taxonomy() {
        let err: ApiError = LedgerError::NotFound("wallet w1".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = LedgerError::InsufficientFunds {
            wallet_id: "w1".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = LedgerError::InvalidState {
            entity: "proposal",
            id: "p1".to_string(),
            state: "executed".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: ApiError = LedgerError::NotAnApprover {
            approver_id: "u1".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn convert_errors_map_to_the_taxonomy() {
        let err: ApiError = ConvertError::FeesNotAccepted.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = ConvertError::QuoteExpired {
            quote_id: "q1".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn bank_errors_surface_as_gateway_failures() {
        let err: ApiError = BankError::InvalidResponse("boom".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data"}"#);
    }
}
