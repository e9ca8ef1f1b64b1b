// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    audit::{AuditEvent, AuditEventType},
    audit_log,
    auth::OpsOnly,
    error::ApiError,
    idempotency,
    reconcile::{
        bank::ScrapeRequest, matcher::scrape_and_apply, BankDepositRecord, DepositDisposition,
    },
    state::AppState,
};

/// Caller-supplied idempotency header for retry-safe mutations.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Deserialize, ToSchema)]
pub struct FiatDepositRequest {
    /// Bank-side record id; omitted for manually keyed deposits.
    #[serde(default, alias = "recordId")]
    pub record_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    /// Transfer narrative containing the payment reference.
    pub reference: String,
}

/// Credit a matched fiat deposit.
///
/// Retry-safe: the response is cached under an idempotency key derived from
/// the caller's scope, the record id and an optional `idempotency-key`
/// header; retries within the window replay the original response without
/// re-crediting.
#[utoipa::path(
    post,
    path = "/wallet/deposit/fiat",
    request_body = FiatDepositRequest,
    tag = "Deposits",
    responses(
        (status = 200, description = "Deposit processed; disposition in body"),
        (status = 400, description = "Invalid amount"),
        (status = 403, description = "Requires ops or admin role"),
    )
)]
pub async fn deposit_fiat(
    OpsOnly(ctx): OpsOnly,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FiatDepositRequest>,
) -> Result<Response, ApiError> {
    let idempotency_header = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok());
    let amount_str = request.amount.to_string();
    let key = idempotency::make_key(&[
        Some("deposit_fiat"),
        Some(&ctx.broker_id),
        request.record_id.as_deref(),
        Some(&request.reference),
        Some(&amount_str),
        Some(&request.currency),
        idempotency_header,
    ]);

    if let Some(stored) = state.idempotency.get(&key) {
        return Ok(replay(stored.status, stored.body));
    }

    let record = BankDepositRecord {
        record_id: request
            .record_id
            .map(|id| format!("{}:{id}", ctx.broker_id))
            .unwrap_or_else(|| format!("{}:manual-{key}", ctx.broker_id)),
        amount: request.amount,
        currency: request.currency,
        raw_reference: request.reference,
        received_at: Utc::now(),
    };

    let outcome = state.ledger.process_fiat_deposit(&record)?;

    let event_type = match outcome.disposition {
        DepositDisposition::Credited => AuditEventType::DepositCredited,
        _ => AuditEventType::DepositUnallocated,
    };
    audit_log!(
        state.audit,
        AuditEvent::new(event_type)
            .with_user(&ctx.user_id)
            .with_resource("bank_record", &record.record_id)
    );

    let body = serde_json::to_vec(&outcome)
        .map_err(|e| ApiError::internal(format!("serialization failed: {e}")))?;
    // Snapshot before acknowledging so a replayed retry sees this response
    state.idempotency.put(&key, StatusCode::OK.as_u16(), body.clone());
    Ok(replay(StatusCode::OK.as_u16(), body))
}

fn replay(status: u16, body: Vec<u8>) -> Response {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

#[derive(Deserialize, ToSchema)]
pub struct ApplyDepositsRequest {
    /// Defaults to the caller's broker.
    #[serde(default, alias = "brokerId")]
    pub broker_id: Option<String>,
    #[serde(alias = "poolAccountNumber")]
    pub pool_account_number: String,
    #[serde(alias = "fromDate")]
    pub from_date: NaiveDate,
    #[serde(alias = "toDate")]
    pub to_date: NaiveDate,
    /// Report matches without crediting anything.
    #[serde(default, alias = "dryRun")]
    pub dry_run: bool,
}

/// Batch scrape, match and credit deposits for a pool account.
#[utoipa::path(
    post,
    path = "/wallet/deposits/apply",
    request_body = ApplyDepositsRequest,
    tag = "Deposits",
    responses(
        (status = 200, description = "Per-record report"),
        (status = 400, description = "Invalid date range"),
        (status = 502, description = "Banking collaborator failure"),
    )
)]
pub async fn apply_deposits(
    OpsOnly(ctx): OpsOnly,
    State(state): State<AppState>,
    Json(request): Json<ApplyDepositsRequest>,
) -> Result<Json<crate::reconcile::ScrapeApplyReport>, ApiError> {
    if request.from_date > request.to_date {
        return Err(ApiError::bad_request("from_date must not be after to_date"));
    }

    let scrape = ScrapeRequest {
        broker_id: request.broker_id.unwrap_or_else(|| ctx.broker_id.clone()),
        pool_account_number: request.pool_account_number,
        from_date: request.from_date,
        to_date: request.to_date,
    };

    let report = scrape_and_apply(&state.ledger, state.bank.as_ref(), &scrape, request.dry_run)
        .await
        .map_err(ApiError::from)?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::ScrapeApplied)
            .with_user(&ctx.user_id)
            .with_resource("pool_account", &scrape.pool_account_number)
            .with_details(serde_json::json!({
                "dry_run": report.dry_run,
                "total": report.total,
                "credited": report.credited,
                "failed": report.failed,
            }))
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::api::references::{generate_reference, GenerateReferenceRequest};
    use crate::api::wallets::{provision_infrastructure, ProvisionRequest};
    use crate::auth::{Auth, RequestContext, Role};
    use crate::ledger::ReferenceType;
    use crate::state::test_state;

    fn ctx(role: Role) -> RequestContext {
        RequestContext {
            user_id: "ops-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            broker_id: "acme".to_string(),
            role,
        }
    }

    fn client_ctx(user_id: &str) -> RequestContext {
        RequestContext {
            user_id: user_id.to_string(),
            tenant_id: "tenant-1".to_string(),
            broker_id: "acme".to_string(),
            role: Role::Client,
        }
    }

    async fn seed_reference(state: &AppState) -> String {
        provision_infrastructure(
            Auth(client_ctx("user-1")),
            State(state.clone()),
            Json(ProvisionRequest {
                fiat_currency: "ZAR".to_string(),
                crypto_currency: "BTC".to_string(),
                display_name: "Jane Dlamini".to_string(),
                mfa_enabled: false,
            }),
        )
        .await
        .unwrap();
        let (_, Json(reference)) = generate_reference(
            Auth(client_ctx("user-1")),
            State(state.clone()),
            Json(GenerateReferenceRequest {
                reference_type: ReferenceType::OneTime,
                currency: "ZAR".to_string(),
                expected_amount: Some("100.00".parse().unwrap()),
            }),
        )
        .await
        .unwrap();
        reference.reference
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn retried_deposit_replays_without_double_credit() {
        let (state, _temp) = test_state();
        let reference = seed_reference(&state).await;

        let request = || FiatDepositRequest {
            record_id: Some("row-1".to_string()),
            amount: "100.00".parse().unwrap(),
            currency: "ZAR".to_string(),
            reference: reference.clone(),
        };

        let first = deposit_fiat(
            OpsOnly(ctx(Role::Ops)),
            State(state.clone()),
            HeaderMap::new(),
            Json(request()),
        )
        .await
        .unwrap();
        let first_body = body_json(first).await;
        assert_eq!(first_body["disposition"], "credited");

        let second = deposit_fiat(
            OpsOnly(ctx(Role::Ops)),
            State(state.clone()),
            HeaderMap::new(),
            Json(request()),
        )
        .await
        .unwrap();
        let second_body = body_json(second).await;
        // Byte-identical replay of the original acknowledgement.
        assert_eq!(first_body, second_body);

        let wallets = state.ledger.list_user_wallets("user-1").unwrap();
        let fiat = wallets.iter().find(|w| w.currency == "ZAR").unwrap();
        assert_eq!(fiat.balance, "100.00".parse::<Decimal>().unwrap());
    }

    #[tokio::test]
    async fn apply_rejects_inverted_date_range() {
        let (state, _temp) = test_state();
        let err = apply_deposits(
            OpsOnly(ctx(Role::Admin)),
            State(state),
            Json(ApplyDepositsRequest {
                broker_id: None,
                pool_account_number: "123".to_string(),
                from_date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
                to_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                dry_run: true,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn apply_with_stub_bank_reports_empty_batch() {
        let (state, _temp) = test_state();
        let Json(report) = apply_deposits(
            OpsOnly(ctx(Role::Admin)),
            State(state),
            Json(ApplyDepositsRequest {
                broker_id: None,
                pool_account_number: "123".to_string(),
                from_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                to_date: NaiveDate::from_ymd_opt(2026, 8, 28).unwrap(),
                dry_run: false,
            }),
        )
        .await
        .unwrap();
        assert_eq!(report.total, 0);
    }
}
