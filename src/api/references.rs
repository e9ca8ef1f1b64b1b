// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    audit::{AuditEvent, AuditEventType},
    audit_log,
    auth::Auth,
    error::ApiError,
    ledger::{ReferenceType, UniqueReference},
    state::AppState,
};

#[derive(Deserialize, ToSchema)]
pub struct GenerateReferenceRequest {
    #[serde(default = "default_reference_type", alias = "referenceType")]
    pub reference_type: ReferenceType,
    pub currency: String,
    /// Advisory; deposits still match when the actual amount differs.
    #[serde(default, alias = "expectedAmount")]
    pub expected_amount: Option<Decimal>,
}

fn default_reference_type() -> ReferenceType {
    ReferenceType::OneTime
}

#[utoipa::path(
    post,
    path = "/wallet/reference/generate",
    request_body = GenerateReferenceRequest,
    tag = "References",
    responses(
        (status = 201, body = UniqueReference),
        (status = 400, description = "Missing currency or non-positive expected amount"),
    )
)]
pub async fn generate_reference(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Json(request): Json<GenerateReferenceRequest>,
) -> Result<(StatusCode, Json<UniqueReference>), ApiError> {
    let reference = state.ledger.generate_reference(
        &ctx.user_id,
        &ctx.tenant_id,
        &ctx.broker_id,
        request.reference_type,
        &request.currency,
        request.expected_amount,
    )?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::ReferenceGenerated)
            .with_user(&ctx.user_id)
            .with_resource("reference", &reference.reference)
    );
    Ok((StatusCode::CREATED, Json(reference)))
}

#[utoipa::path(
    get,
    path = "/wallet/reference/persistent/{currency}",
    params(("currency" = String, Path, description = "Deposit currency")),
    tag = "References",
    responses((status = 200, body = UniqueReference))
)]
pub async fn persistent_reference(
    Auth(ctx): Auth,
    Path(currency): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<UniqueReference>, ApiError> {
    let reference = state.ledger.get_or_create_persistent_reference(
        &ctx.user_id,
        &ctx.tenant_id,
        &ctx.broker_id,
        &currency,
    )?;
    Ok(Json(reference))
}

#[utoipa::path(
    get,
    path = "/wallet/reference/{reference}",
    params(("reference" = String, Path, description = "Payment reference string")),
    tag = "References",
    responses(
        (status = 200, body = UniqueReference),
        (status = 404, description = "Unknown reference"),
    )
)]
pub async fn lookup_reference(
    Auth(ctx): Auth,
    Path(reference): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<UniqueReference>, ApiError> {
    let found = state
        .ledger
        .get_reference(&reference.to_uppercase())?
        .ok_or_else(|| ApiError::not_found("reference not found"))?;

    // References reveal who is expected to pay; owners and staff only.
    if !ctx.can_view_user(&found.user_id) {
        return Err(ApiError::not_found("reference not found"));
    }
    Ok(Json(found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{RequestContext, Role};
    use crate::ledger::ReferenceStatus;
    use crate::state::test_state;

    fn ctx(user_id: &str, role: Role) -> RequestContext {
        RequestContext {
            user_id: user_id.to_string(),
            tenant_id: "tenant-1".to_string(),
            broker_id: "acme".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn generate_one_time_reference() {
        let (state, _temp) = test_state();

        let (status, Json(reference)) = generate_reference(
            Auth(ctx("user-1", Role::Client)),
            State(state),
            Json(GenerateReferenceRequest {
                reference_type: ReferenceType::OneTime,
                currency: "ZAR".to_string(),
                expected_amount: Some("100.00".parse().unwrap()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(reference.status, ReferenceStatus::Active);
        assert!(reference.reference.starts_with("ACME-"));
    }

    #[tokio::test]
    async fn persistent_reference_is_stable() {
        let (state, _temp) = test_state();

        let Json(first) = persistent_reference(
            Auth(ctx("user-1", Role::Client)),
            Path("ZAR".to_string()),
            State(state.clone()),
        )
        .await
        .unwrap();
        let Json(second) = persistent_reference(
            Auth(ctx("user-1", Role::Client)),
            Path("ZAR".to_string()),
            State(state),
        )
        .await
        .unwrap();
        assert_eq!(first.reference, second.reference);
    }

    #[tokio::test]
    async fn lookup_hides_other_users_references() {
        let (state, _temp) = test_state();
        let (_, Json(reference)) = generate_reference(
            Auth(ctx("user-1", Role::Client)),
            State(state.clone()),
            Json(GenerateReferenceRequest {
                reference_type: ReferenceType::OneTime,
                currency: "ZAR".to_string(),
                expected_amount: None,
            }),
        )
        .await
        .unwrap();

        let err = lookup_reference(
            Auth(ctx("user-2", Role::Client)),
            Path(reference.reference.clone()),
            State(state.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        // Staff can still resolve it.
        let ok = lookup_reference(
            Auth(ctx("ops-1", Role::Ops)),
            Path(reference.reference),
            State(state),
        )
        .await;
        assert!(ok.is_ok());
    }
}
