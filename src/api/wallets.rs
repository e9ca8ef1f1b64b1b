// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit::{AuditEvent, AuditEventType},
    audit_log,
    auth::Auth,
    error::ApiError,
    ledger::{LedgerEntry, UserInfo, Wallet},
    state::AppState,
};

#[derive(Deserialize, ToSchema)]
pub struct ProvisionRequest {
    /// Fiat currency for the user's pool deposits (e.g. "ZAR").
    #[serde(alias = "fiatCurrency")]
    pub fiat_currency: String,
    /// Crypto currency for the hot wallet (e.g. "BTC").
    #[serde(alias = "cryptoCurrency")]
    pub crypto_currency: String,
    /// Display name; initials feed payment reference generation.
    #[serde(alias = "displayName")]
    pub display_name: String,
    #[serde(default, alias = "mfaEnabled")]
    pub mfa_enabled: bool,
}

#[utoipa::path(
    post,
    path = "/wallet/infrastructure",
    request_body = ProvisionRequest,
    tag = "Wallets",
    responses(
        (status = 201, body = [Wallet]),
        (status = 400, description = "Missing or malformed input"),
    )
)]
pub async fn provision_infrastructure(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<Vec<Wallet>>), ApiError> {
    if request.fiat_currency.trim().is_empty() || request.crypto_currency.trim().is_empty() {
        return Err(ApiError::bad_request("currencies are required"));
    }

    let wallets = state.ledger.provision_infrastructure(
        &ctx.user_id,
        &ctx.tenant_id,
        &ctx.broker_id,
        &request.fiat_currency,
        &request.crypto_currency,
        &UserInfo {
            display_name: request.display_name,
            mfa_enabled: request.mfa_enabled,
        },
    )?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::WalletProvisioned)
            .with_user(&ctx.user_id)
            .with_resource("wallet", &wallets[0].wallet_id)
    );
    Ok((StatusCode::CREATED, Json(wallets)))
}

#[utoipa::path(
    get,
    path = "/wallet/user/{user_id}",
    params(("user_id" = String, Path, description = "User whose wallets to list")),
    tag = "Wallets",
    responses(
        (status = 200, body = [Wallet]),
        (status = 403, description = "Not the owner and not staff"),
    )
)]
pub async fn list_user_wallets(
    Auth(ctx): Auth,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Wallet>>, ApiError> {
    if !ctx.can_view_user(&user_id) {
        return Err(ApiError::forbidden("cannot view another user's wallets"));
    }
    let wallets = state.ledger.list_user_wallets(&user_id)?;
    Ok(Json(wallets))
}

#[utoipa::path(
    get,
    path = "/wallet/wallet/{wallet_id}",
    params(("wallet_id" = String, Path, description = "Wallet id")),
    tag = "Wallets",
    responses(
        (status = 200, body = Wallet),
        (status = 404, description = "No such wallet"),
    )
)]
pub async fn get_wallet(
    Auth(ctx): Auth,
    Path(wallet_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Wallet>, ApiError> {
    let wallet = state
        .ledger
        .get_wallet(&wallet_id)?
        .ok_or_else(|| ApiError::not_found(format!("wallet {wallet_id} not found")))?;
    if !ctx.can_view_user(&wallet.user_id) {
        return Err(ApiError::forbidden("cannot view another user's wallet"));
    }
    Ok(Json(wallet))
}

#[derive(Deserialize, IntoParams)]
pub struct EntriesQuery {
    /// Opaque cursor from a previous page.
    pub cursor: Option<String>,
    /// Page size (default 50, max 200).
    pub limit: Option<usize>,
}

#[derive(serde::Serialize, ToSchema)]
pub struct EntriesPage {
    pub entries: Vec<LedgerEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[utoipa::path(
    get,
    path = "/wallet/wallet/{wallet_id}/entries",
    params(
        ("wallet_id" = String, Path, description = "Wallet id"),
        EntriesQuery,
    ),
    tag = "Wallets",
    responses((status = 200, body = EntriesPage))
)]
pub async fn list_entries(
    Auth(ctx): Auth,
    Path(wallet_id): Path<String>,
    Query(params): Query<EntriesQuery>,
    State(state): State<AppState>,
) -> Result<Json<EntriesPage>, ApiError> {
    let wallet = state
        .ledger
        .get_wallet(&wallet_id)?
        .ok_or_else(|| ApiError::not_found(format!("wallet {wallet_id} not found")))?;
    if !ctx.can_view_user(&wallet.user_id) {
        return Err(ApiError::forbidden("cannot view another user's wallet"));
    }

    let limit = params.limit.unwrap_or(50).min(200);
    let (entries, next_cursor) =
        state
            .ledger
            .list_entries(&wallet_id, params.cursor.as_deref(), limit)?;
    Ok(Json(EntriesPage {
        entries,
        next_cursor,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{RequestContext, Role};
    use crate::state::test_state;

    fn ctx(user_id: &str, role: Role) -> RequestContext {
        RequestContext {
            user_id: user_id.to_string(),
            tenant_id: "tenant-1".to_string(),
            broker_id: "acme".to_string(),
            role,
        }
    }

    fn provision_body() -> ProvisionRequest {
        ProvisionRequest {
            fiat_currency: "ZAR".to_string(),
            crypto_currency: "BTC".to_string(),
            display_name: "Jane Dlamini".to_string(),
            mfa_enabled: false,
        }
    }

    #[tokio::test]
    async fn provision_creates_fiat_and_crypto_wallets() {
        let (state, _temp) = test_state();

        let (status, Json(wallets)) = provision_infrastructure(
            Auth(ctx("user-1", Role::Client)),
            State(state.clone()),
            Json(provision_body()),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(wallets.len(), 2);
        assert!(wallets.iter().all(|w| w.user_id == "user-1"));
    }

    #[tokio::test]
    async fn clients_cannot_list_other_users_wallets() {
        let (state, _temp) = test_state();

        let err = list_user_wallets(
            Auth(ctx("user-1", Role::Client)),
            Path("user-2".to_string()),
            State(state),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admins_can_view_any_wallet() {
        let (state, _temp) = test_state();
        provision_infrastructure(
            Auth(ctx("user-1", Role::Client)),
            State(state.clone()),
            Json(provision_body()),
        )
        .await
        .unwrap();

        let Json(wallets) = list_user_wallets(
            Auth(ctx("admin-1", Role::Admin)),
            Path("user-1".to_string()),
            State(state),
        )
        .await
        .unwrap();
        assert_eq!(wallets.len(), 2);
    }

    #[tokio::test]
    async fn unknown_wallet_is_404() {
        let (state, _temp) = test_state();
        let err = get_wallet(
            Auth(ctx("user-1", Role::Client)),
            Path("nope".to_string()),
            State(state),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
