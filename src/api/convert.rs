// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit::{AuditEvent, AuditEventType},
    audit_log,
    auth::Auth,
    convert::{ConversionQuote, ConversionReceipt},
    error::ApiError,
    state::AppState,
};

#[derive(Deserialize, IntoParams)]
pub struct QuoteQuery {
    #[serde(alias = "fromCurrency")]
    pub from_currency: String,
    #[serde(alias = "toCurrency")]
    pub to_currency: String,
    pub amount: Decimal,
}

#[utoipa::path(
    get,
    path = "/wallet/convert/quote",
    params(QuoteQuery),
    tag = "Convert",
    responses(
        (status = 200, body = ConversionQuote),
        (status = 400, description = "Unsupported pair or invalid amount"),
    )
)]
pub async fn get_quote(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Query(params): Query<QuoteQuery>,
) -> Result<Json<ConversionQuote>, ApiError> {
    let quote = state.conversion.get_quote(
        &ctx.user_id,
        &ctx.tenant_id,
        &ctx.broker_id,
        &params.from_currency,
        &params.to_currency,
        params.amount,
    )?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::ConversionQuoted)
            .with_user(&ctx.user_id)
            .with_resource("quote", &quote.quote_id)
    );
    Ok(Json(quote))
}

#[derive(Deserialize, ToSchema)]
pub struct ConfirmRequest {
    #[serde(alias = "quoteId")]
    pub quote_id: String,
    /// Must be true; refusal never mutates balances.
    #[serde(default, alias = "acceptFees")]
    pub accept_fees: bool,
}

#[utoipa::path(
    post,
    path = "/wallet/convert/confirm",
    request_body = ConfirmRequest,
    tag = "Convert",
    responses(
        (status = 200, body = ConversionReceipt),
        (status = 400, description = "Fees not accepted"),
        (status = 404, description = "Quote not found"),
        (status = 409, description = "Quote expired"),
    )
)]
pub async fn confirm_conversion(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ConversionReceipt>, ApiError> {
    let receipt = state.conversion.confirm(
        &state.ledger,
        &ctx.user_id,
        &request.quote_id,
        request.accept_fees,
    )?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::ConversionExecuted)
            .with_user(&ctx.user_id)
            .with_resource("quote", &receipt.quote_id)
            .with_details(serde_json::json!({
                "debited": receipt.debited.to_string(),
                "credited": receipt.credited.to_string(),
            }))
    );
    Ok(Json(receipt))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::api::wallets::{provision_infrastructure, ProvisionRequest};
    use crate::auth::{RequestContext, Role};
    use crate::ledger::EntryKind;
    use crate::state::test_state;

    fn ctx(user_id: &str) -> RequestContext {
        RequestContext {
            user_id: user_id.to_string(),
            tenant_id: "tenant-1".to_string(),
            broker_id: "acme".to_string(),
            role: Role::Client,
        }
    }

    async fn seed(state: &AppState) {
        let (_, Json(wallets)) = provision_infrastructure(
            Auth(ctx("user-1")),
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
        state
            .ledger
            .credit(
                &wallets[0].wallet_id,
                "10000.00".parse().unwrap(),
                EntryKind::Deposit,
                "seed",
            )
            .unwrap();
    }

    #[tokio::test]
    async fn quote_then_confirm_executes() {
        let (state, _temp) = test_state();
        seed(&state).await;

        let Json(quote) = get_quote(
            Auth(ctx("user-1")),
            State(state.clone()),
            Query(QuoteQuery {
                from_currency: "ZAR".to_string(),
                to_currency: "BTC".to_string(),
                amount: "1000".parse().unwrap(),
            }),
        )
        .await
        .unwrap();

        let Json(receipt) = confirm_conversion(
            Auth(ctx("user-1")),
            State(state),
            Json(ConfirmRequest {
                quote_id: quote.quote_id.clone(),
                accept_fees: true,
            }),
        )
        .await
        .unwrap();
        assert_eq!(receipt.quote_id, quote.quote_id);
        assert_eq!(receipt.credited, quote.target_amount);
    }

    #[tokio::test]
    async fn confirm_without_accepting_fees_is_rejected() {
        let (state, _temp) = test_state();
        seed(&state).await;

        let Json(quote) = get_quote(
            Auth(ctx("user-1")),
            State(state.clone()),
            Query(QuoteQuery {
                from_currency: "ZAR".to_string(),
                to_currency: "BTC".to_string(),
                amount: "1000".parse().unwrap(),
            }),
        )
        .await
        .unwrap();

        let err = confirm_conversion(
            Auth(ctx("user-1")),
            State(state),
            Json(ConfirmRequest {
                quote_id: quote.quote_id,
                accept_fees: false,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_quote_is_404() {
        let (state, _temp) = test_state();
        let err = confirm_conversion(
            Auth(ctx("user-1")),
            State(state),
            Json(ConfirmRequest {
                quote_id: "nope".to_string(),
                accept_fees: true,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
