// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::Auth,
    error::ApiError,
    report::{statement_csv, tax_report_csv, LotMethod},
    state::AppState,
};

fn csv_response(filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

#[derive(Deserialize, IntoParams)]
pub struct StatementQuery {
    /// Staff may export for another user; defaults to the caller.
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[utoipa::path(
    get,
    path = "/wallet/statements",
    params(StatementQuery),
    tag = "Reports",
    responses(
        (status = 200, description = "CSV statement of ledger entries", content_type = "text/csv"),
        (status = 403, description = "Not the owner and not staff"),
    )
)]
pub async fn statements(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Query(params): Query<StatementQuery>,
) -> Result<Response, ApiError> {
    let user_id = params.user_id.unwrap_or_else(|| ctx.user_id.clone());
    if !ctx.can_view_user(&user_id) {
        return Err(ApiError::forbidden("cannot export another user's statement"));
    }

    let body = statement_csv(&state.ledger, &user_id, params.from, params.to)?;
    Ok(csv_response("statement.csv", body))
}

#[derive(Deserialize, IntoParams)]
pub struct TaxReportQuery {
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    /// Lot accounting method; defaults to FIFO.
    pub method: Option<LotMethod>,
}

#[utoipa::path(
    get,
    path = "/wallet/tax-report",
    params(TaxReportQuery),
    tag = "Reports",
    responses(
        (status = 200, description = "CSV capital-gains report", content_type = "text/csv"),
        (status = 403, description = "Not the owner and not staff"),
    )
)]
pub async fn tax_report(
    Auth(ctx): Auth,
    State(state): State<AppState>,
    Query(params): Query<TaxReportQuery>,
) -> Result<Response, ApiError> {
    let user_id = params.user_id.unwrap_or_else(|| ctx.user_id.clone());
    if !ctx.can_view_user(&user_id) {
        return Err(ApiError::forbidden("cannot export another user's tax report"));
    }

    let method = params.method.unwrap_or(LotMethod::Fifo);
    let body = tax_report_csv(&state.ledger, &user_id, method)?;
    Ok(csv_response("tax-report.csv", body))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::StatusCode;

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

    #[tokio::test]
    async fn statement_export_sets_csv_headers() {
        let (state, _temp) = test_state();

        let response = statements(
            Auth(ctx("user-1", Role::Client)),
            State(state),
            Query(StatementQuery {
                user_id: None,
                from: None,
                to: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("date,wallet_id"));
    }

    #[tokio::test]
    async fn clients_cannot_export_for_others() {
        let (state, _temp) = test_state();

        let err = tax_report(
            Auth(ctx("user-1", Role::Client)),
            State(state),
            Query(TaxReportQuery {
                user_id: Some("user-2".to_string()),
                method: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn auditors_can_export_for_any_user() {
        let (state, _temp) = test_state();

        let response = tax_report(
            Auth(ctx("auditor-1", Role::Auditor)),
            State(state),
            Query(TaxReportQuery {
                user_id: Some("user-1".to_string()),
                method: Some(LotMethod::Lifo),
            }),
        )
        .await;
        assert!(response.is_ok());
    }
}
