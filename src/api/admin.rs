// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fiat-admin surface: manual unallocated deposits and the multi-signature
//! allocation workflow.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit::{AuditEvent, AuditEventType},
    audit_log,
    auth::AdminOnly,
    error::ApiError,
    reconcile::{AllocationProposal, UnallocatedDeposit, UnallocatedStatus},
    state::AppState,
};

#[derive(Deserialize, ToSchema)]
pub struct RecordUnallocatedRequest {
    /// Defaults to the caller's broker.
    #[serde(default, alias = "brokerId")]
    pub broker_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    /// Narrative as it appeared on the bank statement.
    #[serde(alias = "rawReference")]
    pub raw_reference: String,
    /// Value date; defaults to now.
    #[serde(default, alias = "receivedAt")]
    pub received_at: Option<DateTime<Utc>>,
}

#[utoipa::path(
    post,
    path = "/wallet/fiat-admin/unallocated",
    request_body = RecordUnallocatedRequest,
    tag = "FiatAdmin",
    responses(
        (status = 201, body = UnallocatedDeposit),
        (status = 400, description = "Non-positive amount"),
    )
)]
pub async fn record_unallocated(
    AdminOnly(ctx): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<RecordUnallocatedRequest>,
) -> Result<(StatusCode, Json<UnallocatedDeposit>), ApiError> {
    let deposit = UnallocatedDeposit::new(
        request.broker_id.unwrap_or_else(|| ctx.broker_id.clone()),
        request.amount,
        request.currency,
        request.raw_reference,
        request.received_at.unwrap_or_else(Utc::now),
    );
    state.ledger.record_unallocated_deposit(&deposit)?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::DepositUnallocated)
            .with_user(&ctx.user_id)
            .with_resource("deposit", &deposit.deposit_id)
    );
    Ok((StatusCode::CREATED, Json(deposit)))
}

#[derive(Deserialize, IntoParams)]
pub struct UnallocatedQuery {
    #[serde(alias = "brokerId")]
    pub broker_id: Option<String>,
    pub status: Option<UnallocatedStatus>,
}

#[utoipa::path(
    get,
    path = "/wallet/fiat-admin/unallocated",
    params(UnallocatedQuery),
    tag = "FiatAdmin",
    responses((status = 200, body = [UnallocatedDeposit]))
)]
pub async fn list_unallocated(
    AdminOnly(_ctx): AdminOnly,
    State(state): State<AppState>,
    Query(params): Query<UnallocatedQuery>,
) -> Result<Json<Vec<UnallocatedDeposit>>, ApiError> {
    let deposits = state
        .ledger
        .list_unallocated_deposits(params.broker_id.as_deref(), params.status)?;
    Ok(Json(deposits))
}

#[derive(Deserialize, ToSchema)]
pub struct ProposeRequest {
    #[serde(alias = "depositId")]
    pub deposit_id: String,
    #[serde(alias = "targetWalletId")]
    pub target_wallet_id: String,
    pub amount: Decimal,
    #[serde(alias = "approvalsRequired")]
    pub approvals_required: u32,
    pub approvers: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/wallet/fiat-admin/allocation/propose",
    request_body = ProposeRequest,
    tag = "FiatAdmin",
    responses(
        (status = 201, body = AllocationProposal),
        (status = 400, description = "Invalid approval threshold or amount"),
        (status = 404, description = "Deposit or target wallet not found"),
        (status = 409, description = "Deposit already proposed or allocated"),
    )
)]
pub async fn propose_allocation(
    AdminOnly(ctx): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<ProposeRequest>,
) -> Result<(StatusCode, Json<AllocationProposal>), ApiError> {
    let proposal = state.ledger.create_allocation_proposal(
        &request.deposit_id,
        &ctx.user_id,
        &request.target_wallet_id,
        request.amount,
        request.approvals_required,
        request.approvers,
    )?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::AllocationProposed)
            .with_user(&ctx.user_id)
            .with_resource("proposal", &proposal.proposal_id)
    );
    Ok((StatusCode::CREATED, Json(proposal)))
}

#[derive(Deserialize, ToSchema)]
pub struct ApproveRequest {
    #[serde(alias = "proposalId")]
    pub proposal_id: String,
}

#[utoipa::path(
    post,
    path = "/wallet/fiat-admin/allocation/approve",
    request_body = ApproveRequest,
    tag = "FiatAdmin",
    responses(
        (status = 200, body = AllocationProposal),
        (status = 403, description = "Caller is not a listed approver"),
        (status = 409, description = "Proposal is not pending or approved"),
    )
)]
pub async fn approve_allocation(
    AdminOnly(ctx): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<AllocationProposal>, ApiError> {
    let proposal = state
        .ledger
        .approve_allocation_proposal(&request.proposal_id, &ctx.user_id)?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::AllocationApproved)
            .with_user(&ctx.user_id)
            .with_resource("proposal", &proposal.proposal_id)
    );
    Ok(Json(proposal))
}

#[derive(Deserialize, ToSchema)]
pub struct RejectRequest {
    #[serde(alias = "proposalId")]
    pub proposal_id: String,
    pub reason: String,
}

#[utoipa::path(
    post,
    path = "/wallet/fiat-admin/allocation/reject",
    request_body = RejectRequest,
    tag = "FiatAdmin",
    responses(
        (status = 200, body = AllocationProposal),
        (status = 403, description = "Caller is not a listed approver"),
        (status = 409, description = "Proposal already executed or rejected"),
    )
)]
pub async fn reject_allocation(
    AdminOnly(ctx): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<AllocationProposal>, ApiError> {
    let proposal = state.ledger.reject_allocation_proposal(
        &request.proposal_id,
        &ctx.user_id,
        &request.reason,
    )?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::AllocationRejected)
            .with_user(&ctx.user_id)
            .with_resource("proposal", &proposal.proposal_id)
            .with_details(serde_json::json!({"reason": request.reason}))
    );
    Ok(Json(proposal))
}

#[derive(Deserialize, ToSchema)]
pub struct ExecuteRequest {
    #[serde(alias = "proposalId")]
    pub proposal_id: String,
}

#[utoipa::path(
    post,
    path = "/wallet/fiat-admin/allocation/execute",
    request_body = ExecuteRequest,
    tag = "FiatAdmin",
    responses(
        (status = 200, body = AllocationProposal),
        (status = 409, description = "Proposal is not approved (or already executed)"),
    )
)]
pub async fn execute_allocation(
    AdminOnly(ctx): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<AllocationProposal>, ApiError> {
    let (proposal, wallet) = state.ledger.execute_allocation(&request.proposal_id)?;

    audit_log!(
        state.audit,
        AuditEvent::new(AuditEventType::AllocationExecuted)
            .with_user(&ctx.user_id)
            .with_resource("proposal", &proposal.proposal_id)
            .with_details(serde_json::json!({
                "wallet_id": wallet.wallet_id,
                "amount": proposal.amount.to_string(),
            }))
    );
    Ok(Json(proposal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::wallets::{provision_infrastructure, ProvisionRequest};
    use crate::auth::{Auth, RequestContext, Role};
    use crate::reconcile::ProposalStatus;
    use crate::state::test_state;

    fn admin(user_id: &str) -> RequestContext {
        RequestContext {
            user_id: user_id.to_string(),
            tenant_id: "tenant-1".to_string(),
            broker_id: "acme".to_string(),
            role: Role::Admin,
        }
    }

    async fn seed_wallet(state: &AppState) -> String {
        let (_, Json(wallets)) = provision_infrastructure(
            Auth(RequestContext {
                user_id: "user-1".to_string(),
                tenant_id: "tenant-1".to_string(),
                broker_id: "acme".to_string(),
                role: Role::Client,
            }),
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
        wallets
            .iter()
            .find(|w| w.currency == "ZAR")
            .unwrap()
            .wallet_id
            .clone()
    }

    async fn seed_deposit(state: &AppState) -> String {
        let (_, Json(deposit)) = record_unallocated(
            AdminOnly(admin("ops-1")),
            State(state.clone()),
            Json(RecordUnallocatedRequest {
                broker_id: None,
                amount: "500.00".parse().unwrap(),
                currency: "ZAR".to_string(),
                raw_reference: "mystery transfer".to_string(),
                received_at: None,
            }),
        )
        .await
        .unwrap();
        deposit.deposit_id
    }

    #[tokio::test]
    async fn full_allocation_flow_credits_target_wallet() {
        let (state, _temp) = test_state();
        let wallet_id = seed_wallet(&state).await;
        let deposit_id = seed_deposit(&state).await;

        let (_, Json(proposal)) = propose_allocation(
            AdminOnly(admin("ops-1")),
            State(state.clone()),
            Json(ProposeRequest {
                deposit_id,
                target_wallet_id: wallet_id.clone(),
                amount: "500.00".parse().unwrap(),
                approvals_required: 2,
                approvers: vec!["ops-1".to_string(), "ops-2".to_string()],
            }),
        )
        .await
        .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Pending);

        approve_allocation(
            AdminOnly(admin("ops-1")),
            State(state.clone()),
            Json(ApproveRequest {
                proposal_id: proposal.proposal_id.clone(),
            }),
        )
        .await
        .unwrap();
        let Json(approved) = approve_allocation(
            AdminOnly(admin("ops-2")),
            State(state.clone()),
            Json(ApproveRequest {
                proposal_id: proposal.proposal_id.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(approved.status, ProposalStatus::Approved);

        let Json(executed) = execute_allocation(
            AdminOnly(admin("ops-1")),
            State(state.clone()),
            Json(ExecuteRequest {
                proposal_id: proposal.proposal_id.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(executed.status, ProposalStatus::Executed);

        let wallet = state.ledger.get_wallet(&wallet_id).unwrap().unwrap();
        assert_eq!(wallet.balance, "500.00".parse::<Decimal>().unwrap());

        // A second execute is a conflict, not a double credit.
        let err = execute_allocation(
            AdminOnly(admin("ops-1")),
            State(state.clone()),
            Json(ExecuteRequest {
                proposal_id: proposal.proposal_id,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn non_approver_cannot_approve() {
        let (state, _temp) = test_state();
        let wallet_id = seed_wallet(&state).await;
        let deposit_id = seed_deposit(&state).await;

        let (_, Json(proposal)) = propose_allocation(
            AdminOnly(admin("ops-1")),
            State(state.clone()),
            Json(ProposeRequest {
                deposit_id,
                target_wallet_id: wallet_id,
                amount: "500.00".parse().unwrap(),
                approvals_required: 1,
                approvers: vec!["ops-2".to_string()],
            }),
        )
        .await
        .unwrap();

        let err = approve_allocation(
            AdminOnly(admin("intruder")),
            State(state),
            Json(ApproveRequest {
                proposal_id: proposal.proposal_id,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_threshold_is_rejected() {
        let (state, _temp) = test_state();
        let wallet_id = seed_wallet(&state).await;
        let deposit_id = seed_deposit(&state).await;

        let err = propose_allocation(
            AdminOnly(admin("ops-1")),
            State(state),
            Json(ProposeRequest {
                deposit_id,
                target_wallet_id: wallet_id,
                amount: "500.00".parse().unwrap(),
                approvals_required: 3,
                approvers: vec!["ops-1".to_string(), "ops-2".to_string()],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (state, _temp) = test_state();
        seed_deposit(&state).await;

        let Json(pending) = list_unallocated(
            AdminOnly(admin("ops-1")),
            State(state.clone()),
            Query(UnallocatedQuery {
                broker_id: Some("acme".to_string()),
                status: Some(UnallocatedStatus::Pending),
            }),
        )
        .await
        .unwrap();
        assert_eq!(pending.len(), 1);

        let Json(allocated) = list_unallocated(
            AdminOnly(admin("ops-1")),
            State(state),
            Query(UnallocatedQuery {
                broker_id: None,
                status: Some(UnallocatedStatus::Allocated),
            }),
        )
        .await
        .unwrap();
        assert!(allocated.is_empty());
    }
}
