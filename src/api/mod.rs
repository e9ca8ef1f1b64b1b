// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    convert::{ConversionQuote, ConversionReceipt},
    ledger::{
        EntryKind, LedgerEntry, ReferenceStatus, ReferenceType, UniqueReference, Wallet,
        WalletStatus, WalletType,
    },
    reconcile::{
        matcher::{DepositOutcome, RecordReport},
        AllocationProposal, BankDepositRecord, DepositDisposition, ProposalStatus,
        ScrapeApplyReport, UnallocatedDeposit, UnallocatedStatus,
    },
    state::AppState,
};

pub mod admin;
pub mod convert;
pub mod deposits;
pub mod health;
pub mod references;
pub mod reports;
pub mod wallets;

pub fn router(state: AppState) -> Router {
    let wallet_routes = Router::new()
        .route("/infrastructure", post(wallets::provision_infrastructure))
        .route("/user/{user_id}", get(wallets::list_user_wallets))
        .route("/wallet/{wallet_id}", get(wallets::get_wallet))
        .route("/wallet/{wallet_id}/entries", get(wallets::list_entries))
        .route("/reference/generate", post(references::generate_reference))
        .route(
            "/reference/persistent/{currency}",
            get(references::persistent_reference),
        )
        .route("/reference/{reference}", get(references::lookup_reference))
        .route("/convert/quote", get(convert::get_quote))
        .route("/convert/confirm", post(convert::confirm_conversion))
        .route("/deposit/fiat", post(deposits::deposit_fiat))
        .route("/deposits/apply", post(deposits::apply_deposits))
        .route(
            "/fiat-admin/unallocated",
            get(admin::list_unallocated).post(admin::record_unallocated),
        )
        .route(
            "/fiat-admin/allocation/propose",
            post(admin::propose_allocation),
        )
        .route(
            "/fiat-admin/allocation/approve",
            post(admin::approve_allocation),
        )
        .route(
            "/fiat-admin/allocation/reject",
            post(admin::reject_allocation),
        )
        .route(
            "/fiat-admin/allocation/execute",
            post(admin::execute_allocation),
        )
        .route("/statements", get(reports::statements))
        .route("/tax-report", get(reports::tax_report));

    Router::new()
        .route("/health", get(health::health))
        .nest("/wallet", wallet_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        wallets::provision_infrastructure,
        wallets::list_user_wallets,
        wallets::get_wallet,
        wallets::list_entries,
        references::generate_reference,
        references::persistent_reference,
        references::lookup_reference,
        convert::get_quote,
        convert::confirm_conversion,
        deposits::deposit_fiat,
        deposits::apply_deposits,
        admin::record_unallocated,
        admin::list_unallocated,
        admin::propose_allocation,
        admin::approve_allocation,
        admin::reject_allocation,
        admin::execute_allocation,
        reports::statements,
        reports::tax_report
    ),
    components(
        schemas(
            health::HealthResponse,
            Wallet,
            WalletType,
            WalletStatus,
            LedgerEntry,
            EntryKind,
            UniqueReference,
            ReferenceType,
            ReferenceStatus,
            ConversionQuote,
            ConversionReceipt,
            UnallocatedDeposit,
            UnallocatedStatus,
            AllocationProposal,
            ProposalStatus,
            BankDepositRecord,
            DepositOutcome,
            DepositDisposition,
            ScrapeApplyReport,
            RecordReport,
            wallets::ProvisionRequest,
            wallets::EntriesPage,
            references::GenerateReferenceRequest,
            convert::ConfirmRequest,
            deposits::FiatDepositRequest,
            deposits::ApplyDepositsRequest,
            admin::RecordUnallocatedRequest,
            admin::ProposeRequest,
            admin::ApproveRequest,
            admin::RejectRequest,
            admin::ExecuteRequest
        )
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Wallets", description = "Wallet provisioning and lookups"),
        (name = "References", description = "Unique payment references"),
        (name = "Convert", description = "Quote-then-confirm currency conversion"),
        (name = "Deposits", description = "Fiat deposit crediting and batch reconciliation"),
        (name = "FiatAdmin", description = "Unallocated deposits and multi-signature allocation"),
        (name = "Reports", description = "CSV statements and tax reports")
    )
)]
struct ApiDoc;
