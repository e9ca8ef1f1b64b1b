// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pool_ledger::api::router;
use pool_ledger::audit::AuditSink;
use pool_ledger::config;
use pool_ledger::convert::{ConversionEngine, QuoteStore, StaticRateTable};
use pool_ledger::idempotency::IdempotencyCache;
use pool_ledger::ledger::LedgerDb;
use pool_ledger::reconcile::bank::DisabledBankClient;
use pool_ledger::reconcile::{BankClient, HttpBankClient};
use pool_ledger::state::{AppState, AuthConfig};

#[tokio::main]
async fn main() {
    init_tracing();

    let data_dir = PathBuf::from(
        std::env::var(config::DATA_DIR_ENV)
            .unwrap_or_else(|_| config::DEFAULT_DATA_DIR.to_string()),
    );
    std::fs::create_dir_all(&data_dir).expect("failed to create data directory");

    let ledger =
        LedgerDb::open(&data_dir.join("ledger.redb")).expect("failed to open ledger database");
    let audit = AuditSink::new(data_dir.join("audit")).expect("failed to open audit sink");

    let bank: Arc<dyn BankClient> = match HttpBankClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(error) => {
            warn!(%error, "bank integration disabled");
            Arc::new(DisabledBankClient)
        }
    };

    let fee_bps = config::env_or(config::CONVERT_FEE_BPS_ENV, config::DEFAULT_CONVERT_FEE_BPS);
    let quote_ttl = Duration::from_secs(config::env_or(
        config::QUOTE_TTL_SECS_ENV,
        config::DEFAULT_QUOTE_TTL_SECS,
    ));
    let conversion = ConversionEngine::new(
        QuoteStore::new(1024, quote_ttl),
        Arc::new(default_rate_table()),
        fee_bps,
    );

    let idempotency_ttl = Duration::from_secs(config::env_or(
        config::IDEMPOTENCY_TTL_SECS_ENV,
        config::DEFAULT_IDEMPOTENCY_TTL_SECS,
    ));
    let idempotency = IdempotencyCache::new(4096, idempotency_ttl);

    let auth_config = AuthConfig {
        secret: std::env::var(config::JWT_SECRET_ENV).ok(),
        issuer: std::env::var(config::JWT_ISSUER_ENV).ok(),
    };
    if auth_config.secret.is_none() {
        warn!("JWT_SECRET is not set; running in development mode without signature verification");
    }

    let state = AppState::new(ledger, conversion, idempotency, bank, audit, auth_config);
    let app = router(state);

    let host = std::env::var(config::HOST_ENV).unwrap_or_else(|_| config::DEFAULT_HOST.to_string());
    let port: u16 = config::env_or(config::PORT_ENV, config::DEFAULT_PORT);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("failed to parse bind address");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listener");
    info!(%addr, "pool ledger listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Rates used until a live rate source is wired in.
fn default_rate_table() -> StaticRateTable {
    StaticRateTable::new()
        .with_pair("BTC", "ZAR", "1850000".parse().unwrap())
        .with_pair("ETH", "ZAR", "62000".parse().unwrap())
        .with_pair("BTC", "USD", "98000".parse().unwrap())
        .with_pair("ETH", "USD", "3300".parse().unwrap())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received sigterm, shutting down"),
    }
}
