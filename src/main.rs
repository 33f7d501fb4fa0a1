// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use navrelay::api::router;
use navrelay::config::{self, Settings};
use navrelay::keys::EncryptionKeys;
use navrelay::ledger::LedgerKind;
use navrelay::relay::{connect_ledger, CycleRunner, Relay};
use navrelay::state::AppState;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    let json = env::var(config::LOG_FORMAT_ENV).is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    // Must happen before any TLS operation, client or server.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    init_tracing();

    let settings = Settings::from_env().expect("Failed to load settings");
    let primary =
        connect_ledger(LedgerKind::Primary, &settings.primary).expect("Invalid primary ledger");
    let secondary = connect_ledger(LedgerKind::Secondary, &settings.secondary)
        .expect("Invalid secondary ledger");

    let keys = EncryptionKeys::new(
        settings.keys.paths(),
        settings.keys.encryption_bits,
        settings.keys.key_period_days,
    );
    keys.initialize().expect("Failed to initialize key store");

    let tls = settings
        .tls_cert_path
        .clone()
        .zip(settings.tls_key_path.clone());
    let relay = Arc::new(
        Relay::new(settings, primary, secondary, keys).expect("Failed to build peer client"),
    );
    info!(role = %relay.role(), "navrelay starting");

    let shutdown = CancellationToken::new();
    let cycles = tokio::spawn(CycleRunner::new(relay.clone()).run(shutdown.clone()));

    let host = env::var(config::HOST_ENV).unwrap_or_else(|_| config::DEFAULT_HOST.to_string());
    let port: u16 = env::var(config::PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(config::DEFAULT_PORT);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("Failed to parse bind address");

    let app = router(AppState::new(relay));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            shutdown.cancel();
        }
    });

    match tls {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .expect("Failed to load TLS certificate");
            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                let shutdown = shutdown.clone();
                async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(None);
                }
            });
            info!(%addr, "listening on https (docs at /docs)");
            if let Err(e) = axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
            {
                error!(error = %e, "https server failed");
            }
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .expect("Failed to bind listener");
            info!(%addr, "listening on http (docs at /docs)");
            let token = shutdown.clone();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                error!(error = %e, "http server failed");
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = cycles.await {
        error!(error = %e, "cycle runner task failed");
    }
    info!("navrelay stopped");
}
