// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use device_auth_server::{
    api::router,
    config::{ServerConfig, DEFAULT_LOG_FILTER},
    crypto::P256CryptoProvider,
    engine::AuthService,
    state::AppState,
    storage::Store,
};

#[tokio::main]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(config.json_logs);
    tracing::info!(config = ?config, "Configuration loaded");

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        tracing::error!(error = %e, path = %config.data_dir.display(), "Cannot create data directory");
        std::process::exit(1);
    }
    let store = match Store::open(&config.database_path(), config.store_lock_timeout) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, path = %config.database_path().display(), "Cannot open store");
            std::process::exit(1);
        }
    };

    let service = AuthService::new(
        Arc::new(store),
        Arc::new(P256CryptoProvider::new()),
        config.engine.clone(),
    );
    match service.applications().ensure_application(&config.application) {
        Ok(application) => tracing::info!(
            application_id = application.application_id,
            name = %application.name,
            versions = application.versions.len(),
            "Application ready"
        ),
        Err(e) => {
            tracing::error!(error = %e, name = %config.application.name, "Cannot provision application");
            std::process::exit(1);
        }
    }
    let app = router(AppState::new(service));
    let addr = config.bind_addr;

    let served = match &config.tls {
        Some(tls) => {
            // Install the ring crypto provider for rustls before any TLS operation.
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls_config = match RustlsConfig::from_pem_file(&tls.cert, &tls.key).await {
                Ok(tls_config) => tls_config,
                Err(e) => {
                    tracing::error!(error = %e, "Cannot load TLS certificate or key");
                    std::process::exit(1);
                }
            };
            tracing::info!(%addr, "Device auth server listening on https (docs at /docs)");
            tokio::select! {
                result = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()) => result,
                () = shutdown_signal() => Ok(()),
            }
        }
        None => {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(error = %e, %addr, "Cannot bind address");
                    std::process::exit(1);
                }
            };
            tracing::warn!(%addr, "TLS not configured, listening on plain http (docs at /docs)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        }
    };

    if let Err(e) = served {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
    tracing::info!("Server stopped");
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
