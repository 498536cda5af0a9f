use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{Handle, tls_rustls::RustlsConfig};
use color_eyre::eyre::{Result, eyre};
use tower::ServiceBuilder;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::timeout::TimeoutLayer;

use reddit_dump_ingest::{config::AppConfig, handlers, preflight, state::AppState};

/// Main entry point for the dump ingestion server.
///
/// # Errors
///
/// Returns an error if:
/// - Environment variables cannot be loaded
/// - Database connection or migrations fail
/// - TLS certificates cannot be loaded
/// - Server fails to start
#[tokio::main]
pub async fn main() -> Result<()> {
    // tracing first so preflight has somewhere to report
    preflight::setup_tracing();
    preflight::init_error_formatter()?;
    preflight::init_crypto_provider();
    tracing::info!("Starting the Reddit dump ingestion service. Proceeding to configuration...");

    // set up app configs
    let config = AppConfig::new_from_env()?;
    preflight::checks(&config);
    tracing::info!("Preflight checks done. Proceeding to launching a database connection pool...");

    // connect the database
    let db = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await?;

    // registry bookkeeping only; tenant namespaces are created per import
    tracing::info!("Connection pool launched. Running registry migrations as necessary...");
    sqlx::migrate!().run(&db).await?;

    // set up rate-limiting governor
    tracing::info!("Configuring the connection rate-limiter...");
    let governor = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_rps.max(1))
        .burst_size(u32::try_from(config.rate_limit_rps.saturating_mul(2)).unwrap_or(u32::MAX))
        .finish()
        .ok_or_else(|| eyre!("Failed to build governor config"))?;

    tracing::info!("Rate-limiting configured. Configuring router...");
    let state = AppState::new(db, &config);
    let app = handlers::routes(state.clone()).layer(
        ServiceBuilder::new()
            .layer(GovernorLayer::new(Arc::new(governor)))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_secs,
            ))),
    );

    // set up certificates
    tracing::info!("Reading certificates for TLS.");
    let tls = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path).await?;

    // stop accepting work on ctrl-c; running imports stop before their next batch
    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested. Cancelling in-flight imports...");
            shutdown.cancel();
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(30)));
        }
    });

    tracing::info!(
        "All setup is complete. Listening on 0.0.0.0:{} for uploads.",
        config.server_port
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}
