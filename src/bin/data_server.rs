//! Data service entry point (web host)
//!
//! Owns the database. Exits non-zero if the schema cannot be initialized.
//! LDPC jobs reach the lab host through the HTTP-backed runner when
//! `HARDWARE_API_URL` is configured.

use std::sync::Arc;

use dacroq::config::ServiceConfig;
use dacroq::jobs::ldpc::RemoteSnrRunner;
use dacroq::jobs::SnrTestRunner;
use dacroq::metrics;
use dacroq::server::data_api::{self, DataState};
use dacroq::server::{cors_layer, track_request_time};
use dacroq::storage::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dacroq=debug,tower_http=info".into()),
        )
        .init();

    let config = Arc::new(ServiceConfig::from_env(8000));
    tracing::info!("Dacroq data service starting on port {}", config.port);

    let db = Database::new(&config.db_path);
    db.init_schema()
        .map_err(|e| anyhow::anyhow!("database unavailable at {}: {e}", config.db_path))?;

    let snr_runner: Option<Arc<dyn SnrTestRunner>> = match config.hardware_api_url.clone() {
        Some(url) => {
            tracing::info!("LDPC jobs will use hardware service at {}", url);
            // The blocking HTTP client must be built off the async runtime
            let runner = tokio::task::spawn_blocking(move || RemoteSnrRunner::new(url))
                .await?
                .map_err(|e| anyhow::anyhow!("failed to build hardware client: {e}"))?;
            Some(Arc::new(runner))
        }
        None => {
            tracing::warn!("HARDWARE_API_URL not set; LDPC job creation is disabled");
            None
        }
    };

    tokio::spawn(metrics::sampling_task(db.clone()));

    let state = DataState::new(db, config.clone(), snr_runner);
    let app = data_api::router(state)
        .layer(axum::middleware::from_fn(track_request_time))
        .layer(cors_layer(config.allowed_origins.clone()))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Data service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Data service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install SIGINT handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
