//! Hardware service entry point (lab host)
//!
//! Owns the USB devices and GPIO lines. Construction happens here: the
//! device manager, session pool, and firmware driver are built once and
//! injected into the HTTP handlers.

use std::sync::Arc;

use dacroq::config::{DeviceCatalog, ServiceConfig};
use dacroq::hardware::manager::DeviceManager;
use dacroq::server::hardware_api::{self, HardwareState};
use dacroq::server::{cors_layer, track_request_time};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dacroq=debug,tower_http=info".into()),
        )
        .init();

    let config = ServiceConfig::from_env(8001);
    tracing::info!("Dacroq hardware service starting on port {}", config.port);

    let manager = Arc::new(DeviceManager::new(DeviceCatalog::default()));

    // Initial discovery so the first session acquisition finds its port
    {
        let manager = manager.clone();
        tokio::task::spawn_blocking(move || manager.discover_all()).await?;
    }

    let state = HardwareState::new(manager.clone());
    let pool = state.pool.clone();

    let app = hardware_api::router(state)
        .layer(axum::middleware::from_fn(track_request_time))
        .layer(cors_layer(config.allowed_origins.clone()))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Hardware service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down: closing sessions and releasing GPIO");
    tokio::task::spawn_blocking(move || {
        pool.close_all();
        manager.gpio().close();
    })
    .await?;

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
