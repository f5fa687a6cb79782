//! Photomonths REST API
//!
//! HTTP surface over the query service, built with Axum.
//!
//! # Endpoints
//!
//! ## Months
//! - `GET /api/v1/months` - Months present in the library
//! - `GET /api/v1/months/:month_key/photos?offset=&limit=` - A page of asset ids
//! - `GET /api/v1/months/:month_key/count` - Exact counts
//!
//! ## Index
//! - `GET /api/v1/index/stats` - Bucket and listener counters
//! - `POST /api/v1/index/trim` - Evict least recently used buckets
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use photomonths::api::{serve, ApiConfig, AppState};
//! use photomonths::index::{IndexConfig, MonthIndex};
//! use photomonths::month::MonthZone;
//! use photomonths::service::{QueryService, ServiceConfig};
//! use photomonths::source::{IngestAdapter, SqliteLibrary};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let library = Arc::new(SqliteLibrary::open("library.db".as_ref())?);
//!     let adapter = IngestAdapter::new(library, MonthZone::Local);
//!     let index = MonthIndex::new(adapter, IndexConfig::default());
//!     let service = Arc::new(QueryService::new(index, ServiceConfig::default()));
//!
//!     let config = ApiConfig::default();
//!     serve(AppState::new(service, config.clone()), &config).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/months", get(routes::months::list_months))
        .route("/months/:month_key/photos", get(routes::months::month_photos))
        .route("/months/:month_key/count", get(routes::months::month_count))
        .route("/index/stats", get(routes::index::index_stats))
        .route("/index/trim", post(routes::index::trim_index));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Photomonths API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Photomonths API shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM; a handler that fails to install never fires
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
