//! Photomonths API Server
//!
//! Opens the SQLite library, builds the month index and serves it over HTTP.
//! A change listener keeps the index current and a periodic trim keeps the
//! number of resident months within budget.
//!
//! Run with: cargo run --bin photomonths -- --config ./config.toml

use anyhow::Context;
use clap::Parser;
use photomonths::api::{serve, AppState};
use photomonths::config::{Config, LoggingConfig};
use photomonths::index::MonthIndex;
use photomonths::listener::InvalidationListener;
use photomonths::service::QueryService;
use photomonths::source::{IngestAdapter, SqliteLibrary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "photomonths")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Month-bucketed photo index server")]
struct Args {
    /// Config file (default: searched in the usual locations)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    config.validate()?;

    init_tracing(&config.logging);

    tracing::info!("Starting Photomonths v{}", env!("CARGO_PKG_VERSION"));

    let zone = config.library.month_zone()?;
    let library_path = config.library.path();
    let library = Arc::new(
        SqliteLibrary::open(&library_path)
            .with_context(|| format!("opening library {}", library_path.display()))?,
    );
    tracing::info!(path = %library_path.display(), zone = %zone, "Library opened");

    let adapter =
        IngestAdapter::new(library.clone(), zone).with_batch_size(config.index.ingest_batch_size);
    let index = MonthIndex::new(adapter, config.index_config());
    let service = Arc::new(QueryService::new(index.clone(), config.service_config()));

    let server_config = config.server_config();
    let mut state = AppState::new(Arc::clone(&service), server_config.clone());

    let listener = if config.listener.enabled {
        let listener = Arc::new(InvalidationListener::new(
            index,
            library,
            config.listener_config(),
        ));
        let handle = Arc::clone(&listener).start();
        state = state.with_listener(Arc::clone(&listener));
        Some((listener, handle))
    } else {
        tracing::info!("Change listener disabled; the index will not see library changes");
        None
    };

    let trim_handle = (config.index.trim_interval_secs > 0).then(|| {
        start_periodic_trim(
            Arc::clone(&service),
            Duration::from_secs(config.index.trim_interval_secs),
        )
    });

    serve(state, &server_config).await?;

    if let Some(handle) = trim_handle {
        handle.abort();
    }
    if let Some((listener, handle)) = listener {
        listener.shutdown();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Listener task ended abnormally");
        }
    }

    tracing::info!("Photomonths stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("photomonths={},tower_http=info", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Evict least recently used months on a fixed interval
fn start_periodic_trim(
    service: Arc<QueryService>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            interval.tick().await;
            let evicted = service.relieve_memory_pressure().await;
            if evicted > 0 {
                tracing::debug!(evicted, "Periodic trim evicted months");
            }
        }
    })
}
