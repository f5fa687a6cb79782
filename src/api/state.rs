//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::listener::InvalidationListener;
use crate::service::QueryService;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Month queries over the index
    pub service: Arc<QueryService>,
    /// Change listener keeping the index fresh, when one is running
    pub listener: Option<Arc<InvalidationListener>>,
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<QueryService>, config: ApiConfig) -> Self {
        Self {
            service,
            listener: None,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Attach the listener so health and stats can report on it
    pub fn with_listener(mut self, listener: Arc<InvalidationListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Page size used when a request omits `limit`
    pub default_page_size: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8086,
            default_page_size: 60,
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
