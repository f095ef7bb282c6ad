//! Signing proxy
//!
//! Browsers cannot hold the shared secret safely and cannot call the
//! upstream cross-origin, so they POST the document here. The proxy counts
//! the call against the account ledger, signs it and forwards it once.
//! Retries are the caller's business.

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::fetcher::{HttpTransport, Transport};
use crate::ledger::RateLedger;

pub mod error;
pub mod handlers;

pub use error::ProxyError;

/// Shared state for the proxy routes
#[derive(Clone)]
pub struct ProxyState {
    /// Upstream transport
    pub transport: Arc<dyn Transport>,
    /// Per-account quota ledger
    pub ledger: Arc<RateLedger>,
    /// Signing clock
    pub clock: Arc<dyn Clock>,
}

impl ProxyState {
    /// State over a transport and ledger on the system clock
    pub fn new(transport: Arc<dyn Transport>, ledger: Arc<RateLedger>) -> Self {
        Self {
            transport,
            ledger,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a specific clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for ProxyState {
    fn default() -> Self {
        Self::new(Arc::new(HttpTransport::default()), Arc::new(RateLedger::new()))
    }
}

/// Build the proxy router
pub fn router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route(
            "/api/conversion-report",
            post(handlers::conversion_report)
                .options(handlers::options)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/rate-status",
            get(handlers::rate_status).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/request-history",
            get(handlers::request_history).fallback(handlers::method_not_allowed),
        )
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the proxy on `addr` until `shutdown` resolves
///
/// # Errors
/// Fails when the listener cannot be bound
pub async fn serve<F>(addr: SocketAddr, state: ProxyState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Proxy listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolve on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}
