//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all relay routes
//! - Wire up middleware (request ID, tracing, timeout, body limit, rate limit)
//! - Record per-route request metrics
//! - Serve until the shutdown coordinator fires

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::blockchain::reader::ChainReader;
use crate::config::schema::{ListenerConfig, RateLimitConfig};
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::observability::metrics;
use crate::relay::RelayOrchestrator;
use crate::security::rate_limit::{rate_limit_middleware, RateLimiterState};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayOrchestrator>,
    pub chain: Arc<dyn ChainReader>,
}

/// HTTP front of the relay.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(listener: &ListenerConfig, rate_limit: &RateLimitConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(listener, rate_limit, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(listener: &ListenerConfig, rate_limit: &RateLimitConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/api/content/{content_id}/x402", get(handlers::get_content_x402))
            .route("/api/content/{content_id}/verify", get(handlers::verify_access))
            .route("/api/content/{content_id}/deliver", get(handlers::deliver_content))
            .route("/api/relayer/attestation", post(handlers::post_attestation))
            .route("/api/relayer/attestation/{tx_hash}", get(handlers::get_attestation))
            .route("/health", get(handlers::health))
            .route_layer(middleware::from_fn(track_metrics))
            .with_state(state);

        if rate_limit.enabled {
            let limiter = Arc::new(RateLimiterState::new(rate_limit));
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(listener.request_timeout_secs)))
                .layer(DefaultBodyLimit::max(listener.max_body_bytes)),
        )
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_request(&method, &route, response.status().as_u16(), start);
    response
}
