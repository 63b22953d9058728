//! Per-client token-bucket rate limiting.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::schema::RateLimitConfig;
use crate::http::request::RequestId;
use crate::http::response::ApiError;
use crate::observability::metrics;

/// Buckets idle this long are dropped on the next sweep.
const IDLE_EVICTION: Duration = Duration::from_secs(300);

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiterState {
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    rps: f64,
    burst: f64,
    last_sweep: Mutex<Instant>,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: f64::from(config.requests_per_second),
            burst: f64::from(config.burst_size.max(1)),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn check(&self, client: IpAddr) -> bool {
        let now = Instant::now();
        self.sweep(now);
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.rps, now)
    }

    fn sweep(&self, now: Instant) {
        let mut last = self.last_sweep.lock().unwrap_or_else(|p| p.into_inner());
        if now.saturating_duration_since(*last) < IDLE_EVICTION {
            return;
        }
        *last = now;
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        buckets.retain(|_, b| now.saturating_duration_since(b.last_update) < IDLE_EVICTION);
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.check(addr.ip()) {
        return next.run(request).await;
    }
    tracing::warn!(client = %addr.ip(), path = %request.uri().path(), "Rate limit exceeded");
    metrics::record_rate_limited();
    let request_id = RequestId::from_headers(request.headers());
    ApiError::rate_limited()
        .with_request_id(request_id.as_deref())
        .into_response()
}
