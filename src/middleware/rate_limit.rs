//! Rate limiting middleware.
//!
//! In-memory sliding-window rate limiting per client IP. Each key holds the
//! instants of its recent requests; prune, check, and append run under a
//! single lock so simultaneous arrivals cannot miscount.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: usize,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window limiter shared across all requests.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, VecDeque<Instant>>>>,
}

pub enum RateLimitResult {
    Allowed { remaining: usize },
    Throttled { retry_after: Duration },
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Prune the key's window to the trailing `window`, then either record
    /// `now` and allow, or throttle without recording anything.
    pub fn check_and_record(&self, key: IpAddr, now: Instant) -> RateLimitResult {
        let mut state = self.state.lock();
        let window = self.config.window;

        let timestamps = state.entry(key).or_default();
        while timestamps
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.config.max_requests {
            // The oldest retained instant decides when a slot frees up
            let retry_after = timestamps
                .front()
                .map(|&t| window.saturating_sub(now.duration_since(t)))
                .unwrap_or(window);
            return RateLimitResult::Throttled { retry_after };
        }

        timestamps.push_back(now);
        RateLimitResult::Allowed {
            remaining: self.config.max_requests - timestamps.len(),
        }
    }

    /// Evict keys whose windows have fully drained (call from a background
    /// task), bounding memory over the process lifetime.
    pub fn sweep_idle(&self, now: Instant) {
        let mut state = self.state.lock();
        let window = self.config.window;

        state.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|&t| now.duration_since(t) < window)
        });
    }

    /// Number of client keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().len()
    }
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match limiter.check_and_record(addr.ip(), Instant::now()) {
        RateLimitResult::Allowed { .. } => next.run(request).await,
        RateLimitResult::Throttled { retry_after } => {
            warn!(
                ip = %addr.ip(),
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );

            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": "Too many requests. Please slow down.",
                "retry_after_seconds": retry_after.as_secs(),
            });

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}
