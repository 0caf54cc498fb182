use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const RATE_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const SESSION_TOKEN_LIMIT: u32 = 10;
pub const API_LIMIT: u32 = 100;

const SESSION_TOKEN_PATH: &str = "/api/session-token";
const SESSION_TOKEN_MESSAGE: &str = "Too many session requests, please try again later.";
const API_MESSAGE: &str = "Too many requests, please try again later.";

/// Counts requests per client in fixed windows.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    hits: Mutex<HashMap<String, (Instant, u32)>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records a hit for `key`; `false` once the key is over its limit for the window.
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        hits.retain(|_, (started, _)| now.duration_since(*started) < self.window);

        let entry = hits.entry(key.to_string()).or_insert((now, 0));
        entry.1 += 1;
        entry.1 <= self.limit
    }
}

#[derive(Debug)]
pub struct RateLimits {
    session_token: FixedWindowLimiter,
    api: FixedWindowLimiter,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::new(SESSION_TOKEN_LIMIT, API_LIMIT, RATE_WINDOW)
    }
}

impl RateLimits {
    pub fn new(session_token_limit: u32, api_limit: u32, window: Duration) -> Self {
        Self {
            session_token: FixedWindowLimiter::new(session_token_limit, window),
            api: FixedWindowLimiter::new(api_limit, window),
        }
    }

    async fn admit(&self, path: &str, client: &str) -> Result<(), ApiError> {
        let (limiter, message) = if path == SESSION_TOKEN_PATH {
            (&self.session_token, SESSION_TOKEN_MESSAGE)
        } else {
            (&self.api, API_MESSAGE)
        };
        if limiter.check(client).await {
            Ok(())
        } else {
            tracing::warn!(client = %client, path = %path, "rate limit exceeded");
            Err(ApiError::RateLimited { message })
        }
    }
}

/// First `x-forwarded-for` hop, then the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);

    match state.limits.admit(request.uri().path(), &client).await {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_it_elapses() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("a").await);
        assert!(limiter.check("a").await);
        assert!(!limiter.check("a").await);
        assert!(limiter.check("b").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("a").await);
    }

    #[tokio::test]
    async fn session_token_route_has_its_own_budget() {
        let limits = RateLimits::new(1, 5, RATE_WINDOW);
        assert!(limits.admit(SESSION_TOKEN_PATH, "c").await.is_ok());
        assert!(limits.admit(SESSION_TOKEN_PATH, "c").await.is_err());
        assert!(limits.admit("/api/chat-stream", "c").await.is_ok());
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        let peer = Some(SocketAddr::from(([10, 0, 0, 1], 4000)));
        assert_eq!(client_key(&headers, peer), "10.0.0.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_key(&headers, peer), "203.0.113.9");
        assert_eq!(client_key(&HeaderMap::new(), None), "unknown");
    }
}
