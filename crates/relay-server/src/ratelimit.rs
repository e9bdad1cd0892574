//! Fixed-window rate limiting for credential endpoints.

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

struct Entry {
    count: u32,
    window_ends: Instant,
}

/// Per-IP fixed-window counter. Entries reset when their window lapses.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<IpAddr, Entry>>,
}

impl RateLimiter {
    /// Create a limiter from config.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limit: config.limit,
            window: Duration::from_secs(config.window_secs),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `ip` may make another request in the current window.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = entries.entry(ip).or_insert(Entry {
            count: 0,
            window_ends: now + self.window,
        });

        if now >= entry.window_ends {
            entry.count = 0;
            entry.window_ends = now + self.window;
        }

        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

/// Axum middleware enforcing the limiter on its route group.
pub async fn limit(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = forwarded_ip(request.headers()).unwrap_or_else(|| peer.ip());

    if !limiter.allow(ip) {
        warn!(%ip, "rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }

    next.run(request).await
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn test_limit_enforced_per_ip() {
        let limiter = RateLimiter::new(RateLimitConfig {
            limit: 3,
            window_secs: 60,
        });

        for _ in 0..3 {
            assert!(limiter.allow(ip(1)));
        }
        assert!(!limiter.allow(ip(1)));
        // A different client is unaffected.
        assert!(limiter.allow(ip(2)));
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(RateLimitConfig {
            limit: 1,
            window_secs: 0,
        });

        assert!(limiter.allow(ip(1)));
        // Zero-length window lapses immediately.
        assert!(limiter.allow(ip(1)));
    }

    #[test]
    fn test_forwarded_ip_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.9, 172.16.0.1".parse().unwrap());
        assert_eq!(forwarded_ip(&headers), Some(ip_from("10.0.0.9")));

        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(forwarded_ip(&headers), None);
    }

    fn ip_from(s: &str) -> IpAddr {
        s.parse().unwrap()
    }
}
