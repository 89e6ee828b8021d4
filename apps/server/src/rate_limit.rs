use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Route groups with their own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Read-only lookups (availability, finance summary).
    Public,
    /// Appointment creation.
    Booking,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests allowed within the sliding window.
    pub max_requests: u32,
    pub window: Duration,
}

impl Tier {
    fn default_config(self) -> RateLimitConfig {
        match self {
            Tier::Public => RateLimitConfig {
                max_requests: 60,
                window: Duration::from_secs(60),
            },
            Tier::Booking => RateLimitConfig {
                max_requests: 5,
                window: Duration::from_secs(300),
            },
        }
    }
}

/// In-memory sliding-window limiter keyed by (tier, client IP).
#[derive(Debug, Clone)]
pub struct RateLimiter {
    configs: Arc<DashMap<Tier, RateLimitConfig>>,
    hits: Arc<DashMap<(Tier, IpAddr), Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            configs: Arc::new(DashMap::new()),
            hits: Arc::new(DashMap::new()),
        }
    }

    fn config(&self, tier: Tier) -> RateLimitConfig {
        self.configs
            .get(&tier)
            .map(|c| *c)
            .unwrap_or_else(|| tier.default_config())
    }

    /// `Err(retry_after_secs)` when `ip` exhausted the tier's window.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let config = self.config(tier);
        let now = Instant::now();

        let mut entry = self.hits.entry((tier, ip)).or_default();
        entry.retain(|t| now.duration_since(*t) < config.window);

        if entry.len() >= config.max_requests as usize {
            let oldest = entry[0];
            let retry_after = (oldest + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }

    /// Drop entries idle for more than twice their tier's window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(tier, _), timestamps| {
            let cutoff = self.config(*tier).window * 2;
            timestamps.retain(|t| now.duration_since(*t) < cutoff);
            !timestamps.is_empty()
        });
    }
}

/// Client IP from X-Forwarded-For (reverse proxy) or the socket address.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first_ip) = forwarded.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Demasiadas solicitudes. Intentá de nuevo en {} segundos",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

async fn limit(limiter: &RateLimiter, tier: Tier, req: Request, next: Next) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check(tier, ip).map_err(|retry_after| {
        tracing::warn!("Rate limit hit on {:?} tier by {}", tier, ip);
        too_many_requests(retry_after)
    })?;
    Ok(next.run(req).await)
}

pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(&limiter, Tier::Public, req, next).await
}

pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(&limiter, Tier::Booking, req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn limiter(tier: Tier, max_requests: u32, window: Duration) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.configs.insert(
            tier,
            RateLimitConfig {
                max_requests,
                window,
            },
        );
        limiter
    }

    #[test]
    fn test_booking_default_budget() {
        let limiter = RateLimiter::new();
        let ip = test_ip(1);
        for _ in 0..5 {
            assert!(limiter.check(Tier::Booking, ip).is_ok());
        }
        assert!(limiter.check(Tier::Booking, ip).is_err());
    }

    #[test]
    fn test_returns_retry_after() {
        let limiter = limiter(Tier::Public, 1, Duration::from_secs(60));
        let ip = test_ip(1);
        limiter.check(Tier::Public, ip).unwrap();
        let retry_after = limiter.check(Tier::Public, ip).unwrap_err();
        assert!((1..=60).contains(&retry_after));
    }

    #[test]
    fn test_ips_and_tiers_independent() {
        let limiter = limiter(Tier::Booking, 1, Duration::from_secs(60));
        let ip = test_ip(1);
        assert!(limiter.check(Tier::Booking, ip).is_ok());
        assert!(limiter.check(Tier::Booking, ip).is_err());
        assert!(limiter.check(Tier::Booking, test_ip(2)).is_ok());
        assert!(limiter.check(Tier::Public, ip).is_ok());
    }

    #[test]
    fn test_window_expiry_allows_again() {
        let limiter = limiter(Tier::Public, 1, Duration::from_millis(100));
        let ip = test_ip(1);
        assert!(limiter.check(Tier::Public, ip).is_ok());
        assert!(limiter.check(Tier::Public, ip).is_err());

        sleep(Duration::from_millis(150));

        assert!(limiter.check(Tier::Public, ip).is_ok());
    }

    #[test]
    fn test_cleanup_removes_stale_entries() {
        let limiter = limiter(Tier::Public, 10, Duration::from_millis(50));
        limiter.check(Tier::Public, test_ip(1)).unwrap();

        sleep(Duration::from_millis(120));
        limiter.cleanup();

        assert!(limiter.hits.is_empty());
    }

    #[test]
    fn test_cleanup_preserves_active_entries() {
        let limiter = limiter(Tier::Public, 2, Duration::from_secs(60));
        let ip = test_ip(1);
        limiter.check(Tier::Public, ip).unwrap();

        limiter.cleanup();

        limiter.check(Tier::Public, ip).unwrap();
        assert!(limiter.check(Tier::Public, ip).is_err());
    }
}
