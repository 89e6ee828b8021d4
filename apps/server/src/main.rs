mod alert_layer;
mod booking;
mod config;
mod customers;
mod db;
mod deposit;
mod error;
mod finance;
mod handlers;
mod models;
mod notify;
mod payments;
mod rate_limit;
mod reconcile;
mod scheduling;
mod signing;
mod time;

#[cfg(test)]
mod test_support;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use config::Config;
use notify::Dispatcher;
use payments::{MercadoPago, PaymentProvider};
use rate_limit::{rate_limit_booking, rate_limit_public, RateLimiter};
use time::BusinessClock;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub clock: BusinessClock,
    pub payments: Arc<dyn PaymentProvider>,
    pub notifier: Dispatcher,
    pub started_at: Instant,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Config (read before tracing so AlertLayer can use it) ──
    let config = Config::from_env()?;

    // ── Tracing: console + optional ops alerts ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(config.ops_alert_webhook_url.clone().map(alert_layer::AlertLayer::new))
        .init();

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set, online deposits will be rejected");
    }
    if config.mp_platform_access_token.is_none() {
        tracing::warn!("MP_PLATFORM_ACCESS_TOKEN not set, subscription webhooks will be skipped");
    }

    // ── Database ──
    let pool = db::connect(&config.database_url, 5).await?;
    db::run_migrations(&pool).await?;

    // ── Providers ──
    let http = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .build()?;
    let payments = Arc::new(MercadoPago::new(config.mp_api_base.clone(), config.provider_timeout)?);
    let notifier = Dispatcher::from_config(&config, http);

    let cors = cors_layer(config.webapp_url.as_deref())?;
    let addr = config.bind_addr();
    tracing::info!("Business timezone: {}", config.business_tz.name());

    let state = Arc::new(AppState {
        db: pool,
        clock: BusinessClock::new(config.business_tz),
        config,
        payments,
        notifier,
        started_at: Instant::now(),
    });

    // ── Rate limiter + background cleanup ──
    let rate_limiter = RateLimiter::new();
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    let app = router(state, rate_limiter).layer(cors);

    tracing::info!("Turnera server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Whitelist WEBAPP_URL when configured, otherwise allow any origin.
fn cors_layer(webapp_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let cors = match webapp_url {
        Some(url) => {
            let origins: Vec<HeaderValue> = vec![
                url.parse()?,
                HeaderValue::from_static("http://localhost:5173"), // Vite dev server
            ];
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        None => CorsLayer::new().allow_origin(Any),
    };
    Ok(cors.allow_methods(Any).allow_headers(Any))
}

fn router(state: Arc<AppState>, rate_limiter: RateLimiter) -> Router {
    // No limit: health checks + provider webhooks
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/webhooks/mercadopago",
            get(handlers::webhook::mercadopago).post(handlers::webhook::mercadopago),
        );

    // Public reads (60 req/min)
    let public_routes = Router::new()
        .route("/api/disponibilidad", get(handlers::booking::availability))
        .route(
            "/api/negocios/{tenant_id}/finanzas",
            get(handlers::finance::summary),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_public));

    // Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/turnos", post(handlers::booking::create_booking))
        .layer(from_fn_with_state(rate_limiter, rate_limit_booking));

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
