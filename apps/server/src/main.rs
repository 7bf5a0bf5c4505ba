mod appointments;
mod availability;
mod catalog;
mod clock;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod payment;
mod reaper;
mod reservation;
mod schedule;
mod slot_lock;
mod telegram_layer;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use availability::AvailabilityEngine;
use clock::{Clock, SystemClock};
use config::Config;
use payment::{ConfirmationProcessor, MercadoPagoGateway, Notifier, TelegramNotifier, TracingNotifier};
use reaper::{Reaper, ReaperSettings};
use reservation::ReservationService;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub started_at: Instant,
    pub availability: AvailabilityEngine,
    pub reservations: ReservationService,
    pub confirmations: ConfirmationProcessor,
    pub reaper: Arc<Reaper>,
    /// Webhook HMAC secret; `None` disables the signature check.
    pub webhook_secret: Option<String>,
}

/// Client-side timeout for payment-provider lookups.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // ── Tracing: console + optional Telegram alerts on ERROR ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match (config.bot_token.is_empty(), config.alert_chat_id) {
        (false, Some(chat_id)) => {
            let alerts = telegram_layer::AlertLayer::new(config.bot_token.clone(), chat_id);
            registry.with(alerts).init();
        }
        _ => registry.init(),
    }
    config.warn_missing();

    // ── Database ──
    let pool = db::connect(&config.database_url, config.slot_lock_timeout).await?;
    db::run_migrations(&pool).await?;

    // ── Core services ──
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.business_offset));

    let gateway = Arc::new(MercadoPagoGateway::new(
        &config.mp_api_base,
        config.mp_access_token.clone(),
        GATEWAY_TIMEOUT,
    )?);
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(TracingNotifier)];
    if !config.bot_token.is_empty() {
        notifiers.push(Arc::new(TelegramNotifier::new(
            pool.clone(),
            config.bot_token.clone(),
            config.alert_chat_id,
        )));
    }

    let reaper = Arc::new(Reaper::new(
        pool.clone(),
        clock.clone(),
        ReaperSettings {
            pending_timeout: config.reaper_pending_timeout,
            alert_threshold: config.reaper_alert_threshold,
        },
    ));

    let state = Arc::new(AppState {
        db: pool.clone(),
        clock: clock.clone(),
        started_at: Instant::now(),
        availability: AvailabilityEngine::new(pool.clone(), clock.clone()),
        reservations: ReservationService::new(pool.clone(), clock.clone()),
        confirmations: ConfirmationProcessor::new(pool.clone(), clock.clone(), gateway, notifiers),
        reaper: reaper.clone(),
        webhook_secret: Some(config.mp_webhook_secret.clone()).filter(|s| !s.is_empty()),
    });

    // ── Background task: cancel abandoned checkouts ──
    reaper.spawn(config.reaper_interval);

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = match &config.webapp_url {
        Some(url) => CorsLayer::new()
            .allow_origin(AllowOrigin::list([url.parse::<axum::http::HeaderValue>()?]))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Barber booking server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
