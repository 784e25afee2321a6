use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod routes;
mod services;

use config::Config;
use db::UserStore;
use services::billing::{BillingProvider, StripeClient};
use services::push::ExpoPushGateway;
use services::referral::ReferralLedger;
use services::reminder::{spawn_reminder_worker, ReminderScheduler};
use services::subscription::SubscriptionService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn UserStore>,
    pub billing: Arc<dyn BillingProvider>,
    pub subscriptions: SubscriptionService,
    pub referrals: ReferralLedger,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn UserStore>,
        billing: Arc<dyn BillingProvider>,
    ) -> Self {
        let subscriptions = SubscriptionService::new(
            store.clone(),
            billing.clone(),
            config.lifetime_product_ids.clone(),
        );
        let referrals = ReferralLedger::new(
            store.clone(),
            billing.clone(),
            subscriptions.clone(),
            config.referral_lifetime_threshold,
            config.referral_credit_days,
            config.referral_credit_cents,
        );
        Self {
            config,
            store,
            billing,
            subscriptions,
            referrals,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streakward_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    // Database
    let db = db::pool::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations applied");

    let store: Arc<dyn UserStore> = Arc::new(db::postgres::PgStore::new(db));
    let billing: Arc<dyn BillingProvider> =
        Arc::new(StripeClient::new(config.stripe_secret_key.clone()));
    let state = AppState::new(config.clone(), store.clone(), billing);

    if config.reminders_enabled {
        let push = Arc::new(ExpoPushGateway::new(config.expo_access_token.clone()));
        let scheduler = ReminderScheduler::new(store, push, config.reminder_window_minutes());
        spawn_reminder_worker(
            scheduler,
            Duration::from_secs(config.reminder_sweep_secs.max(60)),
        );
        tracing::info!(
            sweep_secs = config.reminder_sweep_secs,
            "Reminder worker started"
        );
    }

    let allowed_origins: Vec<axum::http::HeaderValue> = {
        let mut origins = Vec::new();
        match config.frontend_url.parse::<axum::http::HeaderValue>() {
            Ok(origin) => origins.push(origin),
            Err(_) => tracing::warn!(url = %config.frontend_url, "FRONTEND_URL is not a valid origin"),
        }
        if let Ok(extra) = std::env::var("CORS_EXTRA_ORIGINS") {
            for o in extra.split(',') {
                if let Ok(hv) = o.trim().parse::<axum::http::HeaderValue>() {
                    origins.push(hv);
                }
            }
        }
        origins
    };

    let app = routes::build_router(state, allowed_origins);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
