use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers;
use crate::AppState;

pub fn build_router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route(
            "/api/webhooks/stripe",
            post(handlers::billing::stripe_webhook),
        )
        .route(
            "/api/webhooks/revenuecat",
            post(handlers::revenuecat::revenuecat_webhook),
        );

    let protected_routes = Router::new()
        .route("/api/me", get(handlers::auth::me))
        .route(
            "/api/me/reminders",
            put(handlers::reminders::update_reminders),
        )
        .route(
            "/api/me/revenuecat",
            put(handlers::revenuecat::link_app_user),
        )
        // Once-per-day actions
        .route("/api/check-ins", post(handlers::checkins::create_check_in))
        .route(
            "/api/desensitization/complete",
            post(handlers::checkins::complete_desensitization),
        )
        .route("/api/progress", get(handlers::progress::get_progress))
        // Billing & referrals
        .route(
            "/api/billing/subscription",
            get(handlers::billing::get_subscription),
        )
        .route("/api/referrals", get(handlers::referrals::get_referrals))
        .route(
            "/api/referrals/claim-lifetime",
            post(handlers::referrals::claim_lifetime),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static(handlers::TIMEZONE_HEADER),
        ])
        .allow_credentials(true);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
