use axum::http::HeaderMap;

pub mod auth;
pub mod billing;
pub mod checkins;
pub mod health;
pub mod progress;
pub mod referrals;
pub mod reminders;
pub mod revenuecat;

pub const TIMEZONE_HEADER: &str = "x-timezone";

/// Raw `X-Timezone` header value, if present and readable.
pub fn timezone_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(TIMEZONE_HEADER).and_then(|v| v.to_str().ok())
}
