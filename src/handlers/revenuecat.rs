use axum::{
    body::Bytes, extract::State, http::header::AUTHORIZATION, http::HeaderMap, Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::handlers::billing::{constant_time_eq, process_billing_event};
use crate::models::user::UserProfile;
use crate::services::subscription::{BillingEvent, CorrelationKey};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LinkRequest {
    #[validate(length(min = 1, max = 255, message = "app_user_id is required"))]
    pub app_user_id: String,
}

/// Link the app's RevenueCat `app_user_id` so later webhooks route to this user.
pub async fn link_app_user(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(mut body): Json<LinkRequest>,
) -> AppResult<Json<UserProfile>> {
    body.app_user_id = body.app_user_id.trim().to_string();
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // Webhooks also route by raw user id; another user's id can never be an alias.
    if let Ok(id) = body.app_user_id.parse::<Uuid>() {
        if id != auth_user.id {
            return Err(AppError::Validation(
                "app_user_id may not be another account's id".into(),
            ));
        }
    }

    let user = state
        .store
        .link_revenuecat(auth_user.id, &body.app_user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    tracing::info!(user_id = %user.id, "RevenueCat app user linked");
    Ok(Json(user.into()))
}

/// RevenueCat sends the configured secret verbatim in `Authorization`.
fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let presented = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    constant_time_eq(presented.as_bytes(), secret.as_bytes())
}

fn revenuecat_billing_event(event: &Value) -> BillingEvent {
    let event_type = event["type"].as_str().unwrap_or("");
    match event_type {
        "INITIAL_PURCHASE" => {
            if event["period_type"].as_str() == Some("TRIAL") {
                BillingEvent::Trialing
            } else {
                BillingEvent::Activated
            }
        }
        "RENEWAL" | "UNCANCELLATION" | "PRODUCT_CHANGE" => BillingEvent::Activated,
        "CANCELLATION" | "EXPIRATION" => BillingEvent::Ended,
        "BILLING_ISSUE" => BillingEvent::BillingFailed,
        "NON_RENEWING_PURCHASE" => BillingEvent::LifetimePurchase {
            product_id: event["product_id"].as_str().unwrap_or("").to_string(),
        },
        other => BillingEvent::Unrecognized {
            kind: other.to_string(),
        },
    }
}

pub async fn revenuecat_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let secret = &state.config.revenuecat_webhook_secret;
    if secret.is_empty() {
        tracing::warn!("RevenueCat webhook secret not configured, rejecting delivery");
        return Err(AppError::Unauthorized);
    }
    if !authorized(&headers, secret) {
        tracing::warn!("RevenueCat webhook rejected: bad authorization");
        return Err(AppError::Unauthorized);
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed RevenueCat webhook payload");
            return Ok(Json(json!({ "received": true, "ignored": "malformed_payload" })));
        }
    };

    let event = &payload["event"];
    let event_id = event["id"].as_str().filter(|id| !id.is_empty());
    let key = event["app_user_id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(|id| CorrelationKey::RevenueCatAppUser(id.to_string()));

    tracing::info!(
        event_type = event["type"].as_str().unwrap_or(""),
        event_id,
        "RevenueCat webhook received"
    );

    process_billing_event(
        &state,
        "revenuecat",
        event_id,
        key,
        revenuecat_billing_event(event),
    )
    .await
}
