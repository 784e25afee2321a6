use axum::{body::Bytes, extract::State, http::HeaderMap, Extension, Json};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::user::SubscriptionStatus;
use crate::services::subscription::{BillingEvent, CorrelationKey, EventOutcome};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    pub status: SubscriptionStatus,
    pub has_access: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub lifetime_access: bool,
    pub stripe_customer_id: Option<String>,
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<SubscriptionInfo>> {
    let user = state
        .store
        .find_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(SubscriptionInfo {
        status: user.subscription_status,
        has_access: user.has_access(),
        completed_at: user.completed_at,
        lifetime_access: user.lifetime_access,
        stripe_customer_id: user.stripe_customer_id,
    }))
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verify Stripe webhook signature.
/// Header format: t=timestamp,v1=signature[,v1=signature...]
fn verify_stripe_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
) -> Result<(), AppError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(ts)) => timestamp = Some(ts),
            (Some("v1"), Some(sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let ts = timestamp
        .ok_or_else(|| AppError::BadRequest("Missing timestamp in Stripe-Signature".into()))?;

    if signatures.is_empty() {
        return Err(AppError::BadRequest(
            "Missing v1 signature in Stripe-Signature".into(),
        ));
    }

    let ts_secs: i64 = ts
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid timestamp in Stripe-Signature".into()))?;
    if (now - ts_secs).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::BadRequest(
            "Stripe webhook timestamp outside tolerance".into(),
        ));
    }

    // Signed payload is "timestamp.payload"
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid webhook secret")))?;
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if !signatures
        .iter()
        .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes()))
    {
        return Err(AppError::BadRequest(
            "Invalid Stripe webhook signature".into(),
        ));
    }

    Ok(())
}

/// Customer id from a Stripe object; expanded objects carry it under `id`.
fn stripe_customer(object: &Value) -> Option<CorrelationKey> {
    let customer = &object["customer"];
    customer
        .as_str()
        .or_else(|| customer["id"].as_str())
        .filter(|id| !id.is_empty())
        .map(|id| CorrelationKey::StripeCustomer(id.to_string()))
}

/// Translate a Stripe event into the shared vocabulary.
fn stripe_billing_event(event_type: &str, object: &Value) -> BillingEvent {
    match event_type {
        "customer.subscription.updated" | "customer.subscription.created" => {
            match object["status"].as_str().unwrap_or("") {
                "active" => BillingEvent::Activated,
                "trialing" => BillingEvent::Trialing,
                "canceled" | "unpaid" | "incomplete_expired" => BillingEvent::Ended,
                "past_due" => BillingEvent::BillingFailed,
                other => BillingEvent::Unrecognized {
                    kind: format!("{}:{}", event_type, other),
                },
            }
        }
        "customer.subscription.deleted" => BillingEvent::Ended,
        "invoice.payment_failed" => BillingEvent::BillingFailed,
        other => BillingEvent::Unrecognized {
            kind: other.to_string(),
        },
    }
}

fn outcome_body(outcome: &EventOutcome) -> Value {
    match outcome {
        EventOutcome::UserNotFound => json!({ "received": true, "ignored": "unknown_user" }),
        EventOutcome::Ignored(reason) => json!({ "received": true, "ignored": reason }),
        EventOutcome::Superseded => json!({ "received": true, "ignored": "superseded" }),
        EventOutcome::Applied {
            transition,
            side_effect,
            ..
        } => json!({
            "received": true,
            "applied": transition,
            "side_effect": side_effect,
        }),
    }
}

/// Shared tail of both provider webhooks: dedup, route, apply, record.
/// Storage errors propagate as 500 so the provider retries.
pub(crate) async fn process_billing_event(
    state: &AppState,
    provider: &str,
    event_id: Option<&str>,
    key: Option<CorrelationKey>,
    event: BillingEvent,
) -> AppResult<Json<Value>> {
    if let Some(id) = event_id {
        if state.store.webhook_event_seen(provider, id).await? {
            tracing::debug!(provider, event_id = id, "Webhook event already processed, skipping");
            return Ok(Json(json!({ "received": true, "duplicate": true })));
        }
    }

    let body = match key {
        Some(key) => {
            let outcome = state
                .subscriptions
                .handle_event(&key, &event, Utc::now())
                .await?;
            outcome_body(&outcome)
        }
        None => {
            tracing::warn!(provider, event = event.label(), "Webhook without correlation key, ignoring");
            json!({ "received": true, "ignored": "missing_correlation_key" })
        }
    };

    if let Some(id) = event_id {
        if !state.store.record_webhook_event(provider, id).await? {
            tracing::debug!(
                provider,
                event_id = id,
                "Webhook event recorded by a concurrent delivery"
            );
        }
    }

    Ok(Json(body))
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    if !state.config.stripe_webhook_secret.is_empty() {
        let sig_header = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".into()))?;

        verify_stripe_signature(
            &body,
            sig_header,
            &state.config.stripe_webhook_secret,
            Utc::now().timestamp(),
        )?;
    } else {
        tracing::warn!("Stripe webhook secret not configured, signature verification skipped");
    }

    let event: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed Stripe webhook payload");
            return Ok(Json(json!({ "received": true, "ignored": "malformed_payload" })));
        }
    };

    let event_id = event["id"].as_str().filter(|id| !id.is_empty());
    let event_type = event["type"].as_str().unwrap_or("");
    let object = &event["data"]["object"];

    tracing::info!(event_type, event_id, "Stripe webhook received");

    process_billing_event(
        &state,
        "stripe",
        event_id,
        stripe_customer(object),
        stripe_billing_event(event_type, object),
    )
    .await
}
