use axum::{extract::State, http::HeaderMap, http::StatusCode, Extension, Json};
use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::{
    jwt::{create_access_token, AccessToken},
    middleware::AuthUser,
    password::{hash_password, verify_password},
};
use crate::error::{AppError, AppResult};
use crate::handlers::timezone_header;
use crate::models::user::{NewUser, SubscriptionStatus, UserProfile};
use crate::services::clock;
use crate::AppState;

const REFERRAL_CODE_LEN: usize = 8;
/// No 0/O or 1/I, so codes survive being read aloud.
const REFERRAL_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    pub referral_code: Option<String>,
    pub checkout_session_id: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub token: AccessToken,
    pub user: UserProfile,
}

fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| REFERRAL_ALPHABET[rng.gen_range(0..REFERRAL_ALPHABET.len())] as char)
        .collect()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    body.email = normalize_email(&body.email);
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let email = body.email.clone();
    if state.store.find_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let referrer = match body.referral_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => {
            let found = state.store.find_by_referral_code(code).await?;
            if found.is_none() {
                tracing::debug!(code, "Unknown referral code at registration, ignoring");
            }
            found
        }
        _ => None,
    };

    // Web checkout: the session is looked up server-side, never trusted from the client.
    let (subscription_status, stripe_customer_id, stripe_subscription_id) =
        match body.checkout_session_id.as_deref() {
            Some(session_id) => {
                let session = state
                    .billing
                    .checkout_session(session_id)
                    .await
                    .map_err(|e| {
                        tracing::warn!(session_id, error = %e, "Checkout session lookup failed");
                        AppError::BadRequest("Invalid checkout session".into())
                    })?;
                if !session.complete {
                    return Err(AppError::BadRequest("Checkout session is not complete".into()));
                }
                (
                    SubscriptionStatus::Trialing,
                    session.customer_id,
                    session.subscription_id,
                )
            }
            None => (SubscriptionStatus::PendingIap, None, None),
        };
    let with_payment = stripe_customer_id.is_some();

    let candidate = clock::request_zone(timezone_header(&headers), body.timezone.as_deref());
    let new_user = NewUser {
        email,
        password_hash: hash_password(&body.password)?,
        name: body.name.trim().to_string(),
        referral_code: generate_referral_code(),
        referred_by_id: referrer.as_ref().map(|r| r.id),
        subscription_status,
        timezone: clock::refreshed_timezone(None, candidate),
        stripe_customer_id,
        stripe_subscription_id,
    };
    let user = state.store.create_user(&new_user).await?;

    tracing::info!(
        user_id = %user.id,
        status = user.subscription_status.as_str(),
        referred = referrer.is_some(),
        "User registered"
    );

    if let Some(referrer) = referrer {
        let credit = state
            .referrals
            .apply_registration_credit(&referrer, &user, with_payment)
            .await;
        tracing::info!(
            referrer_id = %referrer.id,
            referred_id = %user.id,
            recorded = credit.recorded,
            monetary = ?credit.monetary,
            "Referral applied"
        );
    }

    let token = create_access_token(user.id, &user.email, &state.config)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let mut user = state
        .store
        .find_by_email(&normalize_email(&body.email))
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !verify_password(&body.password, &user.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let candidate = clock::request_zone(timezone_header(&headers), body.timezone.as_deref());
    if let Some(zone) = clock::refreshed_timezone(user.timezone.as_deref(), candidate) {
        state.store.update_timezone(user.id, &zone).await?;
        tracing::debug!(user_id = %user.id, timezone = %zone, "Timezone refreshed on login");
        user.timezone = Some(zone);
    }

    let token = create_access_token(user.id, &user.email, &state.config)?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<UserProfile>> {
    let user = state
        .store
        .find_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::{authed, empty_request, json_request, TestApp};
    use crate::services::billing::testing::FakeBilling;
    use crate::services::billing::CheckoutSession;
    use crate::config::Config;
    use axum::http::Method;
    use serde_json::json;

    fn register_body(email: &str) -> serde_json::Value {
        json!({ "email": email, "password": "hunter2hunter2", "name": "Riley" })
    }

    #[test]
    fn test_referral_codes_use_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_referral_code();
            assert_eq!(code.len(), REFERRAL_CODE_LEN);
            assert!(code.bytes().all(|b| REFERRAL_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_native_registration_starts_pending() {
        let app = TestApp::new();
        let mut req = json_request(
            Method::POST,
            "/api/auth/register",
            &register_body("Riley@Example.com "),
        );
        req.headers_mut()
            .insert("x-timezone", "Europe/Berlin".parse().unwrap());

        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["user"]["email"], "riley@example.com");
        assert_eq!(body["user"]["subscription_status"], "pending_iap");
        assert_eq!(body["user"]["has_access"], false);
        assert_eq!(body["user"]["timezone"], "Europe/Berlin");
        assert!(body["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_padded_email_is_normalized_before_validation() {
        let app = TestApp::new();
        let (status, body) = app
            .send(json_request(
                Method::POST,
                "/api/auth/register",
                &register_body("  Jordan@Example.COM\t"),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "jordan@example.com");

        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/api/auth/login",
                &json!({ "email": " JORDAN@example.com ", "password": "hunter2hunter2" }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let app = TestApp::new();
        let body = register_body("dup@example.com");
        let (first, _) = app
            .send(json_request(Method::POST, "/api/auth/register", &body))
            .await;
        assert_eq!(first, StatusCode::CREATED);

        let (second, err) = app
            .send(json_request(Method::POST, "/api/auth/register", &body))
            .await;
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], 409);
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        let app = TestApp::new();
        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/api/auth/register",
                &json!({ "email": "a@example.com", "password": "short", "name": "A" }),
            ))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_checkout_registration_trials_and_credits_referrer() {
        let billing = FakeBilling::default().with_session(
            "cs_test_1",
            CheckoutSession {
                customer_id: Some("cus_new".into()),
                subscription_id: Some("sub_new".into()),
                complete: true,
            },
        );
        let app = TestApp::with(Config::for_tests(), billing);
        let mut referrer = crate::models::user::User::fixture();
        referrer.email = "referrer@example.com".into();
        referrer.referral_code = "REFER234".into();
        referrer.stripe_customer_id = Some("cus_referrer".into());
        let referrer = app.store.insert(referrer);

        let mut body = register_body("paid@example.com");
        body["checkout_session_id"] = json!("cs_test_1");
        body["referral_code"] = json!("refer234");
        let (status, resp) = app
            .send(json_request(Method::POST, "/api/auth/register", &body))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(resp["user"]["subscription_status"], "trialing");
        let rewards = app.store.rewards();
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].referrer_id, referrer.id);
        assert!(rewards[0].stripe_applied);
        assert_eq!(
            app.billing.credits(),
            vec![("cus_referrer".to_string(), 999), ("cus_new".to_string(), 999)]
        );
    }

    #[tokio::test]
    async fn test_unknown_checkout_session_rejected() {
        let app = TestApp::new();
        let mut body = register_body("paid@example.com");
        body["checkout_session_id"] = json!("cs_missing");
        let (status, _) = app
            .send(json_request(Method::POST, "/api/auth/register", &body))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_refreshes_zone_but_never_to_utc() {
        let app = TestApp::new();
        let mut req = json_request(
            Method::POST,
            "/api/auth/register",
            &register_body("tz@example.com"),
        );
        req.headers_mut()
            .insert("x-timezone", "America/Chicago".parse().unwrap());
        app.send(req).await;

        let login = |zone: &str| {
            let mut req = json_request(
                Method::POST,
                "/api/auth/login",
                &json!({ "email": "tz@example.com", "password": "hunter2hunter2" }),
            );
            req.headers_mut().insert("x-timezone", zone.parse().unwrap());
            req
        };

        let (status, body) = app.send(login("Etc/UTC")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["timezone"], "America/Chicago");

        let (_, body) = app.send(login("Asia/Tokyo")).await;
        assert_eq!(body["user"]["timezone"], "Asia/Tokyo");
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let app = TestApp::new();
        app.send(json_request(
            Method::POST,
            "/api/auth/register",
            &register_body("pw@example.com"),
        ))
        .await;

        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/api/auth/login",
                &json!({ "email": "pw@example.com", "password": "not-the-password" }),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_requires_token() {
        let app = TestApp::new();
        let user = app.store.insert(crate::models::user::User::fixture());

        let (status, _) = app.send(empty_request(Method::GET, "/api/me")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = app.token_for(&user);
        let (status, body) = app
            .send(authed(empty_request(Method::GET, "/api/me"), &token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], user.id.to_string());
        assert_eq!(body["has_access"], true);
    }
}
