use axum::{extract::State, http::HeaderMap, Extension, Json};
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::db::store::ReminderSettings;
use crate::error::{AppError, AppResult};
use crate::handlers::timezone_header;
use crate::models::user::{PushPlatform, UserProfile};
use crate::services::{clock, reminder};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub push_token: Option<String>,
    pub push_token_platform: Option<PushPlatform>,
    /// Local `HH:MM`; null turns reminders off.
    pub reminder_time: Option<String>,
    pub timezone: Option<String>,
}

pub async fn update_reminders(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<ReminderRequest>,
) -> AppResult<Json<UserProfile>> {
    let reminder_time = match body.reminder_time.as_deref() {
        Some(raw) => {
            let time = reminder::parse_reminder_time(raw).ok_or_else(|| {
                AppError::Validation("reminder_time must be HH:MM (24-hour)".into())
            })?;
            Some(time.format("%H:%M").to_string())
        }
        None => None,
    };
    let push_token = body
        .push_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let settings = ReminderSettings {
        push_token_platform: push_token.as_ref().and(body.push_token_platform),
        push_token,
        reminder_time,
    };

    let mut user = state
        .store
        .update_reminder_settings(auth_user.id, &settings)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let candidate = clock::request_zone(timezone_header(&headers), body.timezone.as_deref());
    if let Some(zone) = clock::refreshed_timezone(user.timezone.as_deref(), candidate) {
        state.store.update_timezone(user.id, &zone).await?;
        user.timezone = Some(zone);
    }

    tracing::debug!(
        user_id = %user.id,
        reminder_time = ?user.reminder_time,
        has_token = user.push_token.is_some(),
        "Reminder settings updated"
    );
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use crate::models::user::{PushPlatform, User};
    use crate::routes::testing::{authed, json_request, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_settings_are_stored_normalized() {
        let app = TestApp::new();
        let user = app.store.insert(User::fixture());
        let token = app.token_for(&user);

        let (status, body) = app
            .send(authed(
                json_request(
                    Method::PUT,
                    "/api/me/reminders",
                    &json!({
                        "push_token": "ExponentPushToken[abc]",
                        "push_token_platform": "ios",
                        "reminder_time": "7:30",
                        "timezone": "America/Denver"
                    }),
                ),
                &token,
            ))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reminder_time"], "07:30");
        assert_eq!(body["timezone"], "America/Denver");
        let stored = app.store.user(user.id);
        assert_eq!(stored.push_token.as_deref(), Some("ExponentPushToken[abc]"));
        assert_eq!(stored.push_token_platform, Some(PushPlatform::Ios));
    }

    #[tokio::test]
    async fn test_invalid_time_rejected() {
        let app = TestApp::new();
        let user = app.store.insert(User::fixture());
        let token = app.token_for(&user);

        let (status, _) = app
            .send(authed(
                json_request(
                    Method::PUT,
                    "/api/me/reminders",
                    &json!({ "reminder_time": "25:00" }),
                ),
                &token,
            ))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
