use axum::{extract::State, http::HeaderMap, http::StatusCode, Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::handlers::timezone_header;
use crate::models::user::User;
use crate::services::clock::{self, DayWindow};
use crate::services::subscription::COMPLETION_STREAK_DAYS;
use crate::AppState;

const DEFAULT_DESENSITIZATION_POINTS: i32 = 10;
const MAX_DESENSITIZATION_POINTS: i32 = 50;

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub success: bool,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    pub local_date: NaiveDate,
    pub success: bool,
    pub current_streak: i32,
    pub total_days_won: i32,
    pub highest_streak: i32,
    pub program_completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct DesensitizationRequest {
    pub points: Option<i32>,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DesensitizationResponse {
    pub local_date: NaiveDate,
    pub points: i32,
}

/// Load the caller and refuse anyone without access.
async fn subscriber(state: &AppState, auth_user: &AuthUser) -> AppResult<User> {
    let user = state
        .store
        .find_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    if !user.has_access() {
        return Err(AppError::Forbidden);
    }
    Ok(user)
}

pub async fn create_check_in(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<CheckInRequest>,
) -> AppResult<(StatusCode, Json<CheckInResponse>)> {
    let user = subscriber(&state, &auth_user).await?;

    let zone = clock::resolve_timezone(
        clock::request_zone(timezone_header(&headers), body.timezone.as_deref()),
        user.timezone.as_deref(),
    );
    let now = Utc::now();
    let day = DayWindow::containing(now, zone);

    let counters = state
        .store
        .record_check_in(user.id, &day, body.success, now)
        .await?
        .ok_or_else(|| AppError::Conflict("Already checked in today".into()))?;

    tracing::info!(
        user_id = %user.id,
        local_date = %day.local_date,
        success = body.success,
        current_streak = counters.current_streak,
        "Check-in recorded"
    );

    let mut program_completed = user.completed_at.is_some();
    if counters.current_streak >= COMPLETION_STREAK_DAYS {
        program_completed |= state
            .subscriptions
            .complete_streak(user.id, counters.current_streak, now)
            .await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(CheckInResponse {
            local_date: day.local_date,
            success: body.success,
            current_streak: counters.current_streak,
            total_days_won: counters.total_days_won,
            highest_streak: counters.highest_streak,
            program_completed,
        }),
    ))
}

pub async fn complete_desensitization(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<DesensitizationRequest>,
) -> AppResult<(StatusCode, Json<DesensitizationResponse>)> {
    let points = body.points.unwrap_or(DEFAULT_DESENSITIZATION_POINTS);
    if !(1..=MAX_DESENSITIZATION_POINTS).contains(&points) {
        return Err(AppError::Validation(format!(
            "points must be between 1 and {}",
            MAX_DESENSITIZATION_POINTS
        )));
    }

    let user = subscriber(&state, &auth_user).await?;
    let zone = clock::resolve_timezone(
        clock::request_zone(timezone_header(&headers), body.timezone.as_deref()),
        user.timezone.as_deref(),
    );
    let now = Utc::now();
    let day = DayWindow::containing(now, zone);

    if !state
        .store
        .record_desensitization(user.id, &day, points, now)
        .await?
    {
        return Err(AppError::Conflict(
            "Desensitization already completed today".into(),
        ));
    }

    tracing::info!(user_id = %user.id, local_date = %day.local_date, points, "Desensitization completed");
    Ok((
        StatusCode::CREATED,
        Json(DesensitizationResponse {
            local_date: day.local_date,
            points,
        }),
    ))
}
