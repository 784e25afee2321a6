use axum::{extract::State, http::HeaderMap, Extension, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::auth::middleware::AuthUser;
use crate::db::store::EngagementCounts;
use crate::error::{AppError, AppResult};
use crate::handlers::timezone_header;
use crate::models::user::User;
use crate::services::clock;
use crate::services::recovery_score::{breakdown, ScoreBreakdown, ScoreInputs};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub local_date: NaiveDate,
    pub recovery_score: u8,
    pub breakdown: ScoreBreakdown,
    pub current_streak: i32,
    pub highest_streak: i32,
    pub total_days_won: i32,
    pub days_since_start: u32,
    pub completed_at: Option<DateTime<Utc>>,
    pub lifetime_access: bool,
}

fn non_negative(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Whole local calendar days between sign-up and today.
fn days_since_start(user: &User, today: NaiveDate, zone: chrono_tz::Tz) -> u32 {
    let started = clock::local_date(user.created_at, zone);
    non_negative((today - started).num_days())
}

/// Archived streaks oldest first, then the live streak as the most recent.
fn score_inputs(user: &User, counts: EngagementCounts, days_since_start: u32) -> ScoreInputs {
    let mut streak_history: Vec<u32> = counts
        .streak_history
        .into_iter()
        .map(|length| non_negative(i64::from(length)))
        .collect();
    if user.current_streak > 0 {
        streak_history.push(non_negative(i64::from(user.current_streak)));
    }

    ScoreInputs {
        days_won: non_negative(i64::from(user.total_days_won)),
        days_since_start,
        streak_history,
        urge_surf_count: non_negative(counts.urge_surf_count),
        journal_count: non_negative(counts.journal_count),
        desensitization_points: non_negative(counts.desensitization_points),
    }
}

pub async fn get_progress(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
) -> AppResult<Json<ProgressResponse>> {
    let user = state
        .store
        .find_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let zone = clock::resolve_timezone(
        clock::request_zone(timezone_header(&headers), None),
        user.timezone.as_deref(),
    );
    let today = clock::local_date(Utc::now(), zone);
    let days = days_since_start(&user, today, zone);

    let counts = state.store.score_inputs(user.id).await?;
    let scored = breakdown(&score_inputs(&user, counts, days));

    Ok(Json(ProgressResponse {
        local_date: today,
        recovery_score: scored.score,
        breakdown: scored,
        current_streak: user.current_streak,
        highest_streak: user.highest_streak,
        total_days_won: user.total_days_won,
        days_since_start: days,
        completed_at: user.completed_at,
        lifetime_access: user.lifetime_access,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserStore;
    use crate::routes::testing::{authed, empty_request, TestApp};
    use axum::http::{Method, StatusCode};
    use chrono::Duration;

    #[test]
    fn test_live_streak_is_most_recent_history_entry() {
        let mut user = User::fixture();
        user.current_streak = 9;
        user.total_days_won = 30;
        let counts = EngagementCounts {
            streak_history: vec![4, 17],
            urge_surf_count: 3,
            journal_count: 2,
            desensitization_points: 40,
        };

        let inputs = score_inputs(&user, counts, 45);
        assert_eq!(inputs.streak_history, vec![4, 17, 9]);
        assert_eq!(inputs.days_won, 30);
        assert_eq!(inputs.desensitization_points, 40);
    }

    #[tokio::test]
    async fn test_progress_for_saturated_user_is_100() {
        let app = TestApp::new();
        let mut user = User::fixture();
        user.created_at = Utc::now() - Duration::days(90);
        user.total_days_won = 90;
        user.current_streak = 90;
        user.highest_streak = 90;
        let user = app.store.insert(user);
        app.store.log_tool_usage(user.id, 20, 30);
        app.store.archive_streak(user.id, 90);
        let now = Utc::now();
        for offset in 0..3 {
            let at = now - Duration::days(offset);
            let day = clock::DayWindow::containing(at, chrono_tz::Tz::UTC);
            app.store
                .record_desensitization(user.id, &day, 50, at)
                .await
                .unwrap();
        }
        let token = app.token_for(&user);

        let (status, body) = app
            .send(authed(empty_request(Method::GET, "/api/progress"), &token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recovery_score"], 100);
        assert_eq!(body["days_since_start"], 90);
    }

    #[tokio::test]
    async fn test_new_user_progress() {
        let app = TestApp::new();
        let user = app.store.insert(User::fixture());
        let token = app.token_for(&user);

        let (status, body) = app
            .send(authed(empty_request(Method::GET, "/api/progress"), &token))
            .await;
        assert_eq!(status, StatusCode::OK);
        // streak trend 20 + floor 5, nothing else earned yet
        assert_eq!(body["recovery_score"], 25);
        assert_eq!(body["breakdown"]["floor_bonus"], 5.0);
    }
}
