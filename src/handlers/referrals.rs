use axum::{extract::State, Extension, Json};

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::services::referral::ReferralStatus;
use crate::services::subscription::LifetimeGrant;
use crate::AppState;

pub async fn get_referrals(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<ReferralStatus>> {
    let user = state
        .store
        .find_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(state.referrals.status(&user).await?))
}

pub async fn claim_lifetime(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<LifetimeGrant>> {
    let grant = state.referrals.claim_lifetime(auth_user.id).await?;
    Ok(Json(grant))
}
