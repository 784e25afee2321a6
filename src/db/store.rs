use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::referral::{NewReferralReward, ReferralReward};
use crate::models::user::{NewUser, PushPlatform, User};
use crate::services::clock::DayWindow;
use crate::services::subscription::{CorrelationKey, Transition};

/// Streak counters after a recorded check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreakCounters {
    pub current_streak: i32,
    pub total_days_won: i32,
    pub highest_streak: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReminderSettings {
    pub push_token: Option<String>,
    pub push_token_platform: Option<PushPlatform>,
    pub reminder_time: Option<String>,
}

/// Engagement counters the recovery score reads, beyond the user row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementCounts {
    /// Archived streak lengths, oldest first.
    pub streak_history: Vec<i32>,
    pub urge_surf_count: i64,
    pub journal_count: i64,
    pub desensitization_points: i64,
}

/// Persistence for everything the core reads and writes.
///
/// Writes that move access state are conditional: implementations must apply
/// the same guards as [`crate::services::subscription::AccessState::apply`]
/// in a single statement and report whether a row changed.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn find_by_referral_code(&self, code: &str) -> AppResult<Option<User>>;
    async fn find_by_correlation(&self, key: &CorrelationKey) -> AppResult<Option<User>>;

    /// Insert a new account. A taken email is a `Conflict`.
    async fn create_user(&self, user: &NewUser) -> AppResult<User>;

    async fn apply_transition(&self, user_id: Uuid, transition: &Transition) -> AppResult<bool>;

    /// Set `lifetime_access` for a completed user. False when already set
    /// or when the user never completed.
    async fn grant_lifetime(&self, user_id: Uuid) -> AppResult<bool> {
        self.apply_transition(user_id, &Transition::ClaimLifetime).await
    }

    async fn update_timezone(&self, user_id: Uuid, timezone: &str) -> AppResult<()>;
    /// Store the RevenueCat app user id webhooks will route by. An id already
    /// linked to another user is a `Conflict`.
    async fn link_revenuecat(&self, user_id: Uuid, app_user_id: &str) -> AppResult<Option<User>>;
    async fn update_reminder_settings(
        &self,
        user_id: Uuid,
        settings: &ReminderSettings,
    ) -> AppResult<Option<User>>;

    /// Users with a push token, a reminder time and access.
    async fn reminder_candidates(&self) -> AppResult<Vec<User>>;
    async fn clear_push_token(&self, user_id: Uuid) -> AppResult<()>;

    /// Users whose `referred_by_id` points at `referrer_id`.
    async fn count_referrals(&self, referrer_id: Uuid) -> AppResult<i64>;
    /// `None` when the referred user already has a reward row.
    async fn insert_referral_reward(
        &self,
        reward: &NewReferralReward,
    ) -> AppResult<Option<ReferralReward>>;
    async fn mark_referral_applied(&self, reward_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    /// Record a processed webhook delivery. False when it was already recorded.
    async fn record_webhook_event(&self, provider: &str, event_id: &str) -> AppResult<bool>;
    async fn webhook_event_seen(&self, provider: &str, event_id: &str) -> AppResult<bool>;

    /// Record today's check-in and update the counters in one step.
    /// `None` when the user already checked in within `day`.
    async fn record_check_in(
        &self,
        user_id: Uuid,
        day: &DayWindow,
        success: bool,
        at: DateTime<Utc>,
    ) -> AppResult<Option<StreakCounters>>;

    /// False when a completion already exists within `day`.
    async fn record_desensitization(
        &self,
        user_id: Uuid,
        day: &DayWindow,
        points: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool>;

    async fn score_inputs(&self, user_id: Uuid) -> AppResult<EngagementCounts>;
}
