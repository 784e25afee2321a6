//! In-process `UserStore` for tests. Guards mirror the Postgres statements.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::store::{EngagementCounts, ReminderSettings, StreakCounters, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::referral::{NewReferralReward, ReferralReward};
use crate::models::user::{NewUser, User};
use crate::services::clock::DayWindow;
use crate::services::subscription::{CorrelationKey, Transition};

struct DailyRow {
    user_id: Uuid,
    local_date: NaiveDate,
    at: DateTime<Utc>,
    points: i32,
}

impl DailyRow {
    fn within(&self, user_id: Uuid, day: &DayWindow) -> bool {
        self.user_id == user_id && (self.local_date == day.local_date || day.contains(self.at))
    }
}

#[derive(Default)]
struct State {
    users: Vec<User>,
    rewards: Vec<ReferralReward>,
    webhook_events: HashSet<(String, String)>,
    check_ins: Vec<DailyRow>,
    desensitization: Vec<DailyRow>,
    streak_history: Vec<(Uuid, i32)>,
    tool_usage: Vec<(Uuid, i64, i64)>,
}

impl State {
    fn user_mut(&mut self, id: Uuid) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) -> User {
        self.state.lock().unwrap().users.push(user.clone());
        user
    }

    pub fn user(&self, id: Uuid) -> User {
        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .expect("user not in store")
    }

    pub fn rewards(&self) -> Vec<ReferralReward> {
        self.state.lock().unwrap().rewards.clone()
    }

    pub fn log_tool_usage(&self, user_id: Uuid, urge_surfs: i64, journal_entries: i64) {
        self.state
            .lock()
            .unwrap()
            .tool_usage
            .push((user_id, urge_surfs, journal_entries));
    }

    pub fn archive_streak(&self, user_id: Uuid, length: i32) {
        self.state
            .lock()
            .unwrap()
            .streak_history
            .push((user_id, length));
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_referral_code(&self, code: &str) -> AppResult<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|u| u.referral_code.eq_ignore_ascii_case(code.trim()))
            .cloned())
    }

    async fn find_by_correlation(&self, key: &CorrelationKey) -> AppResult<Option<User>> {
        let state = self.state.lock().unwrap();
        let found = match key {
            CorrelationKey::StripeCustomer(id) => state
                .users
                .iter()
                .find(|u| u.stripe_customer_id.as_deref() == Some(id.as_str())),
            CorrelationKey::RevenueCatAppUser(id) => state
                .users
                .iter()
                .find(|u| u.id.to_string() == *id)
                .or_else(|| {
                    state
                        .users
                        .iter()
                        .find(|u| u.revenuecat_id.as_deref() == Some(id.as_str()))
                }),
        };
        Ok(found.cloned())
    }

    async fn create_user(&self, new: &NewUser) -> AppResult<User> {
        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|u| u.email == new.email) {
            return Err(AppError::Conflict("Email already registered".into()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.clone(),
            password_hash: new.password_hash.clone(),
            name: new.name.clone(),
            referral_code: new.referral_code.clone(),
            referred_by_id: new.referred_by_id,
            subscription_status: new.subscription_status,
            completed_at: None,
            lifetime_access: false,
            current_streak: 0,
            total_days_won: 0,
            highest_streak: 0,
            timezone: new.timezone.clone(),
            stripe_customer_id: new.stripe_customer_id.clone(),
            stripe_subscription_id: new.stripe_subscription_id.clone(),
            revenuecat_id: None,
            push_token: None,
            push_token_platform: None,
            reminder_time: None,
            last_check_in: None,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn apply_transition(&self, user_id: Uuid, transition: &Transition) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(user) = state.user_mut(user_id) else {
            return Ok(false);
        };

        let mut access = user.access_state();
        if !access.apply(transition) {
            return Ok(false);
        }
        user.subscription_status = access.status;
        user.completed_at = access.completed_at;
        user.lifetime_access = access.lifetime_access;
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_timezone(&self, user_id: Uuid, timezone: &str) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.user_mut(user_id) {
            user.timezone = Some(timezone.to_string());
        }
        Ok(())
    }

    async fn link_revenuecat(&self, user_id: Uuid, app_user_id: &str) -> AppResult<Option<User>> {
        let mut state = self.state.lock().unwrap();
        if state
            .users
            .iter()
            .any(|u| u.id != user_id && u.revenuecat_id.as_deref() == Some(app_user_id))
        {
            return Err(AppError::Conflict("RevenueCat account already linked".into()));
        }
        let Some(user) = state.user_mut(user_id) else {
            return Ok(None);
        };
        user.revenuecat_id = Some(app_user_id.to_string());
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn update_reminder_settings(
        &self,
        user_id: Uuid,
        settings: &ReminderSettings,
    ) -> AppResult<Option<User>> {
        let mut state = self.state.lock().unwrap();
        let Some(user) = state.user_mut(user_id) else {
            return Ok(None);
        };
        user.push_token = settings.push_token.clone();
        user.push_token_platform = settings.push_token_platform;
        user.reminder_time = settings.reminder_time.clone();
        Ok(Some(user.clone()))
    }

    async fn reminder_candidates(&self) -> AppResult<Vec<User>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .filter(|u| u.push_token.is_some() && u.reminder_time.is_some() && u.has_access())
            .cloned()
            .collect())
    }

    async fn clear_push_token(&self, user_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.user_mut(user_id) {
            user.push_token = None;
            user.push_token_platform = None;
        }
        Ok(())
    }

    async fn count_referrals(&self, referrer_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .filter(|u| u.referred_by_id == Some(referrer_id))
            .count() as i64)
    }

    async fn insert_referral_reward(
        &self,
        reward: &NewReferralReward,
    ) -> AppResult<Option<ReferralReward>> {
        let mut state = self.state.lock().unwrap();
        if state
            .rewards
            .iter()
            .any(|r| r.referred_id == reward.referred_id)
        {
            return Ok(None);
        }

        let row = ReferralReward {
            id: Uuid::new_v4(),
            referrer_id: reward.referrer_id,
            referred_id: reward.referred_id,
            credit_days: reward.credit_days,
            stripe_applied: false,
            applied_at: None,
            created_at: Utc::now(),
        };
        state.rewards.push(row.clone());
        Ok(Some(row))
    }

    async fn mark_referral_applied(&self, reward_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(reward) = state.rewards.iter_mut().find(|r| r.id == reward_id) {
            reward.stripe_applied = true;
            reward.applied_at = Some(at);
        }
        Ok(())
    }

    async fn record_webhook_event(&self, provider: &str, event_id: &str) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .webhook_events
            .insert((provider.to_string(), event_id.to_string())))
    }

    async fn webhook_event_seen(&self, provider: &str, event_id: &str) -> AppResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .webhook_events
            .contains(&(provider.to_string(), event_id.to_string())))
    }

    async fn record_check_in(
        &self,
        user_id: Uuid,
        day: &DayWindow,
        success: bool,
        at: DateTime<Utc>,
    ) -> AppResult<Option<StreakCounters>> {
        let mut state = self.state.lock().unwrap();
        if state.check_ins.iter().any(|c| c.within(user_id, day)) {
            return Ok(None);
        }

        let Some(user) = state.user_mut(user_id) else {
            return Err(AppError::NotFound("User not found".into()));
        };
        let archived = (!success && user.current_streak > 0).then_some(user.current_streak);
        if success {
            user.current_streak += 1;
            user.total_days_won += 1;
            user.highest_streak = user.highest_streak.max(user.current_streak);
        } else {
            user.current_streak = 0;
        }
        user.last_check_in = Some(at);
        let counters = StreakCounters {
            current_streak: user.current_streak,
            total_days_won: user.total_days_won,
            highest_streak: user.highest_streak,
        };

        if let Some(length) = archived {
            state.streak_history.push((user_id, length));
        }
        state.check_ins.push(DailyRow {
            user_id,
            local_date: day.local_date,
            at,
            points: 0,
        });
        Ok(Some(counters))
    }

    async fn record_desensitization(
        &self,
        user_id: Uuid,
        day: &DayWindow,
        points: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.desensitization.iter().any(|d| d.within(user_id, day)) {
            return Ok(false);
        }
        state.desensitization.push(DailyRow {
            user_id,
            local_date: day.local_date,
            at,
            points,
        });
        Ok(true)
    }

    async fn score_inputs(&self, user_id: Uuid) -> AppResult<EngagementCounts> {
        let state = self.state.lock().unwrap();
        let (urge_surf_count, journal_count) = state
            .tool_usage
            .iter()
            .filter(|(id, _, _)| *id == user_id)
            .fold((0, 0), |(s, j), (_, ds, dj)| (s + ds, j + dj));

        Ok(EngagementCounts {
            streak_history: state
                .streak_history
                .iter()
                .filter(|(id, _)| *id == user_id)
                .map(|(_, length)| *length)
                .collect(),
            urge_surf_count,
            journal_count,
            desensitization_points: state
                .desensitization
                .iter()
                .filter(|d| d.user_id == user_id)
                .map(|d| i64::from(d.points))
                .sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_webhook_record_reports_duplicate() {
        let store = MemoryStore::new();
        assert!(store.record_webhook_event("stripe", "evt_1").await.unwrap());
        assert!(!store.record_webhook_event("stripe", "evt_1").await.unwrap());
        assert!(store.record_webhook_event("revenuecat", "evt_1").await.unwrap());
        assert!(store.webhook_event_seen("stripe", "evt_1").await.unwrap());
    }
}
