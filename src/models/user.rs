use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::subscription::AccessState;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub referral_code: String,
    pub referred_by_id: Option<Uuid>,
    pub subscription_status: SubscriptionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub lifetime_access: bool,
    pub current_streak: i32,
    pub total_days_won: i32,
    pub highest_streak: i32,
    pub timezone: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub revenuecat_id: Option<String>,
    pub push_token: Option<String>,
    pub push_token_platform: Option<PushPlatform>,
    pub reminder_time: Option<String>,
    pub last_check_in: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingIap,
    Trialing,
    Active,
    Canceled,
    Completed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingIap => "pending_iap",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::Completed => "completed",
        }
    }

    /// Statuses that let the user into the product.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Trialing | Self::Active | Self::Completed)
    }
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::PendingIap
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "push_platform", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PushPlatform {
    Ios,
    Android,
    Web,
}

impl User {
    pub fn access_state(&self) -> AccessState {
        AccessState {
            status: self.subscription_status,
            completed_at: self.completed_at,
            lifetime_access: self.lifetime_access,
            current_streak: self.current_streak,
        }
    }

    pub fn has_access(&self) -> bool {
        self.lifetime_access || self.subscription_status.grants_access()
    }
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub referral_code: String,
    pub subscription_status: SubscriptionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub lifetime_access: bool,
    pub has_access: bool,
    pub current_streak: i32,
    pub total_days_won: i32,
    pub highest_streak: i32,
    pub timezone: Option<String>,
    pub reminder_time: Option<String>,
    pub revenuecat_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        let has_access = u.has_access();
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            referral_code: u.referral_code,
            subscription_status: u.subscription_status,
            completed_at: u.completed_at,
            lifetime_access: u.lifetime_access,
            has_access,
            current_streak: u.current_streak,
            total_days_won: u.total_days_won,
            highest_streak: u.highest_streak,
            timezone: u.timezone,
            reminder_time: u.reminder_time,
            revenuecat_id: u.revenuecat_id,
            created_at: u.created_at,
        }
    }
}

/// Everything registration needs to insert a row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub referral_code: String,
    pub referred_by_id: Option<Uuid>,
    pub subscription_status: SubscriptionStatus,
    pub timezone: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

#[cfg(test)]
impl User {
    pub fn fixture() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: "sam@example.com".into(),
            password_hash: String::new(),
            name: "Sam".into(),
            referral_code: "ABCD2345".into(),
            referred_by_id: None,
            subscription_status: SubscriptionStatus::Active,
            completed_at: None,
            lifetime_access: false,
            current_streak: 0,
            total_days_won: 0,
            highest_streak: 0,
            timezone: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            revenuecat_id: None,
            push_token: None,
            push_token_platform: None,
            reminder_time: None,
            last_check_in: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SubscriptionStatus::PendingIap).unwrap();
        assert_eq!(json, "\"pending_iap\"");
        assert_eq!(SubscriptionStatus::PendingIap.as_str(), "pending_iap");
    }

    #[test]
    fn test_access_granting_statuses() {
        assert!(!SubscriptionStatus::PendingIap.grants_access());
        assert!(SubscriptionStatus::Trialing.grants_access());
        assert!(SubscriptionStatus::Active.grants_access());
        assert!(!SubscriptionStatus::Canceled.grants_access());
        assert!(SubscriptionStatus::Completed.grants_access());
    }

    #[test]
    fn test_lifetime_access_overrides_canceled_status() {
        let mut user = User::fixture();
        user.subscription_status = SubscriptionStatus::Canceled;
        assert!(!user.has_access());
        user.lifetime_access = true;
        assert!(user.has_access());
    }

    #[test]
    fn test_profile_hides_password_hash() {
        let mut user = User::fixture();
        user.password_hash = "secret-hash".into();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }
}
