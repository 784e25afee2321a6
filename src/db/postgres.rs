use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::store::{EngagementCounts, ReminderSettings, StreakCounters, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::referral::{NewReferralReward, ReferralReward};
use crate::models::user::{NewUser, SubscriptionStatus, User};
use crate::services::clock::DayWindow;
use crate::services::subscription::{CorrelationKey, Transition};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Name of the unique constraint a failed insert tripped, if any.
fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Some(db.constraint().unwrap_or("")),
        _ => None,
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.db)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_referral_code(&self, code: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = UPPER($1)")
            .bind(code.trim())
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_correlation(&self, key: &CorrelationKey) -> AppResult<Option<User>> {
        let sql = match key {
            CorrelationKey::StripeCustomer(_) => "SELECT * FROM users WHERE stripe_customer_id = $1",
            CorrelationKey::RevenueCatAppUser(_) => {
                "SELECT * FROM users WHERE id::text = $1 OR revenuecat_id = $1 \
                 ORDER BY (id::text = $1) DESC LIMIT 1"
            }
        };
        let user = sqlx::query_as::<_, User>(sql)
            .bind(key.value())
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn create_user(&self, new: &NewUser) -> AppResult<User> {
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                email, password_hash, name, referral_code, referred_by_id,
                subscription_status, timezone, stripe_customer_id, stripe_subscription_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.name)
        .bind(&new.referral_code)
        .bind(new.referred_by_id)
        .bind(new.subscription_status)
        .bind(&new.timezone)
        .bind(&new.stripe_customer_id)
        .bind(&new.stripe_subscription_id)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(e) => match unique_violation(&e) {
                Some("users_email_key") => Err(AppError::Conflict("Email already registered".into())),
                Some(_) => Err(AppError::Conflict("Account details already in use".into())),
                None => Err(e.into()),
            },
        }
    }

    async fn apply_transition(&self, user_id: Uuid, transition: &Transition) -> AppResult<bool> {
        let result = match transition {
            Transition::SetStatus { status } => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET subscription_status = $2, updated_at = NOW()
                    WHERE id = $1
                      AND completed_at IS NULL
                      AND subscription_status <> 'completed'
                      AND subscription_status <> $2
                    "#,
                )
                .bind(user_id)
                .bind(*status)
                .execute(&self.db)
                .await?
            }
            Transition::Complete { at } => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET subscription_status = $2, completed_at = $3, updated_at = NOW()
                    WHERE id = $1 AND completed_at IS NULL
                    "#,
                )
                .bind(user_id)
                .bind(SubscriptionStatus::Completed)
                .bind(*at)
                .execute(&self.db)
                .await?
            }
            Transition::PurchaseLifetime => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET subscription_status = $2, lifetime_access = TRUE, updated_at = NOW()
                    WHERE id = $1
                      AND completed_at IS NULL
                      AND subscription_status <> 'completed'
                    "#,
                )
                .bind(user_id)
                .bind(SubscriptionStatus::Completed)
                .execute(&self.db)
                .await?
            }
            Transition::ClaimLifetime => {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET lifetime_access = TRUE, updated_at = NOW()
                    WHERE id = $1 AND completed_at IS NOT NULL AND lifetime_access = FALSE
                    "#,
                )
                .bind(user_id)
                .execute(&self.db)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn update_timezone(&self, user_id: Uuid, timezone: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET timezone = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(timezone)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn link_revenuecat(&self, user_id: Uuid, app_user_id: &str) -> AppResult<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            "UPDATE users SET revenuecat_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(app_user_id)
        .fetch_optional(&self.db)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(e) if unique_violation(&e).is_some() => {
                Err(AppError::Conflict("RevenueCat account already linked".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_reminder_settings(
        &self,
        user_id: Uuid,
        settings: &ReminderSettings,
    ) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET push_token = $2, push_token_platform = $3, reminder_time = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&settings.push_token)
        .bind(settings.push_token_platform)
        .bind(&settings.reminder_time)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn reminder_candidates(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE push_token IS NOT NULL
              AND reminder_time IS NOT NULL
              AND (lifetime_access = TRUE
                   OR subscription_status IN ('trialing', 'active', 'completed'))
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn clear_push_token(&self, user_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET push_token = NULL, push_token_platform = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn count_referrals(&self, referrer_id: Uuid) -> AppResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE referred_by_id = $1")
                .bind(referrer_id)
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }

    async fn insert_referral_reward(
        &self,
        reward: &NewReferralReward,
    ) -> AppResult<Option<ReferralReward>> {
        let row = sqlx::query_as::<_, ReferralReward>(
            r#"
            INSERT INTO referral_rewards (id, referrer_id, referred_id, credit_days)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (referred_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reward.referrer_id)
        .bind(reward.referred_id)
        .bind(reward.credit_days)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn mark_referral_applied(&self, reward_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE referral_rewards SET stripe_applied = TRUE, applied_at = $2 WHERE id = $1",
        )
        .bind(reward_id)
        .bind(at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn record_webhook_event(&self, provider: &str, event_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (provider, event_id)
            VALUES ($1, $2)
            ON CONFLICT (provider, event_id) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(event_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn webhook_event_seen(&self, provider: &str, event_id: &str) -> AppResult<bool> {
        let seen = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM webhook_events WHERE provider = $1 AND event_id = $2)",
        )
        .bind(provider)
        .bind(event_id)
        .fetch_one(&self.db)
        .await?;
        Ok(seen)
    }

    async fn record_check_in(
        &self,
        user_id: Uuid,
        day: &DayWindow,
        success: bool,
        at: DateTime<Utc>,
    ) -> AppResult<Option<StreakCounters>> {
        let mut tx = self.db.begin().await?;

        // The unique (user_id, local_date) index backs the window check
        // when two requests race.
        let inserted = sqlx::query(
            r#"
            INSERT INTO check_ins (user_id, local_date, success, created_at)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM check_ins
                WHERE user_id = $1 AND created_at BETWEEN $5 AND $6
            )
            ON CONFLICT (user_id, local_date) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(day.local_date)
        .bind(success)
        .bind(at)
        .bind(day.start)
        .bind(day.end)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if !success {
            sqlx::query(
                r#"
                INSERT INTO streak_history (user_id, length, ended_at)
                SELECT id, current_streak, $2 FROM users
                WHERE id = $1 AND current_streak > 0
                "#,
            )
            .bind(user_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        let counters = sqlx::query_as::<_, (i32, i32, i32)>(
            r#"
            UPDATE users
            SET current_streak = CASE WHEN $2 THEN current_streak + 1 ELSE 0 END,
                total_days_won = total_days_won + CASE WHEN $2 THEN 1 ELSE 0 END,
                highest_streak = GREATEST(
                    highest_streak,
                    CASE WHEN $2 THEN current_streak + 1 ELSE 0 END
                ),
                last_check_in = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING current_streak, total_days_won, highest_streak
            "#,
        )
        .bind(user_id)
        .bind(success)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        tx.commit().await?;

        let (current_streak, total_days_won, highest_streak) = counters;
        Ok(Some(StreakCounters {
            current_streak,
            total_days_won,
            highest_streak,
        }))
    }

    async fn record_desensitization(
        &self,
        user_id: Uuid,
        day: &DayWindow,
        points: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO desensitization_completions (user_id, local_date, points, created_at)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM desensitization_completions
                WHERE user_id = $1 AND created_at BETWEEN $5 AND $6
            )
            ON CONFLICT (user_id, local_date) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(day.local_date)
        .bind(points)
        .bind(at)
        .bind(day.start)
        .bind(day.end)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn score_inputs(&self, user_id: Uuid) -> AppResult<EngagementCounts> {
        let streak_history = sqlx::query_scalar::<_, i32>(
            "SELECT length FROM streak_history WHERE user_id = $1 ORDER BY ended_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let (urge_surf_count, journal_count, desensitization_points) =
            sqlx::query_as::<_, (i64, i64, i64)>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM urge_surf_sessions WHERE user_id = $1),
                    (SELECT COUNT(*) FROM journal_entries WHERE user_id = $1),
                    (SELECT COALESCE(SUM(points), 0)::BIGINT
                       FROM desensitization_completions WHERE user_id = $1)
                "#,
            )
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;

        Ok(EngagementCounts {
            streak_history,
            urge_surf_count,
            journal_count,
            desensitization_points,
        })
    }
}
