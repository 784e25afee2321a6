//! Referral reward ledger and the referral route to lifetime access.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::db::UserStore;
use crate::error::{AppError, AppResult};
use crate::models::referral::{NewReferralReward, ReferralReward};
use crate::models::user::User;
use crate::services::billing::BillingProvider;
use crate::services::subscription::{LifetimeGrant, SideEffect, SubscriptionService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimRejectionReason {
    NotCompleted,
    InsufficientReferrals,
}

impl ClaimRejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCompleted => "not_completed",
            Self::InsufficientReferrals => "insufficient_referrals",
        }
    }
}

/// Why a lifetime claim was refused, with enough numbers to render progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRejection {
    pub reason: ClaimRejectionReason,
    pub current: i64,
    pub needed: i64,
    pub threshold: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralStatus {
    pub referral_code: String,
    pub referral_count: i64,
    pub threshold: i64,
    pub needed: i64,
    pub completed: bool,
    pub lifetime_access: bool,
    pub eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded(ReferralReward),
    Duplicate,
}

/// What happened when a referral was credited at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralCredit {
    pub recorded: bool,
    pub monetary: SideEffect,
}

#[derive(Clone)]
pub struct ReferralLedger {
    store: Arc<dyn UserStore>,
    billing: Arc<dyn BillingProvider>,
    subscriptions: SubscriptionService,
    threshold: i64,
    credit_days: i32,
    credit_cents: i64,
}

impl ReferralLedger {
    pub fn new(
        store: Arc<dyn UserStore>,
        billing: Arc<dyn BillingProvider>,
        subscriptions: SubscriptionService,
        threshold: i64,
        credit_days: i32,
        credit_cents: i64,
    ) -> Self {
        Self {
            store,
            billing,
            subscriptions,
            threshold,
            credit_days,
            credit_cents,
        }
    }

    pub async fn record_referral(
        &self,
        referrer_id: Uuid,
        referred_id: Uuid,
        credit_days: i32,
    ) -> AppResult<RecordOutcome> {
        let reward = NewReferralReward {
            referrer_id,
            referred_id,
            credit_days,
        };

        match self.store.insert_referral_reward(&reward).await? {
            Some(row) => Ok(RecordOutcome::Recorded(row)),
            None => {
                tracing::debug!(%referrer_id, %referred_id, "Referral already recorded");
                Ok(RecordOutcome::Duplicate)
            }
        }
    }

    pub async fn status(&self, user: &User) -> AppResult<ReferralStatus> {
        let referral_count = self.store.count_referrals(user.id).await?;
        let completed = user.completed_at.is_some();
        Ok(ReferralStatus {
            referral_code: user.referral_code.clone(),
            referral_count,
            threshold: self.threshold,
            needed: (self.threshold - referral_count).max(0),
            completed,
            lifetime_access: user.lifetime_access,
            eligible: completed && referral_count >= self.threshold,
        })
    }

    pub async fn eligible_for_lifetime(&self, user: &User) -> AppResult<bool> {
        Ok(self.status(user).await?.eligible)
    }

    /// Grant lifetime access through referrals. The user row is re-read so
    /// nothing the client sent is trusted; a second call is a no-op.
    pub async fn claim_lifetime(&self, user_id: Uuid) -> AppResult<LifetimeGrant> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        if user.lifetime_access {
            return Ok(LifetimeGrant::AlreadyGranted);
        }

        let status = self.status(&user).await?;
        if !status.completed {
            return Err(AppError::ClaimRejected(ClaimRejection {
                reason: ClaimRejectionReason::NotCompleted,
                current: status.referral_count,
                needed: status.needed,
                threshold: self.threshold,
            }));
        }
        if !status.eligible {
            return Err(AppError::ClaimRejected(ClaimRejection {
                reason: ClaimRejectionReason::InsufficientReferrals,
                current: status.referral_count,
                needed: status.needed,
                threshold: self.threshold,
            }));
        }

        self.subscriptions.grant_lifetime(&user).await
    }

    /// Count a referral made at registration and, when the new user paid,
    /// credit both parties' billing accounts. Never fails the caller.
    pub async fn apply_registration_credit(
        &self,
        referrer: &User,
        referred: &User,
        with_payment: bool,
    ) -> ReferralCredit {
        let reward = match self
            .record_referral(referrer.id, referred.id, self.credit_days)
            .await
        {
            Ok(RecordOutcome::Recorded(reward)) => reward,
            Ok(RecordOutcome::Duplicate) => {
                return ReferralCredit {
                    recorded: false,
                    monetary: SideEffect::NotNeeded,
                }
            }
            Err(e) => {
                tracing::error!(
                    referrer_id = %referrer.id,
                    referred_id = %referred.id,
                    error = %e,
                    "Failed to record referral"
                );
                return ReferralCredit {
                    recorded: false,
                    monetary: SideEffect::NotNeeded,
                };
            }
        };

        if !with_payment {
            return ReferralCredit {
                recorded: true,
                monetary: SideEffect::NotNeeded,
            };
        }

        let monetary = self.issue_credits(&reward, [referrer, referred]).await;
        ReferralCredit {
            recorded: true,
            monetary,
        }
    }

    async fn issue_credits(&self, reward: &ReferralReward, parties: [&User; 2]) -> SideEffect {
        let description = format!("Referral reward ({} days)", reward.credit_days);
        let mut attempted = 0;
        let mut failures = Vec::new();

        for party in parties {
            let Some(customer_id) = party.stripe_customer_id.as_deref() else {
                continue;
            };
            attempted += 1;
            if let Err(e) = self
                .billing
                .credit_customer(customer_id, self.credit_cents, &description)
                .await
            {
                tracing::error!(
                    user_id = %party.id,
                    customer_id,
                    error = %e,
                    "Referral credit failed"
                );
                failures.push(e.to_string());
            }
        }

        if attempted == 0 {
            return SideEffect::NotNeeded;
        }
        if !failures.is_empty() {
            return SideEffect::Failed(failures.join("; "));
        }

        if let Err(e) = self.store.mark_referral_applied(reward.id, Utc::now()).await {
            tracing::error!(reward_id = %reward.id, error = %e, "Failed to mark referral credit applied");
        }
        SideEffect::Succeeded
    }
}
