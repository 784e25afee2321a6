//! Subscription state machine.
//!
//! Both payment providers translate their native webhook vocabulary into
//! [`BillingEvent`] and hand it to [`SubscriptionService::handle_event`]. The
//! decision itself ([`decide`]) is pure; the store re-applies the same guards
//! in its conditional writes ([`AccessState::apply`] is the reference), so two
//! webhooks racing for one user can never move a terminal row.
//!
//! `completed` is terminal. It is reached by a 365-day streak (which also
//! stamps `completed_at`) or by the lifetime one-time purchase.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::UserStore;
use crate::error::AppResult;
use crate::models::user::{SubscriptionStatus, User};
use crate::services::billing::BillingProvider;

/// Streak length that completes the program.
pub const COMPLETION_STREAK_DAYS: i32 = 365;

/// Provider key used to route a webhook to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationKey {
    StripeCustomer(String),
    /// RevenueCat `app_user_id`; either a stored alias or the user id itself.
    RevenueCatAppUser(String),
}

impl CorrelationKey {
    pub fn provider(&self) -> &'static str {
        match self {
            Self::StripeCustomer(_) => "stripe",
            Self::RevenueCatAppUser(_) => "revenuecat",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::StripeCustomer(v) | Self::RevenueCatAppUser(v) => v,
        }
    }
}

/// Provider-agnostic event classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// Subscription activated, renewed or reactivated.
    Activated,
    Trialing,
    /// Subscription canceled or expired.
    Ended,
    BillingFailed,
    LifetimePurchase { product_id: String },
    Unrecognized { kind: String },
}

impl BillingEvent {
    pub fn label(&self) -> &str {
        match self {
            Self::Activated => "activated",
            Self::Trialing => "trialing",
            Self::Ended => "ended",
            Self::BillingFailed => "billing_failed",
            Self::LifetimePurchase { .. } => "lifetime_purchase",
            Self::Unrecognized { kind } => kind,
        }
    }
}

/// A write against the access-granting fields of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    SetStatus { status: SubscriptionStatus },
    Complete { at: DateTime<Utc> },
    PurchaseLifetime,
    ClaimLifetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Terminal,
    Unchanged,
    BillingFailure,
    ProductMismatch,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Apply(Transition),
    Ignore(IgnoreReason),
}

/// The fields the machine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessState {
    pub status: SubscriptionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub lifetime_access: bool,
    pub current_streak: i32,
}

impl AccessState {
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some() || self.status == SubscriptionStatus::Completed
    }

    /// Apply a transition with the guards every store must enforce.
    /// Returns whether anything changed.
    pub fn apply(&mut self, transition: &Transition) -> bool {
        match transition {
            Transition::SetStatus { status } => {
                if self.is_terminal() || self.status == *status {
                    return false;
                }
                self.status = *status;
                true
            }
            Transition::Complete { at } => {
                if self.completed_at.is_some() {
                    return false;
                }
                self.status = SubscriptionStatus::Completed;
                self.completed_at = Some(*at);
                true
            }
            Transition::PurchaseLifetime => {
                if self.is_terminal() {
                    return false;
                }
                self.status = SubscriptionStatus::Completed;
                self.lifetime_access = true;
                true
            }
            Transition::ClaimLifetime => {
                if self.completed_at.is_none() || self.lifetime_access {
                    return false;
                }
                self.lifetime_access = true;
                true
            }
        }
    }
}

/// Next step for an inbound billing event. The terminal guard runs first.
pub fn decide(
    state: &AccessState,
    event: &BillingEvent,
    lifetime_product_ids: &[String],
    now: DateTime<Utc>,
) -> Decision {
    if state.is_terminal() {
        return Decision::Ignore(IgnoreReason::Terminal);
    }

    let set_status = |status: SubscriptionStatus| {
        if state.status == status {
            Decision::Ignore(IgnoreReason::Unchanged)
        } else {
            Decision::Apply(Transition::SetStatus { status })
        }
    };

    match event {
        BillingEvent::Activated => set_status(SubscriptionStatus::Active),
        BillingEvent::Trialing => set_status(SubscriptionStatus::Trialing),
        BillingEvent::Ended if state.current_streak >= COMPLETION_STREAK_DAYS => {
            Decision::Apply(Transition::Complete { at: now })
        }
        BillingEvent::Ended => set_status(SubscriptionStatus::Canceled),
        BillingEvent::BillingFailed => Decision::Ignore(IgnoreReason::BillingFailure),
        BillingEvent::LifetimePurchase { product_id } => {
            if lifetime_product_ids.iter().any(|p| p == product_id) {
                Decision::Apply(Transition::PurchaseLifetime)
            } else {
                Decision::Ignore(IgnoreReason::ProductMismatch)
            }
        }
        BillingEvent::Unrecognized { .. } => Decision::Ignore(IgnoreReason::Unrecognized),
    }
}

/// Result of a best-effort call made alongside a committed primary write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SideEffect {
    NotNeeded,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    UserNotFound,
    Ignored(IgnoreReason),
    /// The decision held but the store's guard refused the write; another
    /// delivery got there first.
    Superseded,
    Applied {
        user_id: Uuid,
        transition: Transition,
        side_effect: SideEffect,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LifetimeGrant {
    Granted { side_effect: SideEffect },
    AlreadyGranted,
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn UserStore>,
    billing: Arc<dyn BillingProvider>,
    lifetime_product_ids: Arc<[String]>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn UserStore>,
        billing: Arc<dyn BillingProvider>,
        lifetime_product_ids: Vec<String>,
    ) -> Self {
        Self {
            store,
            billing,
            lifetime_product_ids: lifetime_product_ids.into(),
        }
    }

    /// Route a provider event to its user and apply it.
    ///
    /// Unknown users and ignorable events are not errors: webhook senders
    /// retry anything that is not a 2xx.
    pub async fn handle_event(
        &self,
        key: &CorrelationKey,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> AppResult<EventOutcome> {
        let Some(user) = self.store.find_by_correlation(key).await? else {
            tracing::warn!(
                provider = key.provider(),
                key = key.value(),
                event = event.label(),
                "Billing event for unknown user, ignoring"
            );
            return Ok(EventOutcome::UserNotFound);
        };

        let transition = match decide(&user.access_state(), event, &self.lifetime_product_ids, now) {
            Decision::Apply(transition) => transition,
            Decision::Ignore(reason) => {
                if reason == IgnoreReason::BillingFailure {
                    tracing::warn!(
                        user_id = %user.id,
                        provider = key.provider(),
                        "Billing failure reported; status left unchanged"
                    );
                } else {
                    tracing::debug!(
                        user_id = %user.id,
                        provider = key.provider(),
                        event = event.label(),
                        reason = ?reason,
                        "Billing event ignored"
                    );
                }
                return Ok(EventOutcome::Ignored(reason));
            }
        };

        if !self.store.apply_transition(user.id, &transition).await? {
            tracing::info!(user_id = %user.id, ?transition, "Transition superseded by concurrent write");
            return Ok(EventOutcome::Superseded);
        }

        tracing::info!(
            user_id = %user.id,
            provider = key.provider(),
            event = event.label(),
            ?transition,
            "Subscription transition applied"
        );

        let side_effect = match transition {
            Transition::PurchaseLifetime => self.cancel_upstream(&user).await,
            _ => SideEffect::NotNeeded,
        };

        Ok(EventOutcome::Applied {
            user_id: user.id,
            transition,
            side_effect,
        })
    }

    /// Streak-completion path. Wins over any billing state once the streak
    /// reaches [`COMPLETION_STREAK_DAYS`]; returns whether the row changed.
    pub async fn complete_streak(
        &self,
        user_id: Uuid,
        current_streak: i32,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        if current_streak < COMPLETION_STREAK_DAYS {
            return Ok(false);
        }

        let changed = self
            .store
            .apply_transition(user_id, &Transition::Complete { at: now })
            .await?;
        if changed {
            tracing::info!(user_id = %user_id, current_streak, "Program completed");
        }
        Ok(changed)
    }

    /// Set `lifetime_access` for a user who already completed. Callers check
    /// eligibility; the store re-checks `completed_at`.
    pub async fn grant_lifetime(&self, user: &User) -> AppResult<LifetimeGrant> {
        if user.lifetime_access {
            return Ok(LifetimeGrant::AlreadyGranted);
        }

        if !self.store.grant_lifetime(user.id).await? {
            return Ok(LifetimeGrant::AlreadyGranted);
        }

        tracing::info!(user_id = %user.id, "Lifetime access granted");
        let side_effect = self.cancel_upstream(user).await;
        Ok(LifetimeGrant::Granted { side_effect })
    }

    /// Stop recurring billing once access no longer depends on it.
    /// Failure is logged and reported, never propagated.
    async fn cancel_upstream(&self, user: &User) -> SideEffect {
        let Some(subscription_id) = user.stripe_subscription_id.as_deref() else {
            return SideEffect::NotNeeded;
        };

        match self.billing.cancel_subscription(subscription_id).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, subscription_id, "Recurring subscription canceled");
                SideEffect::Succeeded
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user.id,
                    subscription_id,
                    error = %e,
                    "Failed to cancel recurring subscription after lifetime grant"
                );
                SideEffect::Failed(e.to_string())
            }
        }
    }
}
