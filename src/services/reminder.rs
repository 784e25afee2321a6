//! Daily reminder sweep.
//!
//! Runs every `REMINDER_SWEEP_SECS`. A user is due when their local wall
//! clock sits in `[reminder_time, reminder_time + window)` and they have not
//! checked in on today's local date. The window equals the sweep period, so
//! each reminder time is hit by exactly one sweep per day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::Serialize;
use serde_json::json;

use crate::db::UserStore;
use crate::error::AppResult;
use crate::models::user::User;
use crate::services::clock;
use crate::services::push::{PushGateway, PushOutcome};

const MINUTES_PER_DAY: i64 = 24 * 60;

const REMINDER_TITLE: &str = "Time to check in";
const REMINDER_BODY: &str = "Take a minute to log today and keep your streak alive.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderDecision {
    Send,
    OutsideWindow,
    AlreadyCheckedIn,
}

/// Parse a stored `HH:MM` reminder time.
pub fn parse_reminder_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

pub fn reminder_decision(
    now: DateTime<Utc>,
    zone: chrono_tz::Tz,
    reminder_time: NaiveTime,
    last_check_in: Option<DateTime<Utc>>,
    window_minutes: i64,
) -> ReminderDecision {
    if last_check_in.is_some_and(|at| clock::same_local_day(at, now, zone)) {
        return ReminderDecision::AlreadyCheckedIn;
    }

    let target = i64::from(reminder_time.hour()) * 60 + i64::from(reminder_time.minute());
    let diff = (clock::local_minutes(now, zone) - target).rem_euclid(MINUTES_PER_DAY);

    if diff < window_minutes {
        ReminderDecision::Send
    } else {
        ReminderDecision::OutsideWindow
    }
}

fn is_candidate(user: &User) -> bool {
    user.push_token.is_some() && user.reminder_time.is_some() && user.has_access()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub sent: usize,
    pub outside_window: usize,
    pub already_checked_in: usize,
    pub invalid_settings: usize,
    pub stale_tokens_cleared: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    store: Arc<dyn UserStore>,
    push: Arc<dyn PushGateway>,
    window_minutes: i64,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn UserStore>, push: Arc<dyn PushGateway>, window_minutes: i64) -> Self {
        Self {
            store,
            push,
            window_minutes,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();

        for user in self.store.reminder_candidates().await? {
            if !is_candidate(&user) {
                continue;
            }
            report.candidates += 1;

            let (Some(token), Some(reminder_time)) = (
                user.push_token.as_deref(),
                user.reminder_time.as_deref().and_then(parse_reminder_time),
            ) else {
                tracing::warn!(user_id = %user.id, "Unparseable reminder time, skipping");
                report.invalid_settings += 1;
                continue;
            };

            // No request context in the background: stored zone or UTC.
            let zone = clock::resolve_timezone(None, user.timezone.as_deref());
            match reminder_decision(now, zone, reminder_time, user.last_check_in, self.window_minutes) {
                ReminderDecision::OutsideWindow => {
                    report.outside_window += 1;
                    continue;
                }
                ReminderDecision::AlreadyCheckedIn => {
                    report.already_checked_in += 1;
                    continue;
                }
                ReminderDecision::Send => {}
            }

            let data = json!({ "type": "daily_reminder" });
            match self.push.send(token, REMINDER_TITLE, REMINDER_BODY, data).await {
                PushOutcome::Delivered => report.sent += 1,
                PushOutcome::StaleToken => {
                    tracing::info!(user_id = %user.id, "Push token no longer registered, clearing");
                    match self.store.clear_push_token(user.id).await {
                        Ok(()) => report.stale_tokens_cleared += 1,
                        Err(e) => {
                            tracing::error!(user_id = %user.id, error = %e, "Failed to clear push token")
                        }
                    }
                }
                PushOutcome::Failed(reason) => {
                    tracing::warn!(user_id = %user.id, reason = %reason, "Reminder delivery failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Start the periodic sweep on the runtime.
pub fn spawn_reminder_worker(scheduler: ReminderScheduler, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match scheduler.sweep(Utc::now()).await {
                Ok(report) => {
                    if report.candidates > 0 {
                        tracing::info!(
                            candidates = report.candidates,
                            sent = report.sent,
                            already_checked_in = report.already_checked_in,
                            stale_tokens_cleared = report.stale_tokens_cleared,
                            failed = report.failed,
                            "Reminder sweep finished"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reminder sweep error");
                }
            }
        }
    });
}
