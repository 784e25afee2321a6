//! Timezone resolution and calendar-day boundaries.
//!
//! Every once-per-day rule (check-ins, desensitization, reminders) goes
//! through this module so that "today" means the same thing everywhere for a
//! given user: the wall-clock calendar date in the resolved IANA zone.

use chrono::{
    DateTime, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::Serialize;

/// Names that all collapse to UTC. A stored, specific zone is never
/// overwritten by one of these.
const UTC_ALIASES: &[&str] = &[
    "UTC",
    "UCT",
    "GMT",
    "GMT0",
    "GMT+0",
    "GMT-0",
    "Greenwich",
    "Universal",
    "Zulu",
    "Etc/UTC",
    "Etc/UCT",
    "Etc/GMT",
    "Etc/GMT0",
    "Etc/GMT+0",
    "Etc/GMT-0",
    "Etc/Greenwich",
    "Etc/Universal",
    "Etc/Zulu",
];

/// Parse an IANA zone name. Unknown or blank names yield `None`.
pub fn parse_zone(name: &str) -> Option<Tz> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<Tz>().ok()
}

/// Pick the authoritative zone: request-supplied, then stored, then UTC.
pub fn resolve_timezone(request_zone: Option<&str>, stored_zone: Option<&str>) -> Tz {
    request_zone
        .and_then(parse_zone)
        .or_else(|| stored_zone.and_then(parse_zone))
        .unwrap_or(Tz::UTC)
}

/// The request-side candidate: the header wins when it names a real zone,
/// otherwise the body field is tried.
pub fn request_zone<'a>(header: Option<&'a str>, body: Option<&'a str>) -> Option<&'a str> {
    header
        .filter(|h| parse_zone(h).is_some())
        .or_else(|| body.filter(|b| parse_zone(b).is_some()))
}

pub fn is_utc_alias(zone: Tz) -> bool {
    UTC_ALIASES.contains(&zone.name())
}

/// Zone value to persist after login/registration, if any.
pub fn refreshed_timezone(stored: Option<&str>, candidate: Option<&str>) -> Option<String> {
    let candidate = candidate.and_then(parse_zone)?;

    match stored.and_then(parse_zone) {
        Some(current) if current == candidate => None,
        Some(current) if is_utc_alias(candidate) && !is_utc_alias(current) => None,
        _ => Some(candidate.name().to_string()),
    }
}

pub fn local_date(instant: DateTime<Utc>, zone: Tz) -> NaiveDate {
    instant.with_timezone(&zone).date_naive()
}

/// Minutes elapsed since local midnight on the wall clock.
pub fn local_minutes(instant: DateTime<Utc>, zone: Tz) -> i64 {
    let local = instant.with_timezone(&zone);
    i64::from(local.hour()) * 60 + i64::from(local.minute())
}

/// First absolute instant of `date` in `zone`.
pub fn start_of_date(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match zone.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight sits inside a forward gap: the date begins at the transition.
        None => gap_transition(date, zone),
    }
}

/// Locate the forward transition that swallows local midnight of `date`.
///
/// Under the pre-gap offset the instant `midnight - after` still shows the
/// previous date, and `midnight - before` already shows `date`; the
/// transition lies between them and is found to the second.
fn gap_transition(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    let offset_at = |naive_utc: NaiveDateTime| {
        i64::from(zone.offset_from_utc_datetime(&naive_utc).fix().local_minus_utc())
    };
    let before = offset_at(midnight - Duration::days(1));
    let after = offset_at(midnight + Duration::days(1));

    let mut lo = Utc.from_utc_datetime(&(midnight - Duration::seconds(after)));
    let mut hi = Utc.from_utc_datetime(&(midnight - Duration::seconds(before)));
    while (hi - lo).num_seconds() > 1 {
        let mid = lo + Duration::seconds((hi - lo).num_seconds() / 2);
        if local_date(mid, zone) >= date {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

pub fn start_of_day(instant: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    start_of_date(local_date(instant, zone), zone)
}

/// One millisecond before the next calendar date starts.
pub fn end_of_day(instant: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
    match local_date(instant, zone).checked_add_days(Days::new(1)) {
        Some(next) => start_of_date(next, zone) - Duration::milliseconds(1),
        None => DateTime::<Utc>::MAX_UTC,
    }
}

pub fn same_local_day(a: DateTime<Utc>, b: DateTime<Utc>, zone: Tz) -> bool {
    local_date(a, zone) == local_date(b, zone)
}

/// The calendar day containing an instant, for dedup queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayWindow {
    pub local_date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn containing(instant: DateTime<Utc>, zone: Tz) -> Self {
        Self {
            local_date: local_date(instant, zone),
            start: start_of_day(instant, zone),
            end: end_of_day(instant, zone),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}
