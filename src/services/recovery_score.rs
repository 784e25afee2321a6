//! Recovery score: one 0-100 progress number from engagement counters.
//!
//! Five weighted components, summed then clamped and rounded:
//!
//! | component       | weight | saturates at                     |
//! |-----------------|--------|----------------------------------|
//! | consistency     | 30     | not capped (see `consistency`)   |
//! | streak trend    | 20     | recent mean >= overall mean      |
//! | tool engagement | 25     | 20 urge surfs, 30 journals, 150 pts |
//! | longevity       | 15     | 90 days since start              |
//! | floor bonus     | 10     | one day won                      |

use serde::Serialize;

const CONSISTENCY_WEIGHT: f64 = 30.0;
const TREND_WEIGHT: f64 = 20.0;
const URGE_SURF_WEIGHT: f64 = 8.0;
const JOURNAL_WEIGHT: f64 = 9.0;
const DESENSITIZATION_WEIGHT: f64 = 8.0;
const LONGEVITY_WEIGHT: f64 = 15.0;

const URGE_SURF_TARGET: f64 = 20.0;
const JOURNAL_TARGET: f64 = 30.0;
const DESENSITIZATION_TARGET: f64 = 150.0;
const LONGEVITY_TARGET_DAYS: f64 = 90.0;

const FLOOR_WITH_WIN: f64 = 10.0;
const FLOOR_WITHOUT_WIN: f64 = 5.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreInputs {
    pub days_won: u32,
    pub days_since_start: u32,
    /// Streak lengths, oldest first.
    pub streak_history: Vec<u32>,
    pub urge_surf_count: u32,
    pub journal_count: u32,
    pub desensitization_points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub consistency: f64,
    pub streak_trend: f64,
    pub tool_engagement: f64,
    pub longevity: f64,
    pub floor_bonus: f64,
    pub score: u8,
}

fn saturating_ratio(value: f64, target: f64) -> f64 {
    (value / target).min(1.0)
}

/// Days won per day elapsed, times 30.
///
/// Not capped at the weight: with `days_won > days_since_start` this exceeds
/// 30 and only the final clamp bounds the total. Kept as-is pending a product
/// decision.
pub fn consistency(days_won: u32, days_since_start: u32) -> f64 {
    f64::from(days_won) / f64::from(days_since_start.max(1)) * CONSISTENCY_WEIGHT
}

pub fn streak_trend(history: &[u32]) -> f64 {
    if history.len() < 2 {
        return TREND_WEIGHT;
    }

    let overall = mean(history);
    if overall == 0.0 {
        return TREND_WEIGHT;
    }

    let recent_len = history.len().div_ceil(2).max(1);
    let recent = mean(&history[history.len() - recent_len..]);

    (recent / overall).min(1.0) * TREND_WEIGHT
}

pub fn tool_engagement(urge_surf_count: u32, journal_count: u32, desensitization_points: u32) -> f64 {
    saturating_ratio(f64::from(urge_surf_count), URGE_SURF_TARGET) * URGE_SURF_WEIGHT
        + saturating_ratio(f64::from(journal_count), JOURNAL_TARGET) * JOURNAL_WEIGHT
        + saturating_ratio(f64::from(desensitization_points), DESENSITIZATION_TARGET)
            * DESENSITIZATION_WEIGHT
}

pub fn longevity(days_since_start: u32) -> f64 {
    saturating_ratio(f64::from(days_since_start), LONGEVITY_TARGET_DAYS) * LONGEVITY_WEIGHT
}

pub fn floor_bonus(days_won: u32) -> f64 {
    if days_won >= 1 {
        FLOOR_WITH_WIN
    } else {
        FLOOR_WITHOUT_WIN
    }
}

fn mean(values: &[u32]) -> f64 {
    let sum: f64 = values.iter().map(|v| f64::from(*v)).sum();
    sum / values.len() as f64
}

pub fn breakdown(inputs: &ScoreInputs) -> ScoreBreakdown {
    let consistency = consistency(inputs.days_won, inputs.days_since_start);
    let streak_trend = streak_trend(&inputs.streak_history);
    let tool_engagement = tool_engagement(
        inputs.urge_surf_count,
        inputs.journal_count,
        inputs.desensitization_points,
    );
    let longevity = longevity(inputs.days_since_start);
    let floor_bonus = floor_bonus(inputs.days_won);

    let total = consistency + streak_trend + tool_engagement + longevity + floor_bonus;
    let score = total.clamp(0.0, 100.0).round() as u8;

    ScoreBreakdown {
        consistency,
        streak_trend,
        tool_engagement,
        longevity,
        floor_bonus,
        score,
    }
}

pub fn recovery_score(inputs: &ScoreInputs) -> u8 {
    breakdown(inputs).score
}
