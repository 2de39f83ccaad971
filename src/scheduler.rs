//! Spaced-Repetition Scheduler (modified SM-2)
//!
//! - Incorrect: level resets to 1, easiness drops by the lapse penalty, review in one day
//! - Correct: level = min(streak + 2, 6), easiness moves by the SM-2 quality delta
//! - Interval = base[level] * easiness, jittered to spread reviews out

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SchedulerParams;
use crate::error::{EngineError, Result};
use crate::types::{Attempt, ReviewSchedule, MAX_QUALITY, MIN_QUALITY};

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 6;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub schedule: ReviewSchedule,
    /// Interval before jitter.
    pub base_interval_days: f64,
    pub interval_days: f64,
}

/// SM-2 easiness adjustment; q=5 gives +0.1, q=4 leaves it, lower q shrinks it.
pub fn easiness_delta(quality: u8) -> f64 {
    let q = quality.clamp(MIN_QUALITY, MAX_QUALITY) as f64;
    let miss = 5.0 - q;
    0.1 - miss * (0.08 + miss * 0.02)
}

pub fn level_for_streak(correct_streak: u32) -> u8 {
    let level = correct_streak.saturating_add(2).min(MAX_LEVEL as u32);
    level as u8
}

pub fn base_interval_days(level: u8, easiness: f64, params: &SchedulerParams) -> f64 {
    let idx = (level.clamp(MIN_LEVEL, MAX_LEVEL) - 1) as usize;
    params.base_intervals[idx] * easiness
}

pub fn schedule_review<R: Rng + ?Sized>(
    attempt: &Attempt,
    prior: Option<&ReviewSchedule>,
    params: &SchedulerParams,
    rng: &mut R,
) -> Result<ReviewOutcome> {
    attempt.validate()?;
    if let Some(prev) = prior {
        if prev.learner_id != attempt.learner_id || prev.question_id != attempt.question_id {
            return Err(EngineError::InvalidAttempt(format!(
                "schedule for ({}, {}) does not match attempt ({}, {})",
                prev.learner_id, prev.question_id, attempt.learner_id, attempt.question_id
            )));
        }
    }

    let prev_easiness = prior
        .map(|p| p.easiness)
        .unwrap_or(params.initial_easiness)
        .max(params.min_easiness);
    let prev_streak = prior.map(|p| p.correct_streak).unwrap_or(0);

    let (level, easiness, streak, base_interval) = if attempt.is_correct {
        let streak = prev_streak.saturating_add(1);
        let level = level_for_streak(streak);
        let easiness = (prev_easiness + easiness_delta(attempt.quality)).max(params.min_easiness);
        (level, easiness, streak, base_interval_days(level, easiness, params))
    } else {
        let easiness = (prev_easiness - params.lapse_penalty).max(params.min_easiness);
        (MIN_LEVEL, easiness, 0, params.base_intervals[0])
    };

    let jitter = if params.jitter_max > params.jitter_min {
        rng.gen_range(params.jitter_min..=params.jitter_max)
    } else {
        1.0
    };
    let interval_days = base_interval * jitter;
    let now = attempt.answered_at;
    let next_review_at = now + Duration::milliseconds((interval_days * MILLIS_PER_DAY).round() as i64);

    tracing::debug!(
        learner_id = %attempt.learner_id,
        question_id = %attempt.question_id,
        correct = attempt.is_correct,
        interval_level = level,
        easiness,
        interval_days,
        "review scheduled"
    );

    Ok(ReviewOutcome {
        schedule: ReviewSchedule {
            learner_id: attempt.learner_id.clone(),
            question_id: attempt.question_id.clone(),
            easiness,
            interval_level: level,
            next_review_at,
            correct_streak: streak,
            review_count: prior.map(|p| p.review_count).unwrap_or(0) + 1,
            last_reviewed_at: now,
        },
        base_interval_days: base_interval,
        interval_days,
    })
}

/// Due rows, earliest first.
pub fn due_reviews(schedules: &[ReviewSchedule], now: DateTime<Utc>) -> Vec<&ReviewSchedule> {
    let mut due: Vec<&ReviewSchedule> = schedules.iter().filter(|s| s.is_due(now)).collect();
    due.sort_by(|a, b| a.next_review_at.cmp(&b.next_review_at));
    due
}
