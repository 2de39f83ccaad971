//! Mastery Estimator
//!
//! Recency-weighted correctness over a learner's recent attempts on one
//! objective, with a normal-approximation confidence interval.

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MasteryParams;
use crate::types::{Attempt, ObjectiveId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryLevel {
    InsufficientData,
    Beginner,
    Developing,
    Proficient,
    Advanced,
    Expert,
}

impl MasteryLevel {
    pub fn from_mastery(mastery: f64) -> Self {
        if mastery < 31.0 {
            Self::Beginner
        } else if mastery < 61.0 {
            Self::Developing
        } else if mastery < 81.0 {
            Self::Proficient
        } else if mastery < 96.0 {
            Self::Advanced
        } else {
            Self::Expert
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::InsufficientData => "Insufficient Data",
            Self::Beginner => "Beginner",
            Self::Developing => "Developing",
            Self::Proficient => "Proficient",
            Self::Advanced => "Advanced",
            Self::Expert => "Expert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub objective_id: ObjectiveId,
    /// 0-100
    pub mastery: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub level: MasteryLevel,
    pub sample_size: usize,
    /// Attempts still needed for a minimum (sparse) or reliable (dense) estimate.
    pub questions_needed: usize,
}

impl MasteryRecord {
    pub fn insufficient(objective_id: impl Into<ObjectiveId>, count: usize, min: usize) -> Self {
        Self {
            objective_id: objective_id.into(),
            mastery: 0.0,
            ci_lower: 0.0,
            ci_upper: 0.0,
            level: MasteryLevel::InsufficientData,
            sample_size: count,
            questions_needed: min.saturating_sub(count),
        }
    }

    pub fn has_data(&self) -> bool {
        self.level != MasteryLevel::InsufficientData
    }
}

/// Attempts on `objective_id` inside the window, newest first, capped.
pub fn recent_window<'a>(
    objective_id: &str,
    attempts: &'a [Attempt],
    now: DateTime<Utc>,
    params: &MasteryParams,
) -> Vec<&'a Attempt> {
    let since = now - Duration::days(params.window_days);
    let mut window: Vec<&Attempt> = attempts
        .iter()
        .filter(|a| a.objective_id == objective_id)
        .filter(|a| a.answered_at >= since && a.answered_at <= now)
        .collect();
    window.sort_by(|a, b| b.answered_at.cmp(&a.answered_at));
    window.truncate(params.max_attempts);
    window
}

/// Weighted correct fraction in [0, 1]; index 0 is the most recent outcome.
pub fn recency_weighted_accuracy(outcomes_newest_first: &[bool], decay: f64) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (i, correct) in outcomes_newest_first.iter().enumerate() {
        let w = (-decay * i as f64).exp();
        total += w;
        if *correct {
            weighted += w;
        }
    }
    if total <= 0.0 {
        0.0
    } else {
        weighted / total
    }
}

pub fn estimate_mastery(
    objective_id: &str,
    attempts: &[Attempt],
    now: DateTime<Utc>,
    params: &MasteryParams,
) -> MasteryRecord {
    let window = recent_window(objective_id, attempts, now, params);
    let n = window.len();

    if n < params.min_attempts {
        tracing::trace!(objective_id, n, "mastery: insufficient data");
        return MasteryRecord::insufficient(objective_id, n, params.min_attempts);
    }

    let outcomes: Vec<bool> = window.iter().map(|a| a.is_correct).collect();
    let mastery = (100.0 * recency_weighted_accuracy(&outcomes, params.recency_decay))
        .clamp(0.0, 100.0);

    let margin = params.z_score * (mastery * (100.0 - mastery) / n as f64).sqrt();
    let ci_lower = (mastery - margin).clamp(0.0, 100.0);
    let ci_upper = (mastery + margin).clamp(0.0, 100.0);

    MasteryRecord {
        objective_id: objective_id.to_string(),
        mastery,
        ci_lower,
        ci_upper,
        level: MasteryLevel::from_mastery(mastery),
        sample_size: n,
        questions_needed: params.reliable_attempts.saturating_sub(n),
    }
}

/// Estimates every objective independently and in parallel.
pub fn estimate_mastery_batch(
    objective_ids: &[ObjectiveId],
    attempts: &[Attempt],
    now: DateTime<Utc>,
    params: &MasteryParams,
) -> Vec<MasteryRecord> {
    objective_ids
        .par_iter()
        .map(|id| estimate_mastery(id, attempts, now, params))
        .collect()
}
