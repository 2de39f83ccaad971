use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub type LearnerId = String;
pub type QuestionId = String;
pub type ObjectiveId = String;
pub type ExamId = String;

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 5;
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 5.0;
pub const DEFAULT_PASSING_SCORE: f64 = 65.0;
pub const DEFAULT_MIN_QUESTIONS_PER_OBJECTIVE: u32 = 3;
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// One graded answer. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub learner_id: LearnerId,
    pub question_id: QuestionId,
    pub objective_id: ObjectiveId,
    pub is_correct: bool,
    /// Ordinal 1-5 fed to the scheduler.
    pub quality: u8,
    pub time_spent_secs: u32,
    pub answered_at: DateTime<Utc>,
}

impl Attempt {
    pub fn validate(&self) -> Result<()> {
        if self.learner_id.is_empty() {
            return Err(EngineError::InvalidAttempt("empty learner id".into()));
        }
        if self.question_id.is_empty() {
            return Err(EngineError::InvalidAttempt("empty question id".into()));
        }
        if !(MIN_QUALITY..=MAX_QUALITY).contains(&self.quality) {
            return Err(EngineError::InvalidAttempt(format!(
                "quality {} outside {MIN_QUALITY}..={MAX_QUALITY}",
                self.quality
            )));
        }
        Ok(())
    }

    /// Checks the attempt against the question bank before anything is computed from it.
    /// `LearningEngine::record_answer` calls this; callers of the lower-level
    /// `record_review` or `schedule_review` must call it themselves.
    pub fn validate_against(&self, questions: &[QuestionMeta]) -> Result<()> {
        self.validate()?;
        let question = questions
            .iter()
            .find(|q| q.id == self.question_id)
            .ok_or_else(|| EngineError::UnknownQuestion(self.question_id.clone()))?;
        if question.objective_id != self.objective_id {
            return Err(EngineError::InvalidAttempt(format!(
                "question {} belongs to objective {}, not {}",
                question.id, question.objective_id, self.objective_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    pub id: ObjectiveId,
    /// Scoring weight in its blueprint, 0-1.
    pub weight: f64,
}

/// Read-only question metadata supplied by the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMeta {
    pub id: QuestionId,
    pub exam_id: ExamId,
    pub objective_id: ObjectiveId,
    /// 1 (easiest) to 5 (hardest).
    pub difficulty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrimination: Option<f64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamBlueprint {
    pub exam_id: ExamId,
    pub objective_weights: BTreeMap<ObjectiveId, f64>,
    #[serde(default = "default_passing_score")]
    pub passing_score: f64,
    #[serde(default = "default_min_questions")]
    pub min_questions_per_objective: u32,
}

fn default_passing_score() -> f64 {
    DEFAULT_PASSING_SCORE
}

fn default_min_questions() -> u32 {
    DEFAULT_MIN_QUESTIONS_PER_OBJECTIVE
}

impl ExamBlueprint {
    pub fn new(exam_id: impl Into<ExamId>, weights: &[(&str, f64)]) -> Self {
        Self {
            exam_id: exam_id.into(),
            objective_weights: weights
                .iter()
                .map(|(id, w)| (id.to_string(), *w))
                .collect(),
            passing_score: DEFAULT_PASSING_SCORE,
            min_questions_per_objective: DEFAULT_MIN_QUESTIONS_PER_OBJECTIVE,
        }
    }

    pub fn objectives(&self) -> Vec<Objective> {
        self.objective_weights
            .iter()
            .map(|(id, weight)| Objective {
                id: id.clone(),
                weight: *weight,
            })
            .collect()
    }

    pub fn weight_of(&self, objective_id: &str) -> Option<f64> {
        self.objective_weights.get(objective_id).copied()
    }

    pub fn validate(&self) -> Result<()> {
        if self.objective_weights.is_empty() {
            return Err(EngineError::InvalidBlueprint(format!(
                "{} has no objectives",
                self.exam_id
            )));
        }
        for (id, weight) in &self.objective_weights {
            if !weight.is_finite() || !(0.0..=1.0).contains(weight) {
                return Err(EngineError::InvalidBlueprint(format!(
                    "objective {id} has weight {weight} outside 0..=1"
                )));
            }
        }
        let sum: f64 = self.objective_weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::InvalidBlueprint(format!(
                "weights of {} sum to {sum:.3}, expected 1.0",
                self.exam_id
            )));
        }
        if !self.passing_score.is_finite() || !(0.0..=100.0).contains(&self.passing_score) {
            return Err(EngineError::InvalidBlueprint(format!(
                "passing score {} outside 0..=100",
                self.passing_score
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveTally {
    pub correct: u32,
    pub total: u32,
}

impl ObjectiveTally {
    pub fn record(&mut self, is_correct: bool) {
        self.total += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    pub fn percent(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(100.0 * self.correct as f64 / self.total as f64)
        }
    }
}

/// One finalized simulated exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub learner_id: LearnerId,
    pub exam_id: ExamId,
    pub objective_tallies: BTreeMap<ObjectiveId, ObjectiveTally>,
    /// Weighted score 0-100, one decimal.
    pub score: f64,
    pub passed: bool,
    /// Objectives answered fewer times than the blueprint minimum.
    #[serde(default)]
    pub low_sample_objectives: Vec<ObjectiveId>,
    pub completed_at: DateTime<Utc>,
}

/// Review state of one (learner, question) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSchedule {
    pub learner_id: LearnerId,
    pub question_id: QuestionId,
    pub easiness: f64,
    /// 1-6, indexes the base interval table.
    pub interval_level: u8,
    pub next_review_at: DateTime<Utc>,
    /// Consecutive correct attempts ending at the last review.
    pub correct_streak: u32,
    pub review_count: u32,
    pub last_reviewed_at: DateTime<Utc>,
}

impl ReviewSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at <= now
    }
}

/// Per-learner gamification state. Level is derived from `total_xp`, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionState {
    pub learner_id: LearnerId,
    pub total_xp: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Last local date that met the daily question goal.
    pub last_qualifying_date: Option<NaiveDate>,
    /// Local date the running question tally belongs to.
    pub tally_date: Option<NaiveDate>,
    pub tally_questions: u32,
    pub freeze_credits: u32,
    /// Learner's UTC offset used to derive local calendar dates.
    pub utc_offset_minutes: i32,
}

impl ProgressionState {
    pub fn new(learner_id: impl Into<LearnerId>) -> Self {
        Self {
            learner_id: learner_id.into(),
            total_xp: 0,
            current_streak: 0,
            longest_streak: 0,
            last_qualifying_date: None,
            tally_date: None,
            tally_questions: 0,
            freeze_credits: 0,
            utc_offset_minutes: 0,
        }
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }
}

/// Paid features that alter progression rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    pub xp_bonus: bool,
    pub streak_freeze: bool,
}
