//! `LearningEngine`: the stateful facade a host service embeds.
//!
//! Owns the configuration plus two versioned stores (review schedules and
//! progression state). Every read-modify-write goes through the store's
//! optimistic retry loop, so concurrent writers for one learner never lose an
//! update. Everything else delegates to the pure functions in sibling modules.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::mastery::{estimate_mastery_batch, MasteryRecord};
use crate::progression::{self, ActivityEvent, ActivityKind, LevelProgress, ProgressionOutcome};
use crate::readiness::{self, ReadinessInput, ReadinessSnapshot};
use crate::scheduler::{self, ReviewOutcome};
use crate::scoring::{self, AnswerKey, SubmittedAnswer};
use crate::selector::{self, Selection, SelectionRequest};
use crate::store::VersionedStore;
use crate::types::{
    Attempt, Entitlements, ExamBlueprint, LearnerId, ProgressionState, QuestionId, QuestionMeta,
    ReviewSchedule, TestResult,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReviewKey {
    pub learner_id: LearnerId,
    pub question_id: QuestionId,
}

impl ReviewKey {
    pub fn new(learner_id: impl Into<LearnerId>, question_id: impl Into<QuestionId>) -> Self {
        Self {
            learner_id: learner_id.into(),
            question_id: question_id.into(),
        }
    }
}

impl fmt::Display for ReviewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.learner_id, self.question_id)
    }
}

/// Everything that changed because one answer was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecorded {
    pub review: ReviewOutcome,
    pub progression: ProgressionOutcome,
}

#[derive(Debug, Default)]
pub struct LearningEngine {
    config: EngineConfig,
    reviews: VersionedStore<ReviewKey, ReviewSchedule>,
    progression: VersionedStore<LearnerId, ProgressionState>,
}

impl LearningEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            reviews: VersionedStore::new(),
            progression: VersionedStore::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn max_retries(&self) -> u32 {
        self.config.store.max_cas_retries
    }

    // ==================== Reviews ====================

    /// Schedules the next review of one (learner, question) pair.
    ///
    /// Only checks the attempt itself; use `record_answer` when the question
    /// bank is at hand.
    pub fn record_review<R: Rng + ?Sized>(
        &self,
        attempt: &Attempt,
        rng: &mut R,
    ) -> Result<ReviewOutcome> {
        let key = ReviewKey::new(attempt.learner_id.as_str(), attempt.question_id.as_str());
        let params = &self.config.scheduler;
        let (_, outcome) = self.reviews.update(&key, self.max_retries(), |prior| {
            let outcome = scheduler::schedule_review(attempt, prior, params, &mut *rng)?;
            Ok((outcome.schedule.clone(), outcome))
        })?;
        Ok(outcome)
    }

    pub fn review_schedule(&self, learner_id: &str, question_id: &str) -> Option<ReviewSchedule> {
        self.reviews
            .get(&ReviewKey::new(learner_id, question_id))
            .map(|row| row.value)
    }

    pub fn learner_schedules(&self, learner_id: &str) -> Vec<ReviewSchedule> {
        self.reviews.values_where(|key| key.learner_id == learner_id)
    }

    /// Due reviews for one learner, earliest first.
    pub fn due_reviews(&self, learner_id: &str, now: DateTime<Utc>) -> Vec<ReviewSchedule> {
        let schedules = self.learner_schedules(learner_id);
        scheduler::due_reviews(&schedules, now)
            .into_iter()
            .cloned()
            .collect()
    }

    // ==================== Progression ====================

    pub fn progression(&self, learner_id: &str) -> ProgressionState {
        self.progression
            .get(&learner_id.to_string())
            .map(|row| row.value)
            .unwrap_or_else(|| ProgressionState::new(learner_id))
    }

    pub fn level_progress(&self, learner_id: &str) -> LevelProgress {
        progression::level_progress(self.progression(learner_id).total_xp)
    }

    pub fn set_utc_offset(&self, learner_id: &str, minutes: i32) -> Result<ProgressionState> {
        let (state, _) = self
            .progression
            .update(&learner_id.to_string(), self.max_retries(), |current| {
                let state = current
                    .cloned()
                    .unwrap_or_else(|| ProgressionState::new(learner_id))
                    .with_utc_offset(minutes);
                Ok((state, ()))
            })?;
        Ok(state)
    }

    pub fn apply_activity(
        &self,
        learner_id: &str,
        event: &ActivityEvent,
        entitlements: &Entitlements,
    ) -> Result<ProgressionOutcome> {
        let params = &self.config.progression;
        let (_, outcome) = self
            .progression
            .update(&learner_id.to_string(), self.max_retries(), |current| {
                let fresh;
                let state = match current {
                    Some(state) => state,
                    None => {
                        fresh = ProgressionState::new(learner_id);
                        &fresh
                    }
                };
                let outcome = progression::apply_activity(state, event, entitlements, params);
                Ok((outcome.state.clone(), outcome))
            })?;
        Ok(outcome)
    }

    pub fn grant_freeze_credits(
        &self,
        learner_id: &str,
        credits: u32,
        entitlements: &Entitlements,
    ) -> Result<ProgressionState> {
        let (state, _) = self
            .progression
            .update(&learner_id.to_string(), self.max_retries(), |current| {
                let base = current
                    .cloned()
                    .unwrap_or_else(|| ProgressionState::new(learner_id));
                Ok((progression::grant_freeze_credits(&base, credits, entitlements), ()))
            })?;
        Ok(state)
    }

    /// Schedules the review and awards progression for one answer.
    ///
    /// The attempt is checked against `questions` before anything is written.
    /// `first_try` distinguishes a first-try correct answer from a correct
    /// retry; it is ignored for incorrect answers.
    ///
    /// The two rows commit separately: the review first, then progression. If
    /// the progression update fails (only `RetriesExhausted` is possible once
    /// validation passed) the review stays recorded and the error is returned;
    /// finish the answer with `apply_activity` rather than calling this again,
    /// which would schedule the review twice.
    pub fn record_answer<R: Rng + ?Sized>(
        &self,
        attempt: &Attempt,
        questions: &[QuestionMeta],
        first_try: bool,
        entitlements: &Entitlements,
        rng: &mut R,
    ) -> Result<AnswerRecorded> {
        attempt.validate_against(questions)?;
        let review = self.record_review(attempt, rng)?;
        let kind = match (attempt.is_correct, first_try) {
            (true, true) => ActivityKind::FirstTryCorrect,
            (true, false) => ActivityKind::RetryCorrect,
            (false, _) => ActivityKind::AnswerIncorrect,
        };
        let event = ActivityEvent::new(kind, attempt.answered_at);
        let progression = self.apply_activity(&attempt.learner_id, &event, entitlements)?;
        Ok(AnswerRecorded {
            review,
            progression,
        })
    }

    // ==================== Pure pass-throughs ====================

    /// Mastery for every objective in the blueprint, in blueprint order.
    pub fn mastery_for_exam(
        &self,
        blueprint: &ExamBlueprint,
        attempts: &[Attempt],
        now: DateTime<Utc>,
    ) -> Vec<MasteryRecord> {
        let objective_ids: Vec<_> = blueprint.objective_weights.keys().cloned().collect();
        estimate_mastery_batch(&objective_ids, attempts, now, &self.config.mastery)
    }

    pub fn select_next_question<R: Rng + ?Sized>(
        &self,
        request: &SelectionRequest<'_>,
        rng: &mut R,
    ) -> Option<Selection> {
        selector::select_next_question(request, &self.config.selector, rng)
    }

    pub fn score_exam(
        &self,
        learner_id: &str,
        answers: &[SubmittedAnswer],
        key: &[AnswerKey],
        blueprint: &ExamBlueprint,
        completed_at: DateTime<Utc>,
    ) -> Result<TestResult> {
        scoring::score_exam(learner_id, answers, key, blueprint, completed_at)
    }

    pub fn assess_readiness(&self, input: &ReadinessInput<'_>) -> Result<ReadinessSnapshot> {
        readiness::assess_readiness(input, &self.config.readiness)
    }
}
