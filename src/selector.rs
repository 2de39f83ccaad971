//! Adaptive Question Selector
//!
//! Steers target difficulty from recent accuracy, occasionally serves a due
//! review, otherwise draws a new question weighted by expected learning value.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SelectorParams;
use crate::mastery::MasteryRecord;
use crate::types::{
    Attempt, QuestionId, QuestionMeta, ReviewSchedule, MAX_DIFFICULTY, MIN_DIFFICULTY,
};

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    /// Due spaced-repetition review.
    Review,
    /// New question inside the difficulty band.
    New,
    /// New question after the difficulty band was dropped.
    Widened,
    /// Any active question for the exam.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub question_id: QuestionId,
    pub source: SelectionSource,
    /// Adjusted target the caller should carry into the next request.
    pub target_difficulty: f64,
}

/// Everything the selector reads; all of it is pre-fetched by the caller.
#[derive(Debug, Clone)]
pub struct SelectionRequest<'a> {
    pub exam_id: &'a str,
    pub objective_filter: Option<&'a str>,
    pub current_difficulty: f64,
    /// The learner's attempts across all objectives.
    pub recent_attempts: &'a [Attempt],
    /// Question ids shown to the learner, newest first.
    pub recently_shown: &'a [QuestionId],
    pub last_shown_at: &'a HashMap<QuestionId, DateTime<Utc>>,
    pub questions: &'a [QuestionMeta],
    pub schedules: &'a [ReviewSchedule],
    pub mastery: &'a [MasteryRecord],
    pub now: DateTime<Utc>,
}

pub fn recent_accuracy(attempts: &[Attempt], window: usize) -> Option<f64> {
    let mut recent: Vec<&Attempt> = attempts.iter().collect();
    recent.sort_by(|a, b| b.answered_at.cmp(&a.answered_at));
    recent.truncate(window);
    if recent.is_empty() {
        return None;
    }
    let correct = recent.iter().filter(|a| a.is_correct).count();
    Some(correct as f64 / recent.len() as f64)
}

pub fn adjust_difficulty(current: f64, accuracy: Option<f64>, params: &SelectorParams) -> f64 {
    let current = current.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
    match accuracy {
        Some(acc) if acc > params.raise_above => {
            (current + params.difficulty_step).min(MAX_DIFFICULTY)
        }
        Some(acc) if acc < params.lower_below => {
            (current - params.difficulty_step).max(MIN_DIFFICULTY)
        }
        _ => current,
    }
}

pub fn learning_value(
    question: &QuestionMeta,
    mastery_by_objective: &HashMap<&str, f64>,
    last_shown_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    params: &SelectorParams,
) -> f64 {
    let mut value = 1.0;

    let mastery = mastery_by_objective
        .get(question.objective_id.as_str())
        .copied()
        .unwrap_or(0.0);
    if mastery < params.weak_mastery {
        value *= params.weak_boost;
    }

    if question
        .discrimination
        .is_some_and(|d| d > params.discrimination_threshold)
    {
        value *= params.discrimination_boost;
    }

    let recency = match last_shown_at {
        None => 1.0,
        Some(shown) => {
            let days = ((now - shown).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);
            (days / params.recency_days).min(1.0)
        }
    };

    value * recency
}

fn matches_scope(question: &QuestionMeta, exam_id: &str, filter: Option<&str>) -> bool {
    question.active
        && question.exam_id == exam_id
        && filter.map_or(true, |f| question.objective_id == f)
}

fn near(difficulty: f64, target: f64, band: f64) -> bool {
    (difficulty - target).abs() <= band + f64::EPSILON
}

fn pick_review<'a>(
    request: &SelectionRequest<'a>,
    by_id: &HashMap<&str, &'a QuestionMeta>,
    target: f64,
    band: f64,
) -> Option<QuestionId> {
    let mut due: Vec<(&ReviewSchedule, &QuestionMeta)> = request
        .schedules
        .iter()
        .filter(|s| s.is_due(request.now))
        .filter_map(|s| by_id.get(s.question_id.as_str()).map(|q| (s, *q)))
        .filter(|(_, q)| matches_scope(q, request.exam_id, request.objective_filter))
        .collect();
    if due.is_empty() {
        return None;
    }
    due.sort_by(|a, b| a.0.next_review_at.cmp(&b.0.next_review_at));

    due.iter()
        .find(|(_, q)| near(q.difficulty, target, band))
        .or_else(|| due.first())
        .map(|(s, _)| s.question_id.clone())
}

fn has_due_review(request: &SelectionRequest<'_>, by_id: &HashMap<&str, &QuestionMeta>) -> bool {
    request.schedules.iter().any(|s| {
        s.is_due(request.now)
            && by_id
                .get(s.question_id.as_str())
                .is_some_and(|q| matches_scope(q, request.exam_id, request.objective_filter))
    })
}

fn weighted_draw<'a, R: Rng + ?Sized>(
    pool: &[&'a QuestionMeta],
    request: &SelectionRequest<'_>,
    mastery_by_objective: &HashMap<&str, f64>,
    params: &SelectorParams,
    rng: &mut R,
) -> Option<&'a QuestionMeta> {
    let weights: Vec<f64> = pool
        .iter()
        .map(|q| {
            learning_value(
                q,
                mastery_by_objective,
                request.last_shown_at.get(&q.id).copied(),
                request.now,
                params,
            )
        })
        .collect();

    match WeightedIndex::new(&weights) {
        Ok(dist) => pool.get(dist.sample(rng)).copied(),
        // every weight is zero: all candidates were shown moments ago
        Err(_) => pool.choose(rng).copied(),
    }
}

pub fn select_next_question<R: Rng + ?Sized>(
    request: &SelectionRequest<'_>,
    params: &SelectorParams,
    rng: &mut R,
) -> Option<Selection> {
    let accuracy = recent_accuracy(request.recent_attempts, params.accuracy_window);
    let target = adjust_difficulty(request.current_difficulty, accuracy, params);

    let by_id: HashMap<&str, &QuestionMeta> = request
        .questions
        .iter()
        .map(|q| (q.id.as_str(), q))
        .collect();

    if has_due_review(request, &by_id) && rng.gen::<f64>() < params.review_probability {
        if let Some(question_id) = pick_review(request, &by_id, target, params.difficulty_band) {
            tracing::debug!(%question_id, target, "serving due review");
            return Some(Selection {
                question_id,
                source: SelectionSource::Review,
                target_difficulty: target,
            });
        }
    }

    let mastery_by_objective: HashMap<&str, f64> = request
        .mastery
        .iter()
        .map(|m| (m.objective_id.as_str(), m.mastery))
        .collect();
    let excluded: HashSet<&str> = request
        .recently_shown
        .iter()
        .take(params.exclude_recent)
        .map(String::as_str)
        .collect();

    let scoped: Vec<&QuestionMeta> = request
        .questions
        .iter()
        .filter(|q| matches_scope(q, request.exam_id, request.objective_filter))
        .filter(|q| !excluded.contains(q.id.as_str()))
        .collect();

    let banded: Vec<&QuestionMeta> = scoped
        .iter()
        .copied()
        .filter(|q| near(q.difficulty, target, params.difficulty_band))
        .collect();

    let (pool, source) = if !banded.is_empty() {
        (banded, SelectionSource::New)
    } else if !scoped.is_empty() {
        (scoped, SelectionSource::Widened)
    } else {
        let any: Vec<&QuestionMeta> = request
            .questions
            .iter()
            .filter(|q| matches_scope(q, request.exam_id, None))
            .collect();
        (any, SelectionSource::Fallback)
    };

    if pool.is_empty() {
        tracing::warn!(exam_id = request.exam_id, "no active questions to select from");
        return None;
    }

    let chosen = weighted_draw(&pool, request, &mastery_by_objective, params, rng)?;
    tracing::debug!(question_id = %chosen.id, ?source, target, "selected question");

    Some(Selection {
        question_id: chosen.id.clone(),
        source,
        target_difficulty: target,
    })
}
