use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{ExamBlueprint, ObjectiveId, ObjectiveTally, QuestionId, TestResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: QuestionId,
    pub selected: String,
}

/// Correct answer for one question, from the question bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerKey {
    pub question_id: QuestionId,
    pub objective_id: ObjectiveId,
    pub correct: String,
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn tally_answers(
    answers: &[SubmittedAnswer],
    key: &[AnswerKey],
    blueprint: &ExamBlueprint,
) -> Result<BTreeMap<ObjectiveId, ObjectiveTally>> {
    let key_by_id: HashMap<&str, &AnswerKey> =
        key.iter().map(|k| (k.question_id.as_str(), k)).collect();

    let mut seen = HashSet::new();
    let mut tallies: BTreeMap<ObjectiveId, ObjectiveTally> = BTreeMap::new();
    for answer in answers {
        let entry = key_by_id
            .get(answer.question_id.as_str())
            .ok_or_else(|| EngineError::UnknownQuestion(answer.question_id.clone()))?;
        if blueprint.weight_of(&entry.objective_id).is_none() {
            return Err(EngineError::UnknownObjective(entry.objective_id.clone()));
        }
        if !seen.insert(answer.question_id.as_str()) {
            return Err(EngineError::InvalidAttempt(format!(
                "question {} answered twice",
                answer.question_id
            )));
        }
        tallies
            .entry(entry.objective_id.clone())
            .or_default()
            .record(answer.selected == entry.correct);
    }
    Ok(tallies)
}

/// Weighted score over the objectives that were actually answered.
///
/// An objective with no answers is dropped from both numerator and
/// denominator, so skipping it cannot drag the score down.
pub fn weighted_score(
    tallies: &BTreeMap<ObjectiveId, ObjectiveTally>,
    blueprint: &ExamBlueprint,
) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (objective_id, weight) in &blueprint.objective_weights {
        let Some(percent) = tallies.get(objective_id).and_then(ObjectiveTally::percent) else {
            continue;
        };
        numerator += percent * weight;
        denominator += weight;
    }
    if denominator <= 0.0 {
        return 0.0;
    }
    round_one_decimal(numerator / denominator).clamp(0.0, 100.0)
}

pub fn score_exam(
    learner_id: &str,
    answers: &[SubmittedAnswer],
    key: &[AnswerKey],
    blueprint: &ExamBlueprint,
    completed_at: DateTime<Utc>,
) -> Result<TestResult> {
    blueprint.validate()?;
    let tallies = tally_answers(answers, key, blueprint)?;
    let score = weighted_score(&tallies, blueprint);
    let passed = score >= blueprint.passing_score;

    let low_sample_objectives = blueprint
        .objective_weights
        .keys()
        .filter(|id| {
            tallies.get(*id).map(|t| t.total).unwrap_or(0) < blueprint.min_questions_per_objective
        })
        .cloned()
        .collect();

    tracing::debug!(
        learner_id,
        exam_id = %blueprint.exam_id,
        score,
        passed,
        "exam scored"
    );

    Ok(TestResult {
        learner_id: learner_id.to_string(),
        exam_id: blueprint.exam_id.clone(),
        objective_tallies: tallies,
        score,
        passed,
        low_sample_objectives,
        completed_at,
    })
}

/// Percentage of historical scores below `score`, counting ties as half.
pub fn percentile_rank(score: f64, distribution: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = distribution.iter().copied().filter(|s| s.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    let below = valid.iter().filter(|s| **s < score).count() as f64;
    let equal = valid.iter().filter(|s| **s == score).count() as f64;
    Some((100.0 * (below + 0.5 * equal) / valid.len() as f64).clamp(0.0, 100.0))
}
