//! Readiness Assessor
//!
//! Blends mastery, practice-test history, volume, trend and coverage into a
//! single readiness percentage, then feeds it to a fixed-coefficient logistic
//! model for the pass probability. Missing inputs zero their own component.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ReadinessParams;
use crate::error::{EngineError, Result};
use crate::mastery::MasteryRecord;
use crate::progression::learner_offset;
use crate::types::{Attempt, ExamBlueprint, ObjectiveId, TestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessConfidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    StrengthenObjectives { objective_ids: Vec<ObjectiveId> },
    TakePracticeTests { completed: usize, recommended: usize },
    AnswerMoreQuestions { answered: u32, target: u32 },
}

/// Unweighted 0-100 value of each readiness component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadinessComponents {
    pub mastery: f64,
    pub tests: f64,
    pub volume: f64,
    pub trend: f64,
    pub coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSnapshot {
    pub readiness: f64,
    pub confidence: ReadinessConfidence,
    pub ready: bool,
    pub pass_probability: f64,
    pub components: ReadinessComponents,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone)]
pub struct ReadinessInput<'a> {
    pub blueprint: &'a ExamBlueprint,
    pub masteries: &'a [MasteryRecord],
    /// Any number of results; only the newest few are used.
    pub tests: &'a [TestResult],
    pub questions_answered: u32,
    /// Externally supplied 0-100 trend signal.
    pub trend_score: Option<f64>,
    pub study_days: u32,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn pass_probability(
    readiness: f64,
    avg_test_score: f64,
    study_days: u32,
    questions_answered: u32,
    params: &ReadinessParams,
) -> f64 {
    let features = [
        (readiness / 100.0).clamp(0.0, 1.0),
        (avg_test_score / 100.0).clamp(0.0, 1.0),
        (study_days as f64 / params.study_days_cap).min(1.0),
        (questions_answered as f64 / params.questions_cap).min(1.0),
    ];
    let z = params.intercept
        + features
            .iter()
            .zip(params.coefficients.iter())
            .map(|(x, c)| x * c)
            .sum::<f64>();
    sigmoid(z).clamp(0.0, 1.0)
}

/// Least-squares slope over scores ordered oldest to newest, mapped onto 0-100
/// with 50 meaning flat. Fewer than two scores give no signal.
pub fn trend_score(scores_oldest_first: &[f64]) -> Option<f64> {
    if scores_oldest_first.len() < 2 {
        return None;
    }
    let n = scores_oldest_first.len() as f64;
    let sum_x: f64 = (0..scores_oldest_first.len()).map(|i| i as f64).sum();
    let sum_y: f64 = scores_oldest_first.iter().sum();
    let sum_xy: f64 = scores_oldest_first
        .iter()
        .enumerate()
        .map(|(i, y)| i as f64 * y)
        .sum();
    let sum_xx: f64 = (0..scores_oldest_first.len())
        .map(|i| (i as f64).powi(2))
        .sum();

    let denominator = n * sum_xx - sum_x.powi(2);
    if denominator.abs() < 1e-10 {
        return Some(50.0);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    Some((50.0 + slope * 5.0).clamp(0.0, 100.0))
}

/// Distinct calendar dates with at least one attempt, in the learner's zone.
pub fn study_days(attempts: &[Attempt], utc_offset_minutes: i32) -> u32 {
    let offset = learner_offset(utc_offset_minutes);
    let days: BTreeSet<NaiveDate> = attempts
        .iter()
        .map(|a| a.answered_at.with_timezone(&offset).date_naive())
        .collect();
    days.len() as u32
}

pub fn assess_readiness(input: &ReadinessInput<'_>, params: &ReadinessParams) -> Result<ReadinessSnapshot> {
    let blueprint = input.blueprint;
    blueprint.validate()?;

    let mut mastery_by_objective: HashMap<&str, f64> = HashMap::new();
    for record in input.masteries {
        if blueprint.weight_of(&record.objective_id).is_none() {
            return Err(EngineError::UnknownObjective(record.objective_id.clone()));
        }
        mastery_by_objective.insert(
            record.objective_id.as_str(),
            finite_or_zero(record.mastery).clamp(0.0, 100.0),
        );
    }

    let objective_count = blueprint.objective_weights.len();
    let masteries: Vec<(&str, f64)> = blueprint
        .objective_weights
        .keys()
        .map(|id| {
            let mastery = mastery_by_objective.get(id.as_str()).copied().unwrap_or(0.0);
            (id.as_str(), mastery)
        })
        .collect();
    let avg_mastery = masteries.iter().map(|(_, m)| m).sum::<f64>() / objective_count as f64;

    let mut weak: Vec<(&str, f64)> = masteries
        .iter()
        .copied()
        .filter(|(_, m)| *m < params.weak_mastery)
        .collect();
    weak.sort_by(|a, b| a.1.total_cmp(&b.1));

    // results for other exams say nothing about this one
    let mut recent: Vec<&TestResult> = input
        .tests
        .iter()
        .filter(|t| t.exam_id == blueprint.exam_id)
        .collect();
    recent.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    recent.truncate(params.recent_tests);
    let avg_test = if recent.len() >= params.min_tests {
        recent.iter().map(|t| finite_or_zero(t.score)).sum::<f64>() / recent.len() as f64
    } else {
        0.0
    };

    let components = ReadinessComponents {
        mastery: (avg_mastery * params.mastery_boost).min(100.0),
        tests: avg_test.clamp(0.0, 100.0),
        volume: (100.0 * input.questions_answered as f64 / params.volume_target as f64).min(100.0),
        trend: input
            .trend_score
            .map(finite_or_zero)
            .unwrap_or(0.0)
            .clamp(0.0, 100.0),
        coverage: 100.0 * (1.0 - weak.len() as f64 / objective_count as f64),
    };

    let w = &params.weights;
    let readiness = (components.mastery * w.mastery
        + components.tests * w.tests
        + components.volume * w.volume
        + components.trend * w.trend
        + components.coverage * w.coverage)
        .clamp(0.0, 100.0);

    let mut recommendations = Vec::new();
    if avg_mastery < params.strong_average && !weak.is_empty() {
        recommendations.push(Recommendation::StrengthenObjectives {
            objective_ids: weak.iter().map(|(id, _)| id.to_string()).collect(),
        });
    }
    if recent.len() < params.recommended_tests {
        recommendations.push(Recommendation::TakePracticeTests {
            completed: recent.len(),
            recommended: params.recommended_tests,
        });
    }
    if input.questions_answered < params.volume_target {
        recommendations.push(Recommendation::AnswerMoreQuestions {
            answered: input.questions_answered,
            target: params.volume_target,
        });
    }

    let (confidence, ready) = if readiness >= params.high_threshold {
        (ReadinessConfidence::High, true)
    } else if readiness >= params.medium_threshold {
        (ReadinessConfidence::Medium, recommendations.len() <= 1)
    } else {
        (ReadinessConfidence::Low, false)
    };

    let pass_probability = pass_probability(
        readiness,
        components.tests,
        input.study_days,
        input.questions_answered,
        params,
    );

    tracing::debug!(
        exam_id = %blueprint.exam_id,
        readiness,
        pass_probability,
        ?confidence,
        "readiness assessed"
    );

    Ok(ReadinessSnapshot {
        readiness,
        confidence,
        ready,
        pass_probability,
        components,
        recommendations,
    })
}
