//! Property-Based Tests for the engine's numeric invariants
//!
//! - Mastery and its confidence bounds stay inside [0, 100]
//! - Easiness never drops below the floor and levels stay within 1..=6
//! - Consecutive correct answers at constant easiness never shorten the interval
//! - Exam scoring is deterministic and bounded
//! - Readiness is bounded and pass probability is a probability
//! - XP, level and longest streak never decrease

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use certprep_engine::config::{MasteryParams, ProgressionParams, ReadinessParams, SchedulerParams};
use certprep_engine::mastery::MasteryRecord;
use certprep_engine::{
    apply_activity, assess_readiness, estimate_mastery, level_for_xp, schedule_review, score_exam,
    ActivityEvent, ActivityKind, AnswerKey, Attempt, Entitlements, ExamBlueprint, MasteryLevel,
    ProgressionState, ReadinessInput, ReviewSchedule, SubmittedAnswer, TestResult,
};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
}

fn arb_percent() -> impl Strategy<Value = f64> {
    (0u32..=1000u32).prop_map(|v| v as f64 / 10.0)
}

fn arb_history() -> impl Strategy<Value = Vec<(bool, u8)>> {
    prop::collection::vec((any::<bool>(), 1u8..=5u8), 1..40)
}

type Activity = (ActivityKind, Option<f64>, Option<u32>);

fn plain(kind: ActivityKind) -> Just<Activity> {
    Just((kind, None, None))
}

fn arb_activity() -> impl Strategy<Value = Activity> {
    prop_oneof![
        plain(ActivityKind::FirstTryCorrect),
        plain(ActivityKind::RetryCorrect),
        plain(ActivityKind::AnswerIncorrect),
        (0u32..=80u32).prop_map(|n| (ActivityKind::SessionComplete, None, Some(n))),
        arb_percent().prop_map(|s| (ActivityKind::TestComplete, Some(s), None)),
        plain(ActivityKind::StreakMilestone),
        plain(ActivityKind::WeeklyGoal),
        plain(ActivityKind::ObjectiveMastered),
    ]
}

fn arb_entitlements() -> impl Strategy<Value = Entitlements> {
    (any::<bool>(), any::<bool>()).prop_map(|(xp_bonus, streak_freeze)| Entitlements {
        xp_bonus,
        streak_freeze,
    })
}

fn attempts_from(history: &[(bool, u8)]) -> Vec<Attempt> {
    history
        .iter()
        .enumerate()
        .map(|(i, (is_correct, quality))| Attempt {
            learner_id: "u".into(),
            question_id: "q".into(),
            objective_id: "obj".into(),
            is_correct: *is_correct,
            quality: *quality,
            time_spent_secs: 30,
            answered_at: base_time() + Duration::hours(i as i64 * 6),
        })
        .collect()
}

fn mastery_record(objective: &str, mastery: f64) -> MasteryRecord {
    MasteryRecord {
        objective_id: objective.into(),
        mastery,
        ci_lower: mastery,
        ci_upper: mastery,
        level: MasteryLevel::from_mastery(mastery),
        sample_size: 20,
        questions_needed: 0,
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn mastery_is_bounded(history in arb_history()) {
        let attempts = attempts_from(&history);
        let now = base_time() + Duration::days(12);
        let record = estimate_mastery("obj", &attempts, now, &MasteryParams::default());
        prop_assert!((0.0..=100.0).contains(&record.mastery));
        prop_assert!(record.ci_lower >= 0.0 && record.ci_upper <= 100.0);
        prop_assert!(record.ci_lower <= record.mastery && record.mastery <= record.ci_upper);
        if record.sample_size < 5 {
            prop_assert_eq!(record.level, MasteryLevel::InsufficientData);
        }
    }

    #[test]
    fn schedule_stays_within_bounds(history in arb_history(), seed in any::<u64>()) {
        let params = SchedulerParams::default();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut prior = None;
        for attempt in attempts_from(&history) {
            let outcome = schedule_review(&attempt, prior.as_ref(), &params, &mut rng).unwrap();
            let schedule = &outcome.schedule;
            prop_assert!(schedule.easiness >= params.min_easiness - 1e-12);
            prop_assert!((1..=6).contains(&schedule.interval_level));
            prop_assert!(schedule.next_review_at > attempt.answered_at);
            prop_assert!(outcome.interval_days >= outcome.base_interval_days * 0.9 - 1e-9);
            prop_assert!(outcome.interval_days <= outcome.base_interval_days * 1.1 + 1e-9);
            if !attempt.is_correct {
                prop_assert_eq!(schedule.interval_level, 1);
            }
            prior = Some(outcome.schedule);
        }
    }

    #[test]
    fn correct_runs_never_shorten_the_interval(
        run_len in 2usize..12,
        start_easiness in (130u32..=300u32).prop_map(|v| v as f64 / 100.0),
        start_streak in 0u32..6,
        seed in any::<u64>(),
    ) {
        let params = SchedulerParams::default();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut prior = Some(ReviewSchedule {
            learner_id: "u".into(),
            question_id: "q".into(),
            easiness: start_easiness,
            interval_level: 1,
            next_review_at: base_time(),
            correct_streak: start_streak,
            review_count: start_streak,
            last_reviewed_at: base_time(),
        });
        let mut previous_base: Option<f64> = None;
        // quality 4 leaves easiness unchanged
        let run = vec![(true, 4u8); run_len];
        for attempt in attempts_from(&run) {
            let outcome = schedule_review(&attempt, prior.as_ref(), &params, &mut rng).unwrap();
            prop_assert!((outcome.schedule.easiness - start_easiness).abs() < 1e-12);
            if let Some(previous) = previous_base {
                prop_assert!(outcome.base_interval_days >= previous - 1e-9);
            }
            previous_base = Some(outcome.base_interval_days);
            prior = Some(outcome.schedule);
        }
    }

    #[test]
    fn scoring_is_deterministic_and_bounded(
        outcomes in prop::collection::vec((any::<bool>(), any::<bool>()), 0..30),
    ) {
        let blueprint = ExamBlueprint::new("e", &[("a", 0.7), ("b", 0.3)]);
        let mut key = Vec::new();
        let mut answers = Vec::new();
        for (i, (in_a, correct)) in outcomes.iter().enumerate() {
            let id = format!("q{i}");
            key.push(AnswerKey {
                question_id: id.clone(),
                objective_id: if *in_a { "a" } else { "b" }.into(),
                correct: "X".into(),
            });
            answers.push(SubmittedAnswer {
                question_id: id,
                selected: if *correct { "X" } else { "Y" }.into(),
            });
        }

        let first = score_exam("u", &answers, &key, &blueprint, base_time()).unwrap();
        let second = score_exam("u", &answers, &key, &blueprint, base_time()).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!((0.0..=100.0).contains(&first.score));
        prop_assert_eq!(first.passed, first.score >= blueprint.passing_score);
        let answered: u32 = first.objective_tallies.values().map(|t| t.total).sum();
        prop_assert_eq!(answered as usize, outcomes.len());
    }

    #[test]
    fn readiness_is_bounded(
        mastery_a in arb_percent(),
        mastery_b in arb_percent(),
        scores in prop::collection::vec(arb_percent(), 0..8),
        questions_answered in 0u32..3000,
        trend in proptest::option::of(arb_percent()),
        study_days in 0u32..400,
    ) {
        let blueprint = ExamBlueprint::new("e", &[("a", 0.5), ("b", 0.5)]);
        let masteries = vec![mastery_record("a", mastery_a), mastery_record("b", mastery_b)];
        let tests: Vec<TestResult> = scores
            .iter()
            .enumerate()
            .map(|(i, score)| TestResult {
                learner_id: "u".into(),
                exam_id: "e".into(),
                objective_tallies: BTreeMap::new(),
                score: *score,
                passed: *score >= 65.0,
                low_sample_objectives: Vec::new(),
                completed_at: base_time() + Duration::days(i as i64),
            })
            .collect();

        let snapshot = assess_readiness(
            &ReadinessInput {
                blueprint: &blueprint,
                masteries: &masteries,
                tests: &tests,
                questions_answered,
                trend_score: trend,
                study_days,
            },
            &ReadinessParams::default(),
        )
        .unwrap();
        prop_assert!((0.0..=100.0).contains(&snapshot.readiness));
        prop_assert!(snapshot.pass_probability > 0.0 && snapshot.pass_probability < 1.0);
        if snapshot.ready {
            prop_assert!(snapshot.readiness >= 70.0);
        }
    }

    #[test]
    fn progression_never_goes_backwards(
        events in prop::collection::vec((arb_activity(), 0i64..72), 1..60),
        entitlements in arb_entitlements(),
    ) {
        let params = ProgressionParams::default();
        let mut state = ProgressionState::new("u");
        let mut at = base_time();
        for ((kind, score_percent, question_count), gap_hours) in events {
            at += Duration::hours(gap_hours);
            let event = ActivityEvent {
                kind,
                occurred_at: at,
                score_percent,
                question_count,
            };
            let outcome = apply_activity(&state, &event, &entitlements, &params);
            prop_assert!(outcome.state.total_xp >= state.total_xp);
            prop_assert_eq!(outcome.state.total_xp - state.total_xp, outcome.xp_gained);
            prop_assert!(outcome.level_after >= outcome.level_before);
            prop_assert_eq!(outcome.level_after, level_for_xp(outcome.state.total_xp));
            prop_assert_eq!(outcome.leveled_up, outcome.level_after > outcome.level_before);
            prop_assert!(outcome.state.longest_streak >= state.longest_streak);
            prop_assert!(outcome.state.longest_streak >= outcome.state.current_streak);
            state = outcome.state;
        }
    }
}
