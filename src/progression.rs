//! Progression Engine
//!
//! Experience points, derived level and the daily study streak. Every function
//! here is pure: it takes the current `ProgressionState` and returns a new one.
//! Serializing concurrent updates for one learner is the caller's job (see
//! `engine::LearningEngine::apply_activity`).

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProgressionParams;
use crate::types::{Entitlements, ProgressionState};

const LEVEL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    FirstTryCorrect,
    RetryCorrect,
    /// Earns nothing but still counts toward the daily question goal.
    AnswerIncorrect,
    SessionComplete,
    TestComplete,
    StreakMilestone,
    WeeklyGoal,
    ObjectiveMastered,
}

impl ActivityKind {
    pub fn base_xp(&self) -> u64 {
        match self {
            Self::FirstTryCorrect => 10,
            Self::RetryCorrect => 5,
            Self::AnswerIncorrect => 0,
            Self::SessionComplete => 25,
            Self::TestComplete => 100,
            Self::StreakMilestone => 50,
            Self::WeeklyGoal => 100,
            Self::ObjectiveMastered => 150,
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(
            self,
            Self::FirstTryCorrect | Self::RetryCorrect | Self::AnswerIncorrect
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub occurred_at: DateTime<Utc>,
    /// Percent score, for test completions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_percent: Option<f64>,
    /// Questions in the session, for session completions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_count: Option<u32>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            occurred_at,
            score_percent: None,
            question_count: None,
        }
    }

    pub fn test_complete(score_percent: f64, occurred_at: DateTime<Utc>) -> Self {
        Self {
            score_percent: Some(score_percent),
            ..Self::new(ActivityKind::TestComplete, occurred_at)
        }
    }

    pub fn session_complete(question_count: u32, occurred_at: DateTime<Utc>) -> Self {
        Self {
            question_count: Some(question_count),
            ..Self::new(ActivityKind::SessionComplete, occurred_at)
        }
    }
}

/// Side effects for the notification collaborator; never performed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressionNotice {
    LevelUp { level: u32 },
    StreakMilestone { days: u32 },
    StreakFreezeUsed { date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionOutcome {
    pub state: ProgressionState,
    pub xp_gained: u64,
    pub level_before: u32,
    pub level_after: u32,
    pub leveled_up: bool,
    pub notices: Vec<ProgressionNotice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    pub total_xp: u64,
    pub xp_into_level: u64,
    pub xp_to_next_level: u64,
}

/// Cumulative XP at which `level` is reached: 100 * level^1.5.
pub fn xp_threshold(level: u32) -> f64 {
    100.0 * (level as f64).powf(1.5)
}

/// floor((xp / 100)^(2/3)), never below 1.
pub fn level_for_xp(total_xp: u64) -> u32 {
    let raw = (total_xp as f64 / 100.0).powf(2.0 / 3.0);
    ((raw + LEVEL_EPSILON).floor() as u32).max(1)
}

pub fn xp_to_next_level(total_xp: u64) -> u64 {
    let next = xp_threshold(level_for_xp(total_xp) + 1);
    (next - total_xp as f64).ceil().max(0.0) as u64
}

pub fn level_progress(total_xp: u64) -> LevelProgress {
    let level = level_for_xp(total_xp);
    let floor = if level <= 1 { 0.0 } else { xp_threshold(level) };
    LevelProgress {
        level,
        total_xp,
        xp_into_level: (total_xp as f64 - floor).max(0.0) as u64,
        xp_to_next_level: xp_to_next_level(total_xp),
    }
}

pub fn xp_multiplier(
    event: &ActivityEvent,
    entitlements: &Entitlements,
    params: &ProgressionParams,
) -> f64 {
    let mut multiplier = 1.0;

    if event.kind == ActivityKind::TestComplete {
        multiplier *= match event.score_percent {
            Some(s) if s >= 95.0 => 2.0,
            Some(s) if s >= 85.0 => 1.5,
            Some(s) if s >= 75.0 => 1.2,
            _ => 1.0,
        };
    }

    if event.kind == ActivityKind::SessionComplete {
        multiplier *= match event.question_count {
            Some(n) if n >= 50 => 1.5,
            Some(n) if n >= 25 => 1.2,
            _ => 1.0,
        };
    }

    if entitlements.xp_bonus {
        multiplier *= params.entitlement_multiplier;
    }

    multiplier
}

pub fn xp_for_event(
    event: &ActivityEvent,
    entitlements: &Entitlements,
    params: &ProgressionParams,
) -> u64 {
    let xp = event.kind.base_xp() as f64 * xp_multiplier(event, entitlements, params);
    xp.round().max(0.0) as u64
}

pub fn learner_offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

pub fn local_date(at: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    at.with_timezone(&learner_offset(utc_offset_minutes)).date_naive()
}

/// Streak as it should be displayed on `today`: zero once a day has been
/// missed that freeze credits cannot cover.
pub fn effective_streak(
    state: &ProgressionState,
    today: NaiveDate,
    entitlements: &Entitlements,
) -> u32 {
    let Some(last) = state.last_qualifying_date else {
        return 0;
    };
    let gap = (today - last).num_days();
    if gap <= 1 {
        return state.current_streak;
    }
    let missed = (gap - 1) as u64;
    if entitlements.streak_freeze && missed <= state.freeze_credits as u64 {
        state.current_streak
    } else {
        0
    }
}

pub fn grant_freeze_credits(
    state: &ProgressionState,
    credits: u32,
    entitlements: &Entitlements,
) -> ProgressionState {
    let mut next = state.clone();
    if entitlements.streak_freeze {
        next.freeze_credits = next.freeze_credits.saturating_add(credits);
    }
    next
}

fn qualify_day(
    state: &mut ProgressionState,
    today: NaiveDate,
    entitlements: &Entitlements,
    params: &ProgressionParams,
    notices: &mut Vec<ProgressionNotice>,
) {
    let streak = match state.last_qualifying_date {
        None => 1,
        Some(last) => {
            let gap = (today - last).num_days();
            if gap <= 0 {
                return;
            }
            if gap == 1 {
                state.current_streak.saturating_add(1)
            } else {
                let missed = (gap - 1) as u64;
                if entitlements.streak_freeze && missed <= state.freeze_credits as u64 {
                    state.freeze_credits -= missed as u32;
                    for offset in 1..gap {
                        notices.push(ProgressionNotice::StreakFreezeUsed {
                            date: last + chrono::Duration::days(offset),
                        });
                    }
                    state.current_streak.saturating_add(1)
                } else {
                    1
                }
            }
        }
    };

    state.current_streak = streak;
    state.longest_streak = state.longest_streak.max(streak);
    state.last_qualifying_date = Some(today);

    if params.streak_milestones.contains(&streak) {
        notices.push(ProgressionNotice::StreakMilestone { days: streak });
    }
}

fn record_answer(
    state: &mut ProgressionState,
    at: DateTime<Utc>,
    entitlements: &Entitlements,
    params: &ProgressionParams,
    notices: &mut Vec<ProgressionNotice>,
) {
    let today = local_date(at, state.utc_offset_minutes);
    match state.tally_date {
        Some(date) if date == today => state.tally_questions += 1,
        // late delivery from an earlier day does not rewrite history
        Some(date) if date > today => return,
        _ => {
            state.tally_date = Some(today);
            state.tally_questions = 1;
        }
    }

    if state.tally_questions >= params.daily_question_goal
        && state.last_qualifying_date != Some(today)
    {
        qualify_day(state, today, entitlements, params, notices);
    }
}

pub fn apply_activity(
    state: &ProgressionState,
    event: &ActivityEvent,
    entitlements: &Entitlements,
    params: &ProgressionParams,
) -> ProgressionOutcome {
    let mut next = state.clone();
    let mut notices = Vec::new();

    let xp_gained = xp_for_event(event, entitlements, params);
    next.total_xp = next.total_xp.saturating_add(xp_gained);

    if event.kind.is_answer() {
        record_answer(&mut next, event.occurred_at, entitlements, params, &mut notices);
    }

    let level_before = level_for_xp(state.total_xp);
    let level_after = level_for_xp(next.total_xp);
    let leveled_up = level_after > level_before;
    if leveled_up {
        notices.push(ProgressionNotice::LevelUp { level: level_after });
        tracing::info!(learner_id = %next.learner_id, level = level_after, "level up");
    }
    for notice in &notices {
        if let ProgressionNotice::StreakMilestone { days } = notice {
            tracing::info!(learner_id = %next.learner_id, days, "streak milestone");
        }
    }

    ProgressionOutcome {
        state: next,
        xp_gained,
        level_before,
        level_after,
        leveled_up,
        notices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn answer_n(
        state: &ProgressionState,
        n: usize,
        when: DateTime<Utc>,
        entitlements: &Entitlements,
    ) -> ProgressionOutcome {
        let params = ProgressionParams::default();
        let mut outcome = apply_activity(
            state,
            &ActivityEvent::new(ActivityKind::FirstTryCorrect, when),
            entitlements,
            &params,
        );
        let mut notices = outcome.notices.clone();
        for i in 1..n {
            outcome = apply_activity(
                &outcome.state,
                &ActivityEvent::new(ActivityKind::AnswerIncorrect, when + Duration::minutes(i as i64)),
                entitlements,
                &params,
            );
            notices.extend(outcome.notices.clone());
        }
        outcome.notices = notices;
        outcome
    }

    #[test]
    fn test_level_formula() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(282), 1);
        assert_eq!(level_for_xp(283), 2);
        assert_eq!(level_for_xp(800), 4);
        assert_eq!(level_for_xp(2700), 9);
        assert_eq!(xp_to_next_level(200), 83);
        assert_eq!(xp_to_next_level(0), 283);
    }

    #[test]
    fn test_level_progress() {
        let progress = level_progress(900);
        assert_eq!(progress.level, 4);
        assert_eq!(progress.xp_into_level, 100);
        assert_eq!(progress.xp_to_next_level, 219);
    }

    #[test]
    fn test_multipliers_stack() {
        let params = ProgressionParams::default();
        let premium = Entitlements {
            xp_bonus: true,
            streak_freeze: false,
        };
        let test = ActivityEvent::test_complete(88.0, at(1, 9));
        assert_eq!(xp_for_event(&test, &Entitlements::default(), &params), 150);
        assert_eq!(xp_for_event(&test, &premium, &params), 180);

        let session = ActivityEvent::session_complete(60, at(1, 9));
        assert_eq!(xp_for_event(&session, &Entitlements::default(), &params), 38);
        let short = ActivityEvent::session_complete(10, at(1, 9));
        assert_eq!(xp_for_event(&short, &Entitlements::default(), &params), 25);

        // score bonus only applies to tests
        let mastered = ActivityEvent {
            score_percent: Some(99.0),
            ..ActivityEvent::new(ActivityKind::ObjectiveMastered, at(1, 9))
        };
        assert_eq!(xp_for_event(&mastered, &Entitlements::default(), &params), 150);
    }

    #[test]
    fn test_high_test_score_from_zero_stays_level_one() {
        let outcome = apply_activity(
            &ProgressionState::new("u1"),
            &ActivityEvent::test_complete(95.0, at(1, 9)),
            &Entitlements::default(),
            &ProgressionParams::default(),
        );
        assert_eq!(outcome.xp_gained, 200);
        assert_eq!(outcome.state.total_xp, 200);
        assert_eq!(outcome.level_after, 1);
        assert!(!outcome.leveled_up);
        assert!(outcome.notices.is_empty());
    }

    #[test]
    fn test_level_up_reported() {
        let state = ProgressionState {
            total_xp: 275,
            ..ProgressionState::new("u1")
        };
        let outcome = apply_activity(
            &state,
            &ActivityEvent::new(ActivityKind::FirstTryCorrect, at(1, 9)),
            &Entitlements::default(),
            &ProgressionParams::default(),
        );
        assert!(outcome.leveled_up);
        assert_eq!(outcome.level_after, 2);
        assert!(outcome
            .notices
            .contains(&ProgressionNotice::LevelUp { level: 2 }));
    }

    #[test]
    fn test_day_counts_only_after_goal() {
        let state = ProgressionState::new("u1");
        let four = answer_n(&state, 4, at(1, 9), &Entitlements::default());
        assert_eq!(four.state.current_streak, 0);
        assert_eq!(four.state.tally_questions, 4);

        let five = answer_n(&state, 5, at(1, 9), &Entitlements::default());
        assert_eq!(five.state.current_streak, 1);
        assert_eq!(five.state.last_qualifying_date, Some(at(1, 9).date_naive()));
    }

    #[test]
    fn test_consecutive_days_extend_streak() {
        let none = Entitlements::default();
        let day1 = answer_n(&ProgressionState::new("u1"), 5, at(1, 9), &none);
        let day2 = answer_n(&day1.state, 5, at(2, 9), &none);
        let day3 = answer_n(&day2.state, 6, at(3, 9), &none);
        assert_eq!(day3.state.current_streak, 3);
        assert_eq!(day3.state.longest_streak, 3);
        assert!(day3
            .notices
            .contains(&ProgressionNotice::StreakMilestone { days: 3 }));
    }

    #[test]
    fn test_gap_resets_without_freeze() {
        let none = Entitlements::default();
        let day1 = answer_n(&ProgressionState::new("u1"), 5, at(1, 9), &none);
        let day2 = answer_n(&day1.state, 5, at(2, 9), &none);
        let day4 = answer_n(&day2.state, 5, at(4, 9), &none);
        assert_eq!(day4.state.current_streak, 1);
        assert_eq!(day4.state.longest_streak, 2);
    }

    #[test]
    fn test_freeze_bridges_missed_day() {
        let entitled = Entitlements {
            xp_bonus: false,
            streak_freeze: true,
        };
        let day1 = answer_n(&ProgressionState::new("u1"), 5, at(1, 9), &entitled);
        let stocked = grant_freeze_credits(&day1.state, 1, &entitled);
        let day3 = answer_n(&stocked, 5, at(3, 9), &entitled);
        assert_eq!(day3.state.current_streak, 2);
        assert_eq!(day3.state.freeze_credits, 0);
        assert!(day3.notices.contains(&ProgressionNotice::StreakFreezeUsed {
            date: at(2, 0).date_naive()
        }));
    }

    #[test]
    fn test_freeze_credits_need_entitlement() {
        let state = grant_freeze_credits(&ProgressionState::new("u1"), 3, &Entitlements::default());
        assert_eq!(state.freeze_credits, 0);
    }

    #[test]
    fn test_effective_streak_survives_until_end_of_next_day() {
        let none = Entitlements::default();
        let day1 = answer_n(&ProgressionState::new("u1"), 5, at(1, 9), &none);
        let d = |day| at(day, 12).date_naive();
        assert_eq!(effective_streak(&day1.state, d(1), &none), 1);
        assert_eq!(effective_streak(&day1.state, d(2), &none), 1);
        assert_eq!(effective_streak(&day1.state, d(3), &none), 0);
    }

    #[test]
    fn test_local_timezone_decides_the_day() {
        // 23:00 UTC on the 1st is already the 2nd at UTC+2
        let state = ProgressionState::new("u1").with_utc_offset(120);
        let outcome = answer_n(&state, 5, at(1, 23), &Entitlements::default());
        assert_eq!(
            outcome.state.last_qualifying_date,
            Some(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
        );
    }

    #[test]
    fn test_late_answer_from_previous_day_ignored_for_tally() {
        let none = Entitlements::default();
        let today = answer_n(&ProgressionState::new("u1"), 2, at(2, 9), &none);
        let late = apply_activity(
            &today.state,
            &ActivityEvent::new(ActivityKind::RetryCorrect, at(1, 9)),
            &none,
            &ProgressionParams::default(),
        );
        assert_eq!(late.state.tally_questions, 2);
        assert_eq!(late.xp_gained, 5);
    }
}
