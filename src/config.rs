use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryParams {
    pub window_days: i64,
    pub max_attempts: usize,
    pub min_attempts: usize,
    pub reliable_attempts: usize,
    pub recency_decay: f64,
    pub z_score: f64,
}

impl Default for MasteryParams {
    fn default() -> Self {
        Self {
            window_days: 30,
            max_attempts: 50,
            min_attempts: 5,
            reliable_attempts: 20,
            recency_decay: 0.1,
            z_score: 1.96,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerParams {
    pub initial_easiness: f64,
    pub min_easiness: f64,
    pub lapse_penalty: f64,
    /// Base interval in days for levels 1..=6.
    pub base_intervals: [f64; 6],
    pub jitter_min: f64,
    pub jitter_max: f64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            initial_easiness: 2.5,
            min_easiness: 1.3,
            lapse_penalty: 0.2,
            base_intervals: [1.0, 2.0, 4.0, 8.0, 16.0, 32.0],
            jitter_min: 0.9,
            jitter_max: 1.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorParams {
    pub accuracy_window: usize,
    pub raise_above: f64,
    pub lower_below: f64,
    pub difficulty_step: f64,
    pub difficulty_band: f64,
    pub review_probability: f64,
    pub exclude_recent: usize,
    pub weak_mastery: f64,
    pub weak_boost: f64,
    pub discrimination_threshold: f64,
    pub discrimination_boost: f64,
    pub recency_days: f64,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            accuracy_window: 10,
            raise_above: 0.85,
            lower_below: 0.65,
            difficulty_step: 0.5,
            difficulty_band: 0.5,
            review_probability: 0.3,
            exclude_recent: 50,
            weak_mastery: 60.0,
            weak_boost: 1.5,
            discrimination_threshold: 0.3,
            discrimination_boost: 1.2,
            recency_days: 7.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessWeights {
    pub mastery: f64,
    pub tests: f64,
    pub volume: f64,
    pub trend: f64,
    pub coverage: f64,
}

impl Default for ReadinessWeights {
    fn default() -> Self {
        Self {
            mastery: 0.40,
            tests: 0.35,
            volume: 0.10,
            trend: 0.10,
            coverage: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessParams {
    pub weights: ReadinessWeights,
    pub mastery_boost: f64,
    pub min_tests: usize,
    pub recent_tests: usize,
    pub recommended_tests: usize,
    pub volume_target: u32,
    pub weak_mastery: f64,
    pub strong_average: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,
    /// Fixed logistic coefficients: readiness, test average, study days, volume.
    pub coefficients: [f64; 4],
    pub intercept: f64,
    pub study_days_cap: f64,
    pub questions_cap: f64,
}

impl Default for ReadinessParams {
    fn default() -> Self {
        Self {
            weights: ReadinessWeights::default(),
            mastery_boost: 1.2,
            min_tests: 3,
            recent_tests: 5,
            recommended_tests: 5,
            volume_target: 500,
            weak_mastery: 70.0,
            strong_average: 80.0,
            high_threshold: 85.0,
            medium_threshold: 70.0,
            coefficients: [2.1, 1.8, 0.5, 0.3],
            intercept: -1.2,
            study_days_cap: 90.0,
            questions_cap: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionParams {
    pub daily_question_goal: u32,
    pub entitlement_multiplier: f64,
    pub streak_milestones: Vec<u32>,
}

impl Default for ProgressionParams {
    fn default() -> Self {
        Self {
            daily_question_goal: 5,
            entitlement_multiplier: 1.2,
            streak_milestones: vec![3, 7, 14, 30, 60, 100, 365],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreParams {
    pub max_cas_retries: u32,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self { max_cas_retries: 8 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mastery: MasteryParams,
    pub scheduler: SchedulerParams,
    pub selector: SelectorParams,
    pub readiness: ReadinessParams,
    pub progression: ProgressionParams,
    pub store: StoreParams,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENGINE_MASTERY_WINDOW_DAYS") {
            config.mastery.window_days = val
                .parse::<i64>()
                .ok()
                .filter(|days| *days > 0)
                .unwrap_or(config.mastery.window_days);
        }
        if let Ok(val) = std::env::var("ENGINE_REVIEW_PROBABILITY") {
            config.selector.review_probability = val
                .parse::<f64>()
                .ok()
                .filter(|p| (0.0..=1.0).contains(p))
                .unwrap_or(config.selector.review_probability);
        }
        if let Ok(val) = std::env::var("ENGINE_DAILY_QUESTION_GOAL") {
            config.progression.daily_question_goal = val
                .parse::<u32>()
                .ok()
                .filter(|goal| *goal > 0)
                .unwrap_or(config.progression.daily_question_goal);
        }
        if let Ok(val) = std::env::var("ENGINE_MAX_CAS_RETRIES") {
            config.store.max_cas_retries = val.parse().unwrap_or(config.store.max_cas_retries);
        }

        config
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
