//! # certprep-engine - adaptive learning and assessment core
//!
//! Pure Rust computation for a certification-exam prep platform:
//!
//! - **Mastery** - recency-weighted per-objective mastery with confidence bounds
//! - **Scheduler** - modified SM-2 spaced repetition
//! - **Selector** - adaptive next-question selection
//! - **Scoring** - blueprint-weighted practice exam scoring
//! - **Readiness** - composite readiness and pass probability
//! - **Progression** - XP, levels and daily streaks
//!
//! No I/O: callers supply attempts, question metadata and blueprints, and
//! persist whatever comes back. [`LearningEngine`] adds an in-memory
//! optimistic-concurrency store for the two pieces of state that are updated
//! read-modify-write (review schedules and progression).
//!
//! ## Modules
//!
//! - [`types`] - shared records and constants
//! - [`mastery`], [`scheduler`], [`selector`], [`scoring`], [`readiness`], [`progression`]
//! - [`store`] - versioned compare-and-swap store
//! - [`engine`] - stateful facade
//! - [`config`], [`error`], [`logging`] - ambient plumbing
//!
//! ## Example
//!
//! ```rust
//! use certprep_engine::{ActivityEvent, Entitlements, LearningEngine};
//! use chrono::Utc;
//!
//! let engine = LearningEngine::default();
//! let outcome = engine
//!     .apply_activity("learner-1", &ActivityEvent::test_complete(96.0, Utc::now()), &Entitlements::default())
//!     .unwrap();
//! assert_eq!(outcome.xp_gained, 200);
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mastery;
pub mod progression;
pub mod readiness;
pub mod scheduler;
pub mod scoring;
pub mod selector;
pub mod store;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use types::*;

pub use config::EngineConfig;
pub use engine::{AnswerRecorded, LearningEngine, ReviewKey};
pub use error::{EngineError, Result};
pub use mastery::{estimate_mastery, estimate_mastery_batch, MasteryLevel, MasteryRecord};
pub use progression::{
    apply_activity, level_for_xp, xp_to_next_level, ActivityEvent, ActivityKind, LevelProgress,
    ProgressionNotice, ProgressionOutcome,
};
pub use readiness::{
    assess_readiness, ReadinessConfidence, ReadinessInput, ReadinessSnapshot, Recommendation,
};
pub use scheduler::{due_reviews, schedule_review, ReviewOutcome};
pub use scoring::{percentile_rank, score_exam, AnswerKey, SubmittedAnswer};
pub use selector::{select_next_question, Selection, SelectionRequest, SelectionSource};
pub use store::{Versioned, VersionedStore};
