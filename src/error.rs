use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid blueprint: {0}")]
    InvalidBlueprint(String),
    #[error("unknown objective: {0}")]
    UnknownObjective(String),
    #[error("unknown question: {0}")]
    UnknownQuestion(String),
    #[error("invalid attempt: {0}")]
    InvalidAttempt(String),
    #[error("concurrent update on {key}: expected version {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },
    #[error("gave up updating {key} after {attempts} conflicting attempts")]
    RetriesExhausted { key: String, attempts: u32 },
}

impl EngineError {
    /// Conflicts are retryable with fresher state; everything else is a caller bug.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
