//! Domain error model.

use thiserror::Error;

use crate::job::{JobState, Transition};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only (bad identifiers, illegal state transitions).
/// Storage and transport concerns belong to the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The job state machine has no edge for this transition.
    #[error("invalid transition {transition:?} from state {from}")]
    InvalidTransition { from: JobState, transition: Transition },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_transition(from: JobState, transition: Transition) -> Self {
        Self::InvalidTransition { from, transition }
    }
}
