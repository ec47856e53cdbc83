//! Error taxonomy for lifecycle operations.
//!
//! Every variant is recoverable by the caller; the engine never crashes the
//! process on bad input. Each carries enough detail to tell the caller which
//! guard or invariant blocked the action.

use std::fmt;

/// Caller-facing error for every lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Unknown record id.
    NotFound { what: String },
    /// Missing or malformed required field.
    Validation { detail: String },
    /// The operation would violate a uniqueness/lock invariant, or was
    /// invoked against a record in the wrong status.
    Conflict { detail: String },
    /// Duplicate terminal transition attempt (the record is already in the
    /// state the operation would produce).
    AlreadyInState { detail: String },
    /// The record store failed; the operation was not applied.
    Unavailable { detail: String },
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation {
            detail: detail.into(),
        }
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: detail.into(),
        }
    }

    pub fn already_in_state(detail: impl Into<String>) -> Self {
        Self::AlreadyInState {
            detail: detail.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable {
            detail: detail.into(),
        }
    }

    /// True for the two "the guard no longer holds" variants.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyInState { .. })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "not found: {}", what),
            Self::Validation { detail } => write!(f, "invalid input: {}", detail),
            Self::Conflict { detail } => write!(f, "conflict: {}", detail),
            Self::AlreadyInState { detail } => write!(f, "already done: {}", detail),
            Self::Unavailable { detail } => write!(f, "store unavailable: {}", detail),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_guard() {
        let err = EngineError::conflict("tribe already has an active protection ending at T");
        assert_eq!(
            err.to_string(),
            "conflict: tribe already has an active protection ending at T"
        );
    }

    #[test]
    fn test_is_conflict_covers_both_guard_variants() {
        assert!(EngineError::conflict("x").is_conflict());
        assert!(EngineError::already_in_state("x").is_conflict());
        assert!(!EngineError::not_found("x").is_conflict());
        assert!(!EngineError::validation("x").is_conflict());
        assert!(!EngineError::unavailable("x").is_conflict());
    }
}
