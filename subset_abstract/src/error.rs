//! Error taxonomy for abstract-value inference.
//!
//! Three families of failures exist:
//!
//! - **type mismatch**: a forced merge (or any merge across incompatible
//!   shapes) found two descriptions that cannot be reconciled
//! - **value indeterminate**: a projection asked for a unique value or type
//!   that the abstract value does not pin down
//! - **scheduling**: the inference loop cannot make progress, or a resolver
//!   it forced failed
//!
//! None of these are retried. They propagate to the boundary of the current
//! inference run, where the driver decides what to do with them.

use std::fmt;

use thiserror::Error;

use crate::abstract_value::{AbstractValue, Slot};
use crate::types::Type;

/// Result alias used by every fallible operation of the crate.
pub type InferResult<T> = Result<T, InferenceError>;

/// One side of a failed merge.
#[derive(Debug, Clone)]
pub enum Conflict {
    Abstract(AbstractValue),
    Type(Type),
    Slot(Slot),
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Abstract(av) => write!(f, "{}", av),
            Conflict::Type(ty) => write!(f, "{}", ty),
            Conflict::Slot(slot) => write!(f, "{}", slot),
        }
    }
}

impl From<AbstractValue> for Conflict {
    fn from(av: AbstractValue) -> Self {
        Conflict::Abstract(av)
    }
}

impl From<Type> for Conflict {
    fn from(ty: Type) -> Self {
        Conflict::Type(ty)
    }
}

impl From<Slot> for Conflict {
    fn from(slot: Slot) -> Self {
        Conflict::Slot(slot)
    }
}

/// Errors raised by the inference core.
#[derive(Error, Debug, Clone)]
pub enum InferenceError {
    /// Two descriptions of the same site cannot be reconciled.
    #[error("type mismatch between {left} and {right}: {reason}")]
    TypeMismatch {
        left: Conflict,
        right: Conflict,
        reason: String,
    },

    /// A projection needed a unique value or type and did not find one.
    #[error("cannot determine a unique result for {value}: {reason}")]
    ValueIndeterminate { value: AbstractValue, reason: String },

    /// The inference loop has blocked work and nothing it may force.
    #[error("inference loop cannot make progress (blocked pendings: {blocked:?})")]
    Deadlock { blocked: Vec<usize> },

    /// A resolver invoked by the loop returned an error.
    #[error("resolver of pending #{pending} failed: {source}")]
    ResolverFailed {
        pending: usize,
        #[source]
        source: Box<InferenceError>,
    },

    /// A constructor rejected its inputs.
    #[error("invalid abstract value: {0}")]
    InvalidConstruction(String),

    /// A merge met an unresolved pending but had no loop to bind it in.
    #[error("cannot merge an unresolved pending value without an inference loop")]
    UnboundPending,

    /// `set_result` was called on a pending that already has a result.
    #[error("pending #{pending} is already resolved")]
    AlreadyResolved { pending: usize },

    /// Configuration could not be parsed or failed validation.
    #[error("invalid inference configuration: {0}")]
    Config(String),
}

impl InferenceError {
    /// Build a type mismatch from any two conflicting operands.
    pub fn mismatch(
        left: impl Into<Conflict>,
        right: impl Into<Conflict>,
        reason: impl Into<String>,
    ) -> Self {
        InferenceError::TypeMismatch {
            left: left.into(),
            right: right.into(),
            reason: reason.into(),
        }
    }

    /// Build a value-indeterminate error for `value`.
    pub fn indeterminate(value: &AbstractValue, reason: impl Into<String>) -> Self {
        InferenceError::ValueIndeterminate {
            value: value.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self, InferenceError::TypeMismatch { .. })
    }

    pub fn is_value_error(&self) -> bool {
        matches!(self, InferenceError::ValueIndeterminate { .. })
    }

    /// Scheduling failures abort the whole run rather than a single step.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            InferenceError::Deadlock { .. } | InferenceError::ResolverFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_display_names_both_sides() {
        let err = InferenceError::mismatch(Type::Int(64), Type::Float(32), "types differ");
        assert_eq!(
            err.to_string(),
            "type mismatch between Int[64] and Float[32]: types differ"
        );
        assert!(err.is_type_error());
        assert!(!err.is_fatal_to_run());
    }

    #[test]
    fn test_resolver_failure_is_fatal() {
        let err = InferenceError::ResolverFailed {
            pending: 3,
            source: Box::new(InferenceError::Deadlock { blocked: vec![] }),
        };
        assert!(err.is_fatal_to_run());
        assert!(err.to_string().starts_with("resolver of pending #3 failed"));
    }
}
