//! Error type for the floorplanning engine.

use crate::constraint::ConstraintKind;
use qbplan_common::ModuleId;
use qbplan_config::ConfigError;

/// Errors surfaced by tree surgery, constraint repair, input validation, and the driver.
#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    /// A mutator was asked to operate on a module that no live tree owns.
    #[error("module not found: m{module}")]
    ModuleNotFound {
        /// The missing module.
        module: ModuleId,
    },

    /// An operation would break a tree or ownership invariant.
    #[error("structural violation: {message}")]
    StructuralViolation {
        /// What went wrong.
        message: String,
    },

    /// Repair ran out of candidate moves for a constraint.
    #[error("{kind} constraint on m{module} could not be repaired")]
    ConstraintInfeasible {
        /// The constraint kind that failed.
        kind: ConstraintKind,
        /// The module the constraint is anchored on.
        module: ModuleId,
    },

    /// Input records are inconsistent or geometrically ill-formed.
    #[error("malformed input: {message}")]
    InputMalformed {
        /// Description of the defect.
        message: String,
    },

    /// Every perturbation attempt in a row was infeasible.
    #[error("no feasible perturbation after {attempts} attempts; relax the constraints or raise anneal.max_retries")]
    RetryCeiling {
        /// Number of consecutive infeasible attempts.
        attempts: usize,
    },

    /// A result could not be serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// The encoder's message.
        reason: String,
    },

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PlaceError {
    pub(crate) fn structural(message: impl Into<String>) -> Self {
        Self::StructuralViolation {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::InputMalformed {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that indicate a broken tree invariant.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound { .. } | Self::StructuralViolation { .. }
        )
    }

    /// Returns `true` for errors the driver absorbs by discarding the perturbation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConstraintInfeasible { .. })
    }
}

/// Convenience alias for engine results.
pub type PlaceResult<T> = Result<T, PlaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_module_not_found() {
        let err = PlaceError::ModuleNotFound {
            module: ModuleId::from_raw(4),
        };
        assert_eq!(err.to_string(), "module not found: m4");
        assert!(err.is_structural());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn infeasible_is_recoverable() {
        let err = PlaceError::ConstraintInfeasible {
            kind: ConstraintKind::MinSeparation,
            module: ModuleId::from_raw(1),
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "minimum separation constraint on m1 could not be repaired"
        );
    }

    #[test]
    fn config_error_is_transparent() {
        let err = PlaceError::from(ConfigError::MissingField("anneal.times".into()));
        assert_eq!(err.to_string(), "missing required field: anneal.times");
    }
}
