//! Error types for the layout engine

use thiserror::Error;

use crate::parser::ast::Span;
use crate::program::ModelError;

use super::solver::{SolverError, Var};

/// Errors that can occur during layout computation
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The class declarations are invalid
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The backend failed or rejected the problem
    #[error("constraint solver error: {0}")]
    Solver(#[from] SolverError),

    /// No layout was found within the solve budget
    #[error("no layout found within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The solver proved that no layout fits under the bound
    ///
    /// When `internal` is set the bound was the always-reachable witness
    /// bound, so this indicates a solver or builder bug rather than bad input.
    #[error("no layout fits within table bound {bound_hint}{}", if *.internal { " (internal error)" } else { "" })]
    Infeasible { bound_hint: i64, internal: bool },

    /// A satisfiable model did not assign a variable the layout needs
    #[error("solver model has no value for {variable}")]
    MissingValue { variable: String },

    /// A returned layout breaks a layout invariant
    #[error("layout invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

impl LayoutError {
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn infeasible(bound_hint: i64, internal: bool) -> Self {
        Self::Infeasible {
            bound_hint,
            internal,
        }
    }

    pub fn missing_value(variable: &Var) -> Self {
        Self::MissingValue {
            variable: variable.to_string(),
        }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// True for errors that point at a bug rather than at the input or budget
    pub fn is_internal(&self) -> bool {
        match self {
            Self::Infeasible { internal, .. } => *internal,
            Self::MissingValue { .. } | Self::InvariantViolation { .. } => true,
            Self::Solver(SolverError::Internal(_)) => true,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get the source span if available
    pub fn span(&self) -> Option<&Span> {
        match self {
            Self::Model(e) => e.span(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = LayoutError::timeout(250);
        assert_eq!(err.to_string(), "no layout found within 250 ms");
        assert!(err.is_timeout());
        assert!(!err.is_internal());
    }

    #[test]
    fn test_infeasible_internal_flag() {
        let user = LayoutError::infeasible(2, false);
        let internal = LayoutError::infeasible(6, true);
        assert_eq!(user.to_string(), "no layout fits within table bound 2");
        assert!(internal.to_string().contains("internal error"));
        assert!(!user.is_internal());
        assert!(internal.is_internal());
    }

    #[test]
    fn test_missing_value_names_variable() {
        let err = LayoutError::missing_value(&Var::method("f"));
        assert_eq!(err.to_string(), "solver model has no value for method f");
        assert!(err.is_internal());
    }

    #[test]
    fn test_model_error_keeps_span() {
        let err = LayoutError::from(ModelError::DuplicateClass {
            class: "A".to_string(),
            span: Some(4..5),
        });
        assert_eq!(err.span(), Some(&(4..5)));
        assert_eq!(err.to_string(), "class 'A' is declared more than once");
    }
}
