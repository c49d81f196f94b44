//! Solver backend interface
//!
//! The layout is computed by handing an integer optimization problem to a
//! pluggable [`SolverBackend`]. Backends receive linear constraints over
//! namespaced [`Var`] identities, an objective to minimize, and a timeout;
//! they answer with a [`SolveStatus`] carrying a [`Model`] when one was found.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Variables
// ============================================================================

/// Identity of a solver variable
///
/// Classes and methods live in separate namespaces, so a class called `m1`
/// and a method called `m1` are different variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    /// Row displacement of a class
    Class(String),
    /// Column offset of a method selector
    Method(String),
    /// Largest slot index any entry may occupy
    TableBound,
}

impl Var {
    pub fn class(name: impl Into<String>) -> Self {
        Self::Class(name.into())
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self::Method(name.into())
    }

    /// Name used when the variable is written out for an external solver
    pub fn symbol(&self) -> String {
        match self {
            Var::Class(name) => format!("class:{}", name),
            Var::Method(name) => format!("method:{}", name),
            Var::TableBound => "table_bound".to_string(),
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Class(name) => write!(f, "class {}", name),
            Var::Method(name) => write!(f, "method {}", name),
            Var::TableBound => write!(f, "table bound"),
        }
    }
}

// ============================================================================
// Linear expressions and constraints
// ============================================================================

/// `sum(coefficient * var) + constant`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearExpr {
    terms: Vec<(Var, i64)>,
    constant: i64,
}

impl LinearExpr {
    pub fn constant(value: i64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn var(var: Var) -> Self {
        Self {
            terms: vec![(var, 1)],
            constant: 0,
        }
    }

    /// Sum of the given variables, each with coefficient 1
    pub fn sum(vars: impl IntoIterator<Item = Var>) -> Self {
        Self {
            terms: vars.into_iter().map(|v| (v, 1)).collect(),
            constant: 0,
        }
    }

    pub fn terms(&self) -> &[(Var, i64)] {
        &self.terms
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    /// Evaluate against a model; `None` if any variable is unassigned
    pub fn evaluate(&self, model: &Model) -> Option<i64> {
        self.terms.iter().try_fold(self.constant, |acc, (var, coeff)| {
            model.evaluate(var).map(|value| acc + coeff * value)
        })
    }
}

impl From<Var> for LinearExpr {
    fn from(var: Var) -> Self {
        Self::var(var)
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "{}", self.constant);
        }
        for (i, (var, coeff)) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            if *coeff == 1 {
                write!(f, "{}", var)?;
            } else {
                write!(f, "{}*{}", coeff, var)?;
            }
        }
        if self.constant != 0 {
            write!(f, " + {}", self.constant)?;
        }
        Ok(())
    }
}

/// A constraint over integer variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// lhs <= rhs
    LessEq(LinearExpr, LinearExpr),

    /// Every expression takes a different value
    Distinct(Vec<LinearExpr>),
}

impl Constraint {
    pub fn less_eq(lhs: impl Into<LinearExpr>, rhs: impl Into<LinearExpr>) -> Self {
        Self::LessEq(lhs.into(), rhs.into())
    }

    /// expr >= value
    pub fn at_least(expr: impl Into<LinearExpr>, value: i64) -> Self {
        Self::LessEq(LinearExpr::constant(value), expr.into())
    }

    /// expr <= value
    pub fn at_most(expr: impl Into<LinearExpr>, value: i64) -> Self {
        Self::LessEq(expr.into(), LinearExpr::constant(value))
    }

    pub fn distinct(exprs: impl IntoIterator<Item = LinearExpr>) -> Self {
        Self::Distinct(exprs.into_iter().collect())
    }

    /// Check the constraint against a model; unassigned variables fail it
    pub fn holds(&self, model: &Model) -> bool {
        match self {
            Constraint::LessEq(lhs, rhs) => match (lhs.evaluate(model), rhs.evaluate(model)) {
                (Some(l), Some(r)) => l <= r,
                _ => false,
            },
            Constraint::Distinct(exprs) => {
                let mut values = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    match expr.evaluate(model) {
                        Some(v) => values.push(v),
                        None => return false,
                    }
                }
                values.sort_unstable();
                values.windows(2).all(|w| w[0] != w[1])
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::LessEq(lhs, rhs) => write!(f, "{} <= {}", lhs, rhs),
            Constraint::Distinct(exprs) => {
                write!(f, "distinct(")?;
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", expr)?;
                }
                write!(f, ")")
            }
        }
    }
}

// ============================================================================
// Models and results
// ============================================================================

/// Variable assignment returned by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: BTreeMap<Var, i64>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, var: Var, value: i64) {
        self.values.insert(var, value);
    }

    pub fn evaluate(&self, var: &Var) -> Option<i64> {
        self.values.get(var).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of [`SolverBackend::solve`]
#[derive(Debug, Clone, PartialEq)]
pub enum SolveStatus {
    /// A model was found; `optimal` is false when the timeout hit before the
    /// objective was proven minimal
    Satisfiable { model: Model, optimal: bool },
    /// No assignment satisfies the constraints
    Unsatisfiable,
    /// The timeout expired before any model was found
    Unknown,
}

/// Errors from a solver backend
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("unsupported problem for {backend} backend: {reason}")]
    Unsupported {
        backend: &'static str,
        reason: String,
    },

    #[error("failed to run solver process: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected solver output: {0}")]
    Protocol(String),

    #[error("internal solver error: {0}")]
    Internal(String),
}

impl SolverError {
    pub fn unsupported(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            backend,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// An integer optimization engine
///
/// Each backend instance owns one problem. Callers assert every constraint,
/// name the objective, then call [`SolverBackend::solve`] once.
pub trait SolverBackend {
    /// Short name for logs and error messages
    fn name(&self) -> &'static str;

    fn assert(&mut self, constraint: Constraint) -> Result<(), SolverError>;

    fn minimize(&mut self, objective: Var) -> Result<(), SolverError>;

    /// Blocks until a status is known or `timeout` elapses
    fn solve(&mut self, timeout: Duration) -> Result<SolveStatus, SolverError>;
}
