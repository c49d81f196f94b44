//! Layout engine for computing dispatch table offsets
//!
//! This module takes a validated [`ProgramModel`], builds the row-displacement
//! optimization problem, hands it to a [`SolverBackend`] and projects the
//! answer into a verified [`LayoutResult`].

pub mod builder;
pub mod config;
pub mod error;
pub mod projector;
pub mod search;
pub mod smt2;
pub mod solver;
pub mod types;

pub use builder::{ConstraintBuilder, ConstraintProblem, EntryTerm};
pub use config::{BackendKind, ConfigError, LayoutConfig};
pub use error::LayoutError;
pub use projector::project;
pub use search::SearchBackend;
pub use smt2::Smt2Backend;
pub use solver::{Constraint, LinearExpr, Model, SolveStatus, SolverBackend, SolverError, Var};
pub use types::*;

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::program::ProgramModel;

/// Create the backend selected by the configuration
pub fn backend_for(config: &LayoutConfig) -> Box<dyn SolverBackend> {
    match config.backend {
        BackendKind::Search => Box::new(SearchBackend::new()),
        BackendKind::Smt2 => Box::new(Smt2Backend::new(config.z3_path.clone())),
    }
}

/// Compute the layout of a program with the configured backend and budget
pub fn compute(program: &ProgramModel, config: &LayoutConfig) -> Result<LayoutResult, LayoutError> {
    compute_with_timeout(program, config, config.timeout())
}

fn compute_with_timeout(
    program: &ProgramModel,
    config: &LayoutConfig,
    timeout: Duration,
) -> Result<LayoutResult, LayoutError> {
    let problem = ConstraintBuilder::from_config(program, config).build();
    let mut backend = backend_for(config);
    compute_with_backend(program, &problem, backend.as_mut(), timeout)
}

/// Solve an already built problem on a caller-supplied backend
pub fn compute_with_backend(
    program: &ProgramModel,
    problem: &ConstraintProblem,
    backend: &mut dyn SolverBackend,
    timeout: Duration,
) -> Result<LayoutResult, LayoutError> {
    problem.load_into(backend)?;
    let status = backend.solve(timeout)?;
    debug!(backend = backend.name(), ?timeout, "solve finished");

    match status {
        SolveStatus::Satisfiable { model, optimal } => project(program, problem, &model, optimal),
        SolveStatus::Unsatisfiable => Err(LayoutError::infeasible(
            problem.bound_hint,
            !problem.hint_overridden,
        )),
        SolveStatus::Unknown => Err(LayoutError::timeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

/// Run one independent layout per budget, in parallel; results keep budget order
pub fn solve_budgets(
    program: &ProgramModel,
    config: &LayoutConfig,
    budgets: &[Duration],
) -> Vec<Result<LayoutResult, LayoutError>> {
    thread::scope(|scope| {
        let handles: Vec<_> = budgets
            .iter()
            .map(|&budget| scope.spawn(move || compute_with_timeout(program, config, budget)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(LayoutError::Solver(SolverError::Internal(
                        "layout worker panicked".to_string(),
                    )))
                })
            })
            .collect()
    })
}

/// The SMT-LIB2 script the external backend would run for this program
pub fn smt2_script(program: &ProgramModel, config: &LayoutConfig) -> Result<String, LayoutError> {
    let problem = ConstraintBuilder::from_config(program, config).build();
    let mut backend = Smt2Backend::new(config.z3_path.clone());
    problem.load_into(&mut backend)?;
    Ok(backend.script(config.timeout()))
}
