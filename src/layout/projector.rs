//! Result projector: turns a solver model into a verified [`LayoutResult`]

use tracing::debug;

use crate::program::ProgramModel;

use super::builder::ConstraintProblem;
use super::error::LayoutError;
use super::solver::{Model, Var};
use super::types::{occupancy, LayoutResult, Offset, SlotEntry};

fn value(model: &Model, var: &Var) -> Result<i64, LayoutError> {
    model
        .evaluate(var)
        .ok_or_else(|| LayoutError::missing_value(var))
}

/// Evaluate every offset, recompute every slot and check the layout
pub fn project(
    program: &ProgramModel,
    problem: &ConstraintProblem,
    model: &Model,
    optimal: bool,
) -> Result<LayoutResult, LayoutError> {
    let class_offsets = program
        .class_names()
        .map(|name| Ok(Offset::new(name, value(model, &Var::class(name))?)))
        .collect::<Result<Vec<_>, LayoutError>>()?;
    let method_offsets = program
        .method_names()
        .map(|name| Ok(Offset::new(name, value(model, &Var::method(name))?)))
        .collect::<Result<Vec<_>, LayoutError>>()?;

    let mut entries = problem
        .entries
        .iter()
        .map(|entry| {
            let slot = entry
                .slot()
                .evaluate(model)
                .ok_or_else(|| LayoutError::missing_value(&entry.method_var()))?;
            Ok(SlotEntry {
                slot,
                class: entry.class.clone(),
                method: entry.method.clone(),
            })
        })
        .collect::<Result<Vec<_>, LayoutError>>()?;
    entries.sort();

    let table_bound = entries.last().map_or(0, |e| e.slot);
    let result = LayoutResult {
        occupancy: occupancy(entries.len(), table_bound),
        class_offsets,
        method_offsets,
        entries,
        table_bound,
        optimal,
        bound_hint: problem.bound_hint,
        infeasible_bound: problem.infeasible_bound,
        distinct_class_offsets: problem.distinct_class_offsets,
    };

    result.verify(program)?;
    debug!(
        table_bound,
        optimal,
        occupancy = result.occupancy,
        "projected layout"
    );
    Ok(result)
}
