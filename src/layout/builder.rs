//! Constraint builder: turns a program model into an optimization problem
//!
//! One variable per distinct class, one per distinct method, one for the
//! table bound. Every declared (class, method) pair becomes an entry term
//! `class + method` that must land on its own slot in `[0, table_bound]`.

use tracing::debug;

use crate::program::ProgramModel;

use super::config::LayoutConfig;
use super::solver::{Constraint, LinearExpr, SolverBackend, SolverError, Var};

/// An entry term: the slot of `method` in the row of `class`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTerm {
    pub class: String,
    pub method: String,
}

impl EntryTerm {
    pub fn class_var(&self) -> Var {
        Var::class(&self.class)
    }

    pub fn method_var(&self) -> Var {
        Var::method(&self.method)
    }

    /// `class offset + method offset`
    pub fn slot(&self) -> LinearExpr {
        LinearExpr::sum([self.class_var(), self.method_var()])
    }
}

/// A fully built optimization problem, ready to load into any backend
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintProblem {
    pub class_vars: Vec<Var>,
    pub method_vars: Vec<Var>,
    pub entries: Vec<EntryTerm>,
    pub constraints: Vec<Constraint>,
    pub objective: Var,
    /// Upper bound asserted on the objective
    pub bound_hint: i64,
    /// Whether `bound_hint` came from the caller rather than the witness layout
    pub hint_overridden: bool,
    /// A bound no layout can reach
    pub infeasible_bound: i64,
    pub distinct_class_offsets: bool,
}

impl ConstraintProblem {
    /// Assert every constraint and the objective into `backend`
    pub fn load_into(&self, backend: &mut dyn SolverBackend) -> Result<(), SolverError> {
        for constraint in &self.constraints {
            backend.assert(constraint.clone())?;
        }
        backend.minimize(self.objective.clone())
    }
}

/// Builds a [`ConstraintProblem`] from a [`ProgramModel`]
#[derive(Debug, Clone)]
pub struct ConstraintBuilder<'a> {
    program: &'a ProgramModel,
    distinct_class_offsets: bool,
    bound_hint: Option<i64>,
}

impl<'a> ConstraintBuilder<'a> {
    pub fn new(program: &'a ProgramModel) -> Self {
        Self {
            program,
            distinct_class_offsets: true,
            bound_hint: None,
        }
    }

    pub fn from_config(program: &'a ProgramModel, config: &LayoutConfig) -> Self {
        Self {
            program,
            distinct_class_offsets: config.distinct_class_offsets,
            bound_hint: config.bound_hint,
        }
    }

    /// Require every class to get its own offset
    pub fn with_distinct_class_offsets(mut self, distinct: bool) -> Self {
        self.distinct_class_offsets = distinct;
        self
    }

    /// Replace the witness bound with a caller-chosen upper bound
    pub fn with_bound_hint(mut self, hint: i64) -> Self {
        self.bound_hint = Some(hint);
        self
    }

    /// |classes| * |methods|: placing class `i` at `i * |methods|` and method
    /// `j` at `j` never collides, so this bound is always reachable
    pub fn feasible_bound(&self) -> i64 {
        let classes = self.program.class_count() as i64;
        let methods = self.program.method_count() as i64;
        classes * methods
    }

    /// |entries| - 2: fewer slots than entries
    pub fn infeasible_bound(&self) -> i64 {
        self.program.entry_count() as i64 - 2
    }

    pub fn build(&self) -> ConstraintProblem {
        let class_vars: Vec<Var> = self.program.class_names().map(Var::class).collect();
        let method_vars: Vec<Var> = self.program.method_names().map(Var::method).collect();
        let entries: Vec<EntryTerm> = self
            .program
            .entries()
            .map(|e| EntryTerm {
                class: e.class.to_string(),
                method: e.method.to_string(),
            })
            .collect();
        let objective = Var::TableBound;
        let bound_hint = self.bound_hint.unwrap_or_else(|| self.feasible_bound());

        let mut constraints = Vec::new();

        // 0 <= slot <= table_bound
        for entry in &entries {
            constraints.push(Constraint::at_least(entry.slot(), 0));
            constraints.push(Constraint::less_eq(entry.slot(), objective.clone()));
        }
        if entries.len() > 1 {
            constraints.push(Constraint::distinct(entries.iter().map(EntryTerm::slot)));
        }

        for class in &class_vars {
            constraints.push(Constraint::at_least(class.clone(), 0));
        }
        if self.distinct_class_offsets && class_vars.len() > 1 {
            constraints.push(Constraint::distinct(
                class_vars.iter().cloned().map(LinearExpr::var),
            ));
        }

        constraints.push(Constraint::at_most(objective.clone(), bound_hint));

        debug!(
            classes = class_vars.len(),
            methods = method_vars.len(),
            entries = entries.len(),
            constraints = constraints.len(),
            bound_hint,
            "built layout constraints"
        );

        ConstraintProblem {
            class_vars,
            method_vars,
            entries,
            constraints,
            objective,
            bound_hint,
            hint_overridden: self.bound_hint.is_some(),
            infeasible_bound: self.infeasible_bound(),
            distinct_class_offsets: self.distinct_class_offsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> ProgramModel {
        ProgramModel::builder()
            .class("A", ["f", "g"])
            .class("B", ["g", "h"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_bound_hints() {
        let program = program();
        let builder = ConstraintBuilder::new(&program);
        assert_eq!(builder.feasible_bound(), 6);
        assert_eq!(builder.infeasible_bound(), 2);
    }

    #[test]
    fn test_variables_are_namespaced() {
        let program = ProgramModel::builder()
            .class("f", ["f"])
            .build()
            .unwrap();
        let problem = ConstraintBuilder::new(&program).build();
        assert_eq!(problem.class_vars, vec![Var::class("f")]);
        assert_eq!(problem.method_vars, vec![Var::method("f")]);
    }

    #[test]
    fn test_shared_method_uses_one_variable() {
        let problem = ConstraintBuilder::new(&program()).build();
        assert_eq!(problem.method_vars.len(), 3);
        assert_eq!(problem.entries.len(), 4);
        assert_eq!(problem.entries[1].method_var(), problem.entries[2].method_var());
    }

    #[test]
    fn test_emitted_constraints() {
        let problem = ConstraintBuilder::new(&program()).build();
        let rendered: Vec<String> = problem.constraints.iter().map(|c| c.to_string()).collect();

        assert!(rendered.contains(&"0 <= class A + method f".to_string()));
        assert!(rendered.contains(&"class B + method h <= table bound".to_string()));
        assert!(rendered.contains(&"0 <= class B".to_string()));
        assert!(rendered.contains(&"distinct(class A, class B)".to_string()));
        assert!(rendered.contains(&"table bound <= 6".to_string()));
        assert!(rendered.contains(
            &"distinct(class A + method f, class A + method g, class B + method g, class B + method h)"
                .to_string()
        ));
        // 4 entries * 2 + entry distinct + 2 class floors + class distinct + bound
        assert_eq!(problem.constraints.len(), 13);
    }

    #[test]
    fn test_relaxed_class_offsets() {
        let program = program();
        let problem = ConstraintBuilder::new(&program)
            .with_distinct_class_offsets(false)
            .build();
        assert!(!problem
            .constraints
            .iter()
            .any(|c| c.to_string() == "distinct(class A, class B)"));
        assert!(!problem.distinct_class_offsets);
    }

    #[test]
    fn test_bound_hint_override() {
        let program = program();
        let problem = ConstraintBuilder::new(&program).with_bound_hint(2).build();
        assert_eq!(problem.bound_hint, 2);
        assert!(problem.hint_overridden);
        assert_eq!(problem.constraints.last().unwrap().to_string(), "table bound <= 2");
    }

    #[test]
    fn test_from_config() {
        let program = program();
        let config = LayoutConfig::new()
            .with_distinct_class_offsets(false)
            .with_bound_hint(5);
        let problem = ConstraintBuilder::from_config(&program, &config).build();
        assert_eq!(problem.bound_hint, 5);
        assert!(!problem.distinct_class_offsets);
    }
}
