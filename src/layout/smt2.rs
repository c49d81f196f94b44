//! SMT-LIB2 backend: hands the problem to an external optimizing SMT solver
//!
//! The problem is written as one script on the solver's stdin (`z3 -in -smt2`),
//! using `(minimize ...)` for the objective and `(get-value ...)` to read the
//! model back. The solver's own `:timeout` option bounds the search; a
//! wall-clock guard kills the process if it overruns that budget.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::solver::{
    Constraint, LinearExpr, Model, SolveStatus, SolverBackend, SolverError, Var,
};

const BACKEND: &str = "smt2";

/// Extra time the process gets beyond its own timeout before it is killed
const KILL_GRACE: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// [`SolverBackend`] driving an external SMT-LIB2 solver process
#[derive(Debug)]
pub struct Smt2Backend {
    program: String,
    vars: BTreeSet<Var>,
    constraints: Vec<Constraint>,
    objective: Option<Var>,
}

impl Smt2Backend {
    /// `program` is the solver executable, e.g. `"z3"`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            vars: BTreeSet::new(),
            constraints: Vec::new(),
            objective: None,
        }
    }

    /// Check if the solver executable can be started
    pub fn is_available(program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn declare(&mut self, var: &Var) -> Result<(), SolverError> {
        let symbol = var.symbol();
        if symbol.contains(['|', '\\']) {
            return Err(SolverError::unsupported(
                BACKEND,
                format!("variable name '{}' cannot be quoted", symbol),
            ));
        }
        if !self.vars.contains(var) {
            self.vars.insert(var.clone());
        }
        Ok(())
    }

    /// Render the full solver script for the asserted problem
    pub fn script(&self, timeout: Duration) -> String {
        let mut script = String::new();
        script.push_str("(set-option :produce-models true)\n");
        let _ = writeln!(script, "(set-option :timeout {})", timeout.as_millis());

        for var in &self.vars {
            let _ = writeln!(script, "(declare-const {} Int)", symbol(var));
        }
        for constraint in &self.constraints {
            match constraint {
                Constraint::LessEq(lhs, rhs) => {
                    let _ = writeln!(script, "(assert (<= {} {}))", term(lhs), term(rhs));
                }
                // `distinct` needs at least two arguments
                Constraint::Distinct(exprs) if exprs.len() < 2 => {}
                Constraint::Distinct(exprs) => {
                    let args: Vec<String> = exprs.iter().map(term).collect();
                    let _ = writeln!(script, "(assert (distinct {}))", args.join(" "));
                }
            }
        }
        if let Some(objective) = &self.objective {
            let _ = writeln!(script, "(minimize {})", symbol(objective));
        }

        script.push_str("(check-sat)\n");
        if !self.vars.is_empty() {
            let symbols: Vec<String> = self.vars.iter().map(symbol).collect();
            let _ = writeln!(script, "(get-value ({}))", symbols.join(" "));
        }
        script.push_str("(exit)\n");
        script
    }

    /// Run the solver; `None` if it had to be killed
    fn run(&self, script: &str, timeout: Duration) -> Result<Option<String>, SolverError> {
        let mut child = Command::new(&self.program)
            .arg("-in")
            .arg("-smt2")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SolverError::Internal("solver stdout not captured".to_string()))?;
        let reader = thread::spawn(move || {
            let mut output = String::new();
            stdout.read_to_string(&mut output).map(|_| output)
        });

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(script.as_bytes()) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        }

        let deadline = Instant::now().checked_add(timeout + KILL_GRACE);
        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(program = %self.program, "solver overran its timeout, killing it");
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }

        let output = reader
            .join()
            .map_err(|_| SolverError::Internal("solver output reader panicked".to_string()))??;
        Ok(Some(output))
    }

    /// Interpret the solver's answer to `(check-sat)` and `(get-value ...)`
    fn read_status(&self, output: &str) -> Result<SolveStatus, SolverError> {
        let items = parse_sexps(output)?;
        let mut items = items.into_iter();

        let status = match items.next() {
            None => return Ok(SolveStatus::Unknown),
            Some(Sexp::Atom(status)) => status,
            Some(other) => return Err(protocol_error(&other)),
        };

        match status.as_str() {
            "unsat" => return Ok(SolveStatus::Unsatisfiable),
            "sat" | "unknown" | "timeout" => {}
            _ => return Err(SolverError::Protocol(format!("unexpected status '{}'", status))),
        }

        let by_symbol: HashMap<String, &Var> =
            self.vars.iter().map(|var| (var.symbol(), var)).collect();
        let mut model = Model::new();
        for item in items {
            match item {
                Sexp::List(pairs) if !is_error(&pairs) => {
                    for pair in pairs {
                        let (var, value) = read_pair(&pair, &by_symbol)?;
                        model.insert(var.clone(), value);
                    }
                }
                // Values are unavailable when no model was found
                Sexp::List(_) if status != "sat" => {}
                other => return Err(protocol_error(&other)),
            }
        }

        if status == "sat" {
            return Ok(SolveStatus::Satisfiable {
                model,
                optimal: true,
            });
        }
        // An interrupted optimizer may still report its best model
        if !model.is_empty() && self.constraints.iter().all(|c| c.holds(&model)) {
            Ok(SolveStatus::Satisfiable {
                model,
                optimal: false,
            })
        } else {
            Ok(SolveStatus::Unknown)
        }
    }
}

impl SolverBackend for Smt2Backend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn assert(&mut self, constraint: Constraint) -> Result<(), SolverError> {
        let exprs: Vec<&LinearExpr> = match &constraint {
            Constraint::LessEq(lhs, rhs) => vec![lhs, rhs],
            Constraint::Distinct(exprs) => exprs.iter().collect(),
        };
        for expr in exprs {
            for (var, _) in expr.terms() {
                self.declare(var)?;
            }
        }
        self.constraints.push(constraint);
        Ok(())
    }

    fn minimize(&mut self, objective: Var) -> Result<(), SolverError> {
        self.declare(&objective)?;
        self.objective = Some(objective);
        Ok(())
    }

    fn solve(&mut self, timeout: Duration) -> Result<SolveStatus, SolverError> {
        let script = self.script(timeout);
        debug!(
            program = %self.program,
            variables = self.vars.len(),
            constraints = self.constraints.len(),
            "running SMT solver"
        );
        trace!(%script, "solver script");

        match self.run(&script, timeout)? {
            Some(output) => {
                trace!(%output, "solver output");
                self.read_status(&output)
            }
            None => Ok(SolveStatus::Unknown),
        }
    }
}

fn symbol(var: &Var) -> String {
    format!("|{}|", var.symbol())
}

fn int(value: i64) -> String {
    if value < 0 {
        format!("(- {})", value.unsigned_abs())
    } else {
        value.to_string()
    }
}

fn term(expr: &LinearExpr) -> String {
    let mut parts: Vec<String> = expr
        .terms()
        .iter()
        .map(|(var, coeff)| match coeff {
            1 => symbol(var),
            c => format!("(* {} {})", int(*c), symbol(var)),
        })
        .collect();
    if expr.constant_term() != 0 || parts.is_empty() {
        parts.push(int(expr.constant_term()));
    }
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("(+ {})", parts.join(" "))
    }
}

// ============================================================================
// S-expression reading
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(a) => Some(a),
            Sexp::List(_) => None,
        }
    }
}

fn parse_sexps(input: &str) -> Result<Vec<Sexp>, SolverError> {
    let mut stack: Vec<Vec<Sexp>> = vec![Vec::new()];
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' => stack.push(Vec::new()),
            ')' => {
                let list = stack.pop().filter(|_| !stack.is_empty()).ok_or_else(|| {
                    SolverError::Protocol("unbalanced ')' in solver output".to_string())
                })?;
                if let Some(parent) = stack.last_mut() {
                    parent.push(Sexp::List(list));
                }
            }
            '|' => {
                let mut atom = String::new();
                for c in chars.by_ref() {
                    if c == '|' {
                        break;
                    }
                    atom.push(c);
                }
                push_atom(&mut stack, atom);
            }
            '"' => {
                let mut atom = String::new();
                while let Some(c) = chars.next() {
                    if c == '"' {
                        // `""` escapes a quote inside a string literal
                        if chars.peek() == Some(&'"') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    atom.push(c);
                }
                push_atom(&mut stack, atom);
            }
            c if c.is_whitespace() => {}
            c => {
                let mut atom = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                push_atom(&mut stack, atom);
            }
        }
    }

    match stack.pop() {
        Some(top) if stack.is_empty() => Ok(top),
        _ => Err(SolverError::Protocol(
            "unbalanced '(' in solver output".to_string(),
        )),
    }
}

fn push_atom(stack: &mut [Vec<Sexp>], atom: String) {
    if let Some(top) = stack.last_mut() {
        top.push(Sexp::Atom(atom));
    }
}

fn is_error(list: &[Sexp]) -> bool {
    list.first().and_then(Sexp::as_atom) == Some("error")
}

fn protocol_error(item: &Sexp) -> SolverError {
    match item {
        Sexp::List(list) if is_error(list) => {
            let message = list.get(1).and_then(Sexp::as_atom).unwrap_or("unknown error");
            SolverError::Protocol(format!("solver reported: {}", message))
        }
        other => SolverError::Protocol(format!("unexpected output {:?}", other)),
    }
}

fn read_int(sexp: &Sexp) -> Option<i64> {
    match sexp {
        Sexp::Atom(a) => a.parse().ok(),
        Sexp::List(list) => match list.as_slice() {
            [Sexp::Atom(minus), Sexp::Atom(a)] if minus == "-" => {
                a.parse::<i64>().ok().map(|v| -v)
            }
            _ => None,
        },
    }
}

fn read_pair<'v>(
    pair: &Sexp,
    by_symbol: &HashMap<String, &'v Var>,
) -> Result<(&'v Var, i64), SolverError> {
    let bad = || SolverError::Protocol(format!("malformed value {:?}", pair));
    let Sexp::List(items) = pair else {
        return Err(bad());
    };
    let [Sexp::Atom(name), value] = items.as_slice() else {
        return Err(bad());
    };
    let var = by_symbol
        .get(name)
        .copied()
        .ok_or_else(|| SolverError::Protocol(format!("unknown symbol '{}'", name)))?;
    let value = read_int(value).ok_or_else(bad)?;
    Ok((var, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::builder::ConstraintBuilder;
    use crate::program::ProgramModel;

    fn loaded(program: &ProgramModel) -> Smt2Backend {
        let mut backend = Smt2Backend::new("z3");
        ConstraintBuilder::new(program)
            .build()
            .load_into(&mut backend)
            .unwrap();
        backend
    }

    fn scenario_a() -> ProgramModel {
        ProgramModel::builder().class("A", ["f"]).build().unwrap()
    }

    #[test]
    fn test_script() {
        let backend = loaded(&scenario_a());
        let script = backend.script(Duration::from_millis(1500));
        insta::assert_snapshot!(script.trim_end(), @r"
        (set-option :produce-models true)
        (set-option :timeout 1500)
        (declare-const |class:A| Int)
        (declare-const |method:f| Int)
        (declare-const |table_bound| Int)
        (assert (<= 0 (+ |class:A| |method:f|)))
        (assert (<= (+ |class:A| |method:f|) |table_bound|))
        (assert (<= 0 |class:A|))
        (assert (<= |table_bound| 1))
        (minimize |table_bound|)
        (check-sat)
        (get-value (|class:A| |method:f| |table_bound|))
        (exit)
        ");
    }

    #[test]
    fn test_term_rendering() {
        let expr = LinearExpr::constant(-3);
        assert_eq!(term(&expr), "(- 3)");
        assert_eq!(term(&LinearExpr::var(Var::TableBound)), "|table_bound|");
    }

    #[test]
    fn test_read_sat_output() {
        let backend = loaded(&scenario_a());
        let status = backend
            .read_status("sat\n((|class:A| 0)\n (|method:f| (- 2))\n (table_bound 0))\n")
            .unwrap();
        let SolveStatus::Satisfiable { model, optimal } = status else {
            panic!("expected sat, got {:?}", status);
        };
        assert!(optimal);
        assert_eq!(model.evaluate(&Var::method("f")), Some(-2));
        assert_eq!(model.evaluate(&Var::TableBound), Some(0));
    }

    #[test]
    fn test_read_unsat_output() {
        let backend = loaded(&scenario_a());
        let status = backend
            .read_status("unsat\n(error \"line 12 column 10: model is not available\")\n")
            .unwrap();
        assert_eq!(status, SolveStatus::Unsatisfiable);
    }

    #[test]
    fn test_read_unknown_output() {
        let backend = loaded(&scenario_a());
        let without_model = backend
            .read_status("unknown\n(error \"model is not available\")\n")
            .unwrap();
        assert_eq!(without_model, SolveStatus::Unknown);

        let with_model = backend
            .read_status("unknown\n((|class:A| 0) (|method:f| 0) (|table_bound| 1))\n")
            .unwrap();
        assert!(matches!(
            with_model,
            SolveStatus::Satisfiable { optimal: false, .. }
        ));
    }

    #[test]
    fn test_read_error_output() {
        let backend = loaded(&scenario_a());
        let err = backend
            .read_status("(error \"line 1 column 1: unknown command\")\n")
            .unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }

    #[test]
    fn test_unbalanced_output() {
        assert!(parse_sexps("sat\n((|class:A| 0)").is_err());
        assert!(parse_sexps("sat)").is_err());
    }

    #[test]
    fn test_solve_with_z3() {
        if !Smt2Backend::is_available("z3") {
            return;
        }
        let program = ProgramModel::builder()
            .class("A", ["f", "g"])
            .class("B", ["g", "h"])
            .build()
            .unwrap();
        let mut backend = loaded(&program);
        let status = backend.solve(Duration::from_secs(10)).unwrap();
        let SolveStatus::Satisfiable { model, .. } = status else {
            panic!("expected sat, got {:?}", status);
        };
        assert_eq!(model.evaluate(&Var::TableBound), Some(3));
    }

    #[test]
    fn test_missing_executable() {
        let mut backend = Smt2Backend::new("definitely-not-a-solver-binary");
        backend.minimize(Var::TableBound).unwrap();
        let err = backend.solve(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, SolverError::Io(_)));
    }
}
