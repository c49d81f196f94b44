//! Built-in branch-and-bound backend for row-displacement problems
//!
//! The backend accepts exactly the constraint shapes the layout builder
//! emits (entry terms `class + method` bounded below by a constant and above
//! by the objective, one `distinct` over all entry terms, optional class
//! floors and an optional `distinct` over class offsets, a constant cap on
//! the objective) and rejects anything else.
//!
//! Classes are grouped into components: two classes are connected when they
//! share a method. Within a component, fixing one class offset determines
//! everything else relative to it, and distinct components can always be
//! shifted apart (class offsets up, method offsets down) without moving any
//! slot. The search therefore places each component's first class at 0,
//! walks the rest in breadth-first order so every later class already has a
//! fixed method, and shifts components into place once a layout is found.
//!
//! Optimization is anytime: a greedy first-fit layout and the
//! `i * |methods| + j` witness provide an incumbent, then exhaustive searches
//! at successively tighter bounds improve it until a bound is proven
//! infeasible, the pigeonhole bound is reached, or the deadline passes.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::solver::{
    Constraint, LinearExpr, Model, SolveStatus, SolverBackend, SolverError, Var,
};

const BACKEND: &str = "search";

/// Deadline checks happen once per this many search nodes
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Deterministic branch-and-bound [`SolverBackend`]
#[derive(Debug, Default)]
pub struct SearchBackend {
    constraints: Vec<Constraint>,
    objective: Option<Var>,
}

impl SearchBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SolverBackend for SearchBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn assert(&mut self, constraint: Constraint) -> Result<(), SolverError> {
        self.constraints.push(constraint);
        Ok(())
    }

    fn minimize(&mut self, objective: Var) -> Result<(), SolverError> {
        self.objective = Some(objective);
        Ok(())
    }

    fn solve(&mut self, timeout: Duration) -> Result<SolveStatus, SolverError> {
        let objective = self
            .objective
            .clone()
            .ok_or_else(|| SolverError::unsupported(BACKEND, "no objective to minimize"))?;
        let instance = Instance::compile(&self.constraints, &objective)?;
        debug!(
            classes = instance.classes.len(),
            methods = instance.methods.len(),
            entries = instance.entry_count,
            "starting displacement search"
        );
        // No deadline if the budget does not fit in an Instant
        let deadline = Instant::now().checked_add(timeout);
        let plan = Plan::new(&instance);
        let outcome = instance.optimize(&plan, deadline);
        Ok(outcome.into_status(&instance, &plan, objective))
    }
}

// ============================================================================
// Compilation of asserted constraints
// ============================================================================

/// How an expression maps onto the displacement problem
enum Shape<'a> {
    Constant(i64),
    Single(&'a Var),
    Entry { class: &'a str, method: &'a str },
    Other,
}

fn shape(expr: &LinearExpr) -> Shape<'_> {
    match (expr.terms(), expr.constant_term()) {
        ([], c) => Shape::Constant(c),
        ([(var, 1)], 0) => Shape::Single(var),
        ([(a, 1), (b, 1)], 0) => match (a, b) {
            (Var::Class(class), Var::Method(method)) | (Var::Method(method), Var::Class(class)) => {
                Shape::Entry {
                    class: class.as_str(),
                    method: method.as_str(),
                }
            }
            _ => Shape::Other,
        },
        _ => Shape::Other,
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct EntryFacts {
    floor: Option<i64>,
    capped: bool,
    in_distinct: bool,
}

/// Displacement instance: rows are classes, columns are methods
#[derive(Debug)]
struct Instance {
    classes: Vec<String>,
    methods: Vec<String>,
    /// Method indices per class
    rows: Vec<Vec<usize>>,
    class_floor: Vec<Option<i64>>,
    slot_floor: i64,
    hint: Option<i64>,
    distinct_classes: bool,
    entry_count: usize,
}

#[derive(Default)]
struct Interner {
    classes: Vec<String>,
    class_index: HashMap<String, usize>,
    methods: Vec<String>,
    method_index: HashMap<String, usize>,
    entries: Vec<(usize, usize)>,
    entry_index: HashMap<(usize, usize), usize>,
    facts: Vec<EntryFacts>,
    class_floor: Vec<Option<i64>>,
}

impl Interner {
    fn class(&mut self, name: &str) -> usize {
        if let Some(&i) = self.class_index.get(name) {
            return i;
        }
        let i = self.classes.len();
        self.classes.push(name.to_string());
        self.class_index.insert(name.to_string(), i);
        self.class_floor.push(None);
        i
    }

    fn method(&mut self, name: &str) -> usize {
        if let Some(&i) = self.method_index.get(name) {
            return i;
        }
        let i = self.methods.len();
        self.methods.push(name.to_string());
        self.method_index.insert(name.to_string(), i);
        i
    }

    fn entry(&mut self, class: &str, method: &str) -> usize {
        let key = (self.class(class), self.method(method));
        if let Some(&i) = self.entry_index.get(&key) {
            return i;
        }
        let i = self.entries.len();
        self.entries.push(key);
        self.entry_index.insert(key, i);
        self.facts.push(EntryFacts::default());
        i
    }
}

impl Instance {
    fn compile(constraints: &[Constraint], objective: &Var) -> Result<Self, SolverError> {
        let mut interner = Interner::default();
        let mut hint: Option<i64> = None;
        let mut entry_groups = 0;
        let mut class_group: Option<HashSet<usize>> = None;

        for constraint in constraints {
            match constraint {
                Constraint::LessEq(lhs, rhs) => match (shape(lhs), shape(rhs)) {
                    (Shape::Constant(k), Shape::Single(Var::Class(name))) => {
                        let i = interner.class(name);
                        let floor = &mut interner.class_floor[i];
                        *floor = Some(floor.map_or(k, |f| f.max(k)));
                    }
                    (Shape::Constant(k), Shape::Entry { class, method }) => {
                        let i = interner.entry(class, method);
                        let floor = &mut interner.facts[i].floor;
                        *floor = Some(floor.map_or(k, |f| f.max(k)));
                    }
                    (Shape::Entry { class, method }, Shape::Single(var)) if var == objective => {
                        let i = interner.entry(class, method);
                        interner.facts[i].capped = true;
                    }
                    (Shape::Single(var), Shape::Constant(k)) if var == objective => {
                        hint = Some(hint.map_or(k, |h| h.min(k)));
                    }
                    _ => {
                        return Err(SolverError::unsupported(
                            BACKEND,
                            format!("constraint '{}'", constraint),
                        ))
                    }
                },
                Constraint::Distinct(exprs) => {
                    let shapes: Vec<Shape<'_>> = exprs.iter().map(shape).collect();
                    if shapes.iter().all(|s| matches!(s, Shape::Entry { .. })) {
                        entry_groups += 1;
                        for s in shapes {
                            if let Shape::Entry { class, method } = s {
                                let i = interner.entry(class, method);
                                if interner.facts[i].in_distinct {
                                    return Err(SolverError::unsupported(
                                        BACKEND,
                                        format!("entry {}::{} listed twice", class, method),
                                    ));
                                }
                                interner.facts[i].in_distinct = true;
                            }
                        }
                    } else if shapes
                        .iter()
                        .all(|s| matches!(s, Shape::Single(Var::Class(_))))
                    {
                        let mut group = HashSet::new();
                        for s in shapes {
                            if let Shape::Single(Var::Class(name)) = s {
                                group.insert(interner.class(name));
                            }
                        }
                        if class_group.replace(group).is_some() {
                            return Err(SolverError::unsupported(
                                BACKEND,
                                "more than one distinct group over class offsets",
                            ));
                        }
                    } else {
                        return Err(SolverError::unsupported(
                            BACKEND,
                            format!("constraint '{}'", constraint),
                        ));
                    }
                }
            }
        }

        if entry_groups > 1 {
            return Err(SolverError::unsupported(
                BACKEND,
                "more than one distinct group over entries",
            ));
        }

        let needs_distinct = interner.entries.len() > 1;
        let mut slot_floor: Option<i64> = None;
        for (&(class, method), facts) in interner.entries.iter().zip(&interner.facts) {
            let name = || format!("{}::{}", interner.classes[class], interner.methods[method]);
            if !facts.capped {
                return Err(SolverError::unsupported(
                    BACKEND,
                    format!("entry {} is not bounded by the objective", name()),
                ));
            }
            if needs_distinct && !facts.in_distinct {
                return Err(SolverError::unsupported(
                    BACKEND,
                    format!("entry {} is missing from the distinct group", name()),
                ));
            }
            let Some(floor) = facts.floor else {
                return Err(SolverError::unsupported(
                    BACKEND,
                    format!("entry {} has no lower bound", name()),
                ));
            };
            match slot_floor {
                None => slot_floor = Some(floor),
                Some(f) if f == floor => {}
                Some(_) => {
                    return Err(SolverError::unsupported(
                        BACKEND,
                        "entries with different lower bounds",
                    ))
                }
            }
        }

        let distinct_classes = match &class_group {
            None => false,
            Some(group) if group.len() == interner.classes.len() => true,
            Some(_) => {
                return Err(SolverError::unsupported(
                    BACKEND,
                    "distinct group covers only some class offsets",
                ))
            }
        };

        let mut rows = vec![Vec::new(); interner.classes.len()];
        for &(class, method) in &interner.entries {
            rows[class].push(method);
        }

        Ok(Self {
            entry_count: interner.entries.len(),
            classes: interner.classes,
            methods: interner.methods,
            rows,
            class_floor: interner.class_floor,
            slot_floor: slot_floor.unwrap_or(0),
            hint,
            distinct_classes,
        })
    }

    /// Pigeonhole bound: `n` distinct slots starting at the floor
    fn lower_bound(&self) -> i64 {
        self.slot_floor + self.entry_count.saturating_sub(1) as i64
    }

    fn within_hint(&self, bound: i64) -> bool {
        self.hint.map_or(true, |h| bound <= h)
    }

    fn optimize(&self, plan: &Plan, deadline: Option<Instant>) -> Outcome {
        // Nothing bounds the objective from below, so any hint is reachable
        if self.entry_count == 0 {
            let mut empty = self.witness();
            empty.bound = self.hint.map_or(empty.bound, |h| h.min(empty.bound));
            return Outcome {
                best: Some(empty),
                complete: true,
            };
        }

        let lower = self.lower_bound();
        let mut best = [self.greedy(plan), Some(self.witness())]
            .into_iter()
            .flatten()
            .filter(|a| self.within_hint(a.bound))
            .min_by_key(|a| a.bound);

        let mut target = match (&best, self.hint) {
            (Some(incumbent), _) => incumbent.bound - 1,
            (None, Some(hint)) => hint,
            // Without a hint the witness is always kept
            (None, None) => {
                return Outcome {
                    best: None,
                    complete: false,
                }
            }
        };
        if let Some(incumbent) = &best {
            debug!(bound = incumbent.bound, lower, "initial incumbent");
        }

        loop {
            if target < lower {
                return Outcome {
                    best,
                    complete: true,
                };
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Outcome {
                    best,
                    complete: false,
                };
            }

            let mut search = Search::new(self, plan, target, deadline);
            match search.run() {
                SearchResult::Found(assignment) => {
                    debug!(bound = assignment.bound, nodes = search.nodes, "improved layout");
                    target = assignment.bound - 1;
                    best = Some(assignment);
                }
                SearchResult::Exhausted => {
                    debug!(bound = target, nodes = search.nodes, "bound proven infeasible");
                    return Outcome {
                        best,
                        complete: true,
                    };
                }
                SearchResult::TimedOut => {
                    warn!(bound = target, nodes = search.nodes, "search timed out");
                    return Outcome {
                        best,
                        complete: false,
                    };
                }
            }
        }
    }

    /// Class `i` at `i * |methods|`, method `j` at `floor + j`
    fn witness(&self) -> Assignment {
        let width = self.methods.len() as i64;
        let class_rel: Vec<i64> = (0..self.classes.len()).map(|i| i as i64 * width).collect();
        let method: Vec<i64> = (0..self.methods.len())
            .map(|j| self.slot_floor + j as i64)
            .collect();
        Assignment::new(self, class_rel, method)
    }

    /// First-fit placement in plan order; `None` if two already-fixed methods
    /// of a class share an offset, which no class offset can separate
    fn greedy(&self, plan: &Plan) -> Option<Assignment> {
        let mut used: HashSet<i64> = HashSet::new();
        let mut class_rel = vec![0i64; self.classes.len()];
        let mut method: Vec<Option<i64>> = vec![None; self.methods.len()];

        for (pos, &class) in plan.order.iter().enumerate() {
            let row = &self.rows[class];
            let fixed: Vec<i64> = row.iter().filter_map(|&m| method[m]).collect();
            let mut sorted = fixed.clone();
            sorted.sort_unstable();
            if sorted.windows(2).any(|w| w[0] == w[1]) {
                return None;
            }

            let peers = &plan.order[plan.comp_begin[pos]..pos];
            let mut c = fixed
                .iter()
                .map(|off| self.slot_floor - off)
                .max()
                .unwrap_or(0);
            loop {
                let class_clash =
                    self.distinct_classes && peers.iter().any(|&p| class_rel[p] == c);
                if !class_clash && fixed.iter().all(|off| !used.contains(&(c + off))) {
                    break;
                }
                c += 1;
            }

            class_rel[class] = c;
            used.extend(fixed.iter().map(|off| c + off));
            let mut next_free = self.slot_floor;
            for &m in row {
                if method[m].is_none() {
                    while used.contains(&next_free) {
                        next_free += 1;
                    }
                    used.insert(next_free);
                    method[m] = Some(next_free - c);
                }
            }
        }

        let method = method.into_iter().map(|m| m.unwrap_or(0)).collect();
        Some(Assignment::new(self, class_rel, method))
    }

    /// Shift every component into place and build the model
    fn model_for(&self, plan: &Plan, assignment: &Assignment, objective: Var) -> Model {
        let mut taken: HashSet<i64> = HashSet::new();
        let mut class_abs = assignment.class_rel.clone();
        let mut method_abs = assignment.method.clone();
        let mut shifted = vec![false; self.methods.len()];

        for component in &plan.components {
            let mut shift = component
                .iter()
                .map(|&i| self.class_floor[i].unwrap_or(0) - assignment.class_rel[i])
                .max()
                .unwrap_or(0);
            if self.distinct_classes {
                while component
                    .iter()
                    .any(|&i| taken.contains(&(assignment.class_rel[i] + shift)))
                {
                    shift += 1;
                }
            }
            for &i in component {
                class_abs[i] = assignment.class_rel[i] + shift;
                taken.insert(class_abs[i]);
                for &m in &self.rows[i] {
                    if !shifted[m] {
                        shifted[m] = true;
                        method_abs[m] = assignment.method[m] - shift;
                    }
                }
            }
        }

        let mut model = Model::new();
        for (name, value) in self.classes.iter().zip(class_abs) {
            model.insert(Var::class(name), value);
        }
        for (name, value) in self.methods.iter().zip(method_abs) {
            model.insert(Var::method(name), value);
        }
        model.insert(objective, assignment.bound);
        model
    }
}

// ============================================================================
// Search plan
// ============================================================================

/// Placement order: components one after another, each walked breadth-first
/// from its largest class
#[derive(Debug)]
struct Plan {
    order: Vec<usize>,
    /// For each position in `order`, where its component starts
    comp_begin: Vec<usize>,
    components: Vec<Vec<usize>>,
    /// Methods used by exactly one class
    private: Vec<bool>,
}

impl Plan {
    fn new(instance: &Instance) -> Self {
        let class_count = instance.classes.len();
        let mut method_classes = vec![Vec::new(); instance.methods.len()];
        for (class, row) in instance.rows.iter().enumerate() {
            for &m in row {
                method_classes[m].push(class);
            }
        }

        let by_size = |&k: &usize| (Reverse(instance.rows[k].len()), k);
        let mut seeds: Vec<usize> = (0..class_count).collect();
        seeds.sort_by_key(by_size);

        let mut visited = vec![false; class_count];
        let mut order = Vec::with_capacity(class_count);
        let mut comp_begin = Vec::with_capacity(class_count);
        let mut components = Vec::new();

        for seed in seeds {
            if visited[seed] {
                continue;
            }
            let begin = order.len();
            visited[seed] = true;
            let mut queue = VecDeque::from([seed]);
            while let Some(class) = queue.pop_front() {
                order.push(class);
                comp_begin.push(begin);
                let mut next: Vec<usize> = instance.rows[class]
                    .iter()
                    .flat_map(|&m| method_classes[m].iter().copied())
                    .filter(|&k| !visited[k])
                    .collect();
                next.sort_by_key(by_size);
                next.dedup();
                for k in next {
                    visited[k] = true;
                    queue.push_back(k);
                }
            }
            components.push(order[begin..].to_vec());
        }

        let private = method_classes.iter().map(|c| c.len() == 1).collect();
        Self {
            order,
            comp_begin,
            components,
            private,
        }
    }
}

// ============================================================================
// Exhaustive search at a fixed bound
// ============================================================================

/// Relative class offsets, method offsets and the resulting largest slot
#[derive(Debug, Clone)]
struct Assignment {
    class_rel: Vec<i64>,
    method: Vec<i64>,
    bound: i64,
}

impl Assignment {
    fn new(instance: &Instance, class_rel: Vec<i64>, method: Vec<i64>) -> Self {
        let bound = instance
            .rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().map(move |&m| (i, m)))
            .map(|(i, m)| class_rel[i] + method[m])
            .max()
            .unwrap_or(instance.slot_floor);
        Self {
            class_rel,
            method,
            bound,
        }
    }
}

enum SearchResult {
    Found(Assignment),
    Exhausted,
    TimedOut,
}

struct Search<'a> {
    instance: &'a Instance,
    plan: &'a Plan,
    bound: i64,
    class_off: Vec<i64>,
    method_off: Vec<Option<i64>>,
    used: Vec<bool>,
    deadline: Option<Instant>,
    nodes: u64,
    timed_out: bool,
}

impl<'a> Search<'a> {
    fn new(instance: &'a Instance, plan: &'a Plan, bound: i64, deadline: Option<Instant>) -> Self {
        let width = (bound - instance.slot_floor + 1).max(0) as usize;
        Self {
            instance,
            plan,
            bound,
            class_off: vec![0; instance.classes.len()],
            method_off: vec![None; instance.methods.len()],
            used: vec![false; width],
            deadline,
            nodes: 0,
            timed_out: false,
        }
    }

    fn run(&mut self) -> SearchResult {
        trace!(bound = self.bound, "searching");
        if self.place(0) {
            let method = self.method_off.iter().map(|m| m.unwrap_or(0)).collect();
            SearchResult::Found(Assignment::new(
                self.instance,
                self.class_off.clone(),
                method,
            ))
        } else if self.timed_out {
            SearchResult::TimedOut
        } else {
            SearchResult::Exhausted
        }
    }

    /// Count a node; true once the deadline has passed
    fn tick(&mut self) -> bool {
        self.nodes += 1;
        if self.nodes % DEADLINE_CHECK_INTERVAL == 0
            && self.deadline.is_some_and(|d| Instant::now() >= d)
        {
            self.timed_out = true;
        }
        self.timed_out
    }

    fn take(&mut self, slot: i64) -> bool {
        if slot < self.instance.slot_floor || slot > self.bound {
            return false;
        }
        let idx = (slot - self.instance.slot_floor) as usize;
        if self.used[idx] {
            return false;
        }
        self.used[idx] = true;
        true
    }

    fn release(&mut self, slot: i64) {
        let idx = (slot - self.instance.slot_floor) as usize;
        self.used[idx] = false;
    }

    /// Place the class at `pos` in plan order and everything after it
    fn place(&mut self, pos: usize) -> bool {
        if self.tick() {
            return false;
        }
        let Some(&class) = self.plan.order.get(pos) else {
            return true;
        };
        let instance = self.instance;
        let plan = self.plan;
        let row = &instance.rows[class];
        let floor = instance.slot_floor;

        // Shared methods first so private ones can be placed in slot order
        let mut free: Vec<usize> = row
            .iter()
            .copied()
            .filter(|&m| self.method_off[m].is_none())
            .collect();
        free.sort_by_key(|&m| plan.private[m]);

        let seed = plan.comp_begin[pos] == pos;
        let (lo, hi) = if seed {
            (0, 0)
        } else {
            row.iter()
                .filter_map(|&m| self.method_off[m])
                .fold((i64::MIN, i64::MAX), |(lo, hi), off| {
                    (lo.max(floor - off), hi.min(self.bound - off))
                })
        };

        let peers = &plan.order[plan.comp_begin[pos]..pos];
        for c in lo..=hi {
            if instance.distinct_classes && peers.iter().any(|&p| self.class_off[p] == c) {
                continue;
            }

            let mut marked = Vec::new();
            let mut fits = true;
            for &m in row {
                if let Some(off) = self.method_off[m] {
                    if self.take(c + off) {
                        marked.push(c + off);
                    } else {
                        fits = false;
                        break;
                    }
                }
            }

            if fits {
                self.class_off[class] = c;
                if self.assign_free(pos, c, &free, floor) {
                    return true;
                }
            }
            for slot in marked {
                self.release(slot);
            }
            if self.timed_out {
                return false;
            }
        }
        false
    }

    /// Give each still-free method of the current class a slot
    fn assign_free(
        &mut self,
        pos: usize,
        class_offset: i64,
        free: &[usize],
        min_private: i64,
    ) -> bool {
        let Some((&m, rest)) = free.split_first() else {
            return self.place(pos + 1);
        };
        let private = self.plan.private[m];
        let start = if private {
            min_private
        } else {
            self.instance.slot_floor
        };

        for slot in start..=self.bound {
            if self.tick() {
                return false;
            }
            if !self.take(slot) {
                continue;
            }
            self.method_off[m] = Some(slot - class_offset);
            let next_min = if private { slot + 1 } else { min_private };
            if self.assign_free(pos, class_offset, rest, next_min) {
                return true;
            }
            self.method_off[m] = None;
            self.release(slot);
            if self.timed_out {
                return false;
            }
        }
        false
    }
}

// ============================================================================
// Outcome
// ============================================================================

struct Outcome {
    best: Option<Assignment>,
    /// The search space below `best` was exhausted
    complete: bool,
}

impl Outcome {
    fn into_status(self, instance: &Instance, plan: &Plan, objective: Var) -> SolveStatus {
        match (self.best, self.complete) {
            (Some(best), optimal) => SolveStatus::Satisfiable {
                model: instance.model_for(plan, &best, objective),
                optimal,
            },
            (None, true) => SolveStatus::Unsatisfiable,
            (None, false) => SolveStatus::Unknown,
        }
    }
}
