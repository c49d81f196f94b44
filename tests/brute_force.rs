//! Cross-check computed table bounds against exhaustive offset enumeration

use std::collections::{HashMap, HashSet};

use pretty_assertions::assert_eq;
use vtable_layout::layout::{self, LayoutError};
use vtable_layout::{LayoutConfig, ProgramModel};

/// Largest class offset the enumeration tries
const MAX_CLASS_OFFSET: i64 = 14;

type Classes = Vec<(String, Vec<String>)>;

const CASES: &[&[(&str, &[&str])]] = &[
    &[("A", &["f"])],
    &[("A", &["x"]), ("B", &["y"])],
    &[("A", &["f", "g"]), ("B", &["g", "h"])],
    &[("A", &["f", "g"]), ("B", &["f", "g"])],
    &[("A", &["f"]), ("B", &["f"]), ("C", &["f"])],
    &[("A", &["a", "b"]), ("B", &["b", "c"]), ("C", &["c", "a"])],
    &[("A", &["f", "g", "h"]), ("B", &["f"]), ("C", &["g", "h"])],
    &[("A", &["f", "h"]), ("B", &["f", "k"]), ("D", &["h", "k"])],
];

fn fixed_cases() -> Vec<Classes> {
    CASES
        .iter()
        .map(|classes| {
            classes
                .iter()
                .map(|(class, methods)| {
                    let methods = methods.iter().map(|m| m.to_string()).collect();
                    (class.to_string(), methods)
                })
                .collect()
        })
        .collect()
}

/// Linear congruential generator so the random cases are reproducible
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, n: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % n
    }
}

/// Up to 4 classes, each declaring 1 to 3 of the methods `a`..`d`
fn random_cases(seed: u64, count: usize) -> Vec<Classes> {
    const POOL: [&str; 4] = ["a", "b", "c", "d"];
    let mut rng = Lcg(seed);
    (0..count)
        .map(|_| {
            let class_count = 1 + rng.below(4) as usize;
            (0..class_count)
                .map(|i| {
                    let wanted = 1 + rng.below(3) as usize;
                    let mut methods: Vec<String> = Vec::new();
                    while methods.len() < wanted {
                        let method = POOL[rng.below(POOL.len() as u64) as usize];
                        if !methods.iter().any(|m| m == method) {
                            methods.push(method.to_string());
                        }
                    }
                    (format!("C{}", i), methods)
                })
                .collect()
        })
        .collect()
}

fn program(classes: &Classes) -> ProgramModel {
    classes
        .iter()
        .fold(ProgramModel::builder(), |b, (class, methods)| {
            b.class(class.as_str(), methods.iter().map(String::as_str))
        })
        .build()
        .unwrap()
}

/// Backtracking over class offsets in `0..=MAX_CLASS_OFFSET` and method
/// offsets in `[-class, bound - class]`, one class at a time
struct OffsetSearch<'a> {
    rows: &'a [Vec<usize>],
    bound: i64,
    distinct: bool,
    class_off: Vec<i64>,
    method_off: Vec<Option<i64>>,
    used: HashSet<i64>,
}

impl OffsetSearch<'_> {
    fn class(&mut self, i: usize) -> bool {
        let rows = self.rows;
        let Some(row) = rows.get(i) else {
            return true;
        };
        for c in 0..=MAX_CLASS_OFFSET {
            if self.distinct && self.class_off[..i].contains(&c) {
                continue;
            }
            let slots: Vec<i64> = row
                .iter()
                .filter_map(|&m| self.method_off[m])
                .map(|m| c + m)
                .collect();
            let mut fresh = HashSet::new();
            let fits = slots.iter().all(|&s| {
                (0..=self.bound).contains(&s) && !self.used.contains(&s) && fresh.insert(s)
            });
            if !fits {
                continue;
            }

            self.class_off[i] = c;
            self.used.extend(&slots);
            let free: Vec<usize> = row
                .iter()
                .copied()
                .filter(|&m| self.method_off[m].is_none())
                .collect();
            if self.methods(i, c, &free) {
                return true;
            }
            for s in &slots {
                self.used.remove(s);
            }
        }
        false
    }

    fn methods(&mut self, i: usize, c: i64, free: &[usize]) -> bool {
        let Some((&m, rest)) = free.split_first() else {
            return self.class(i + 1);
        };
        for slot in 0..=self.bound {
            if !self.used.insert(slot) {
                continue;
            }
            self.method_off[m] = Some(slot - c);
            if self.methods(i, c, rest) {
                return true;
            }
            self.method_off[m] = None;
            self.used.remove(&slot);
        }
        false
    }
}

fn has_layout(classes: &Classes, bound: i64, distinct: bool) -> bool {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let rows: Vec<Vec<usize>> = classes
        .iter()
        .map(|(_, methods)| {
            methods
                .iter()
                .map(|m| {
                    let next = index.len();
                    *index.entry(m.as_str()).or_insert(next)
                })
                .collect()
        })
        .collect();
    let mut search = OffsetSearch {
        rows: &rows,
        bound,
        distinct,
        class_off: vec![0; rows.len()],
        method_off: vec![None; index.len()],
        used: HashSet::new(),
    };
    search.class(0)
}

fn brute_force_minimum(classes: &Classes, distinct: bool) -> i64 {
    let entries: usize = classes.iter().map(|(_, m)| m.len()).sum();
    let mut bound = (entries as i64 - 1).max(0);
    while !has_layout(classes, bound, distinct) {
        bound += 1;
    }
    bound
}

fn check_minimum(cases: &[Classes], distinct: bool) {
    let config = LayoutConfig::default().with_distinct_class_offsets(distinct);
    for classes in cases {
        let program = program(classes);
        let result = layout::compute(&program, &config).unwrap();
        assert_eq!(
            result.table_bound,
            brute_force_minimum(classes, distinct),
            "classes {:?}",
            classes
        );
        assert!(result.optimal);
    }
}

#[test]
fn test_minimum_matches_enumeration() {
    check_minimum(&fixed_cases(), true);
}

#[test]
fn test_relaxed_minimum_matches_enumeration() {
    check_minimum(&fixed_cases(), false);
}

#[test]
fn test_random_minimum_matches_enumeration() {
    check_minimum(&random_cases(0x5eed, 30), true);
}

#[test]
fn test_random_relaxed_minimum_matches_enumeration() {
    check_minimum(&random_cases(0xfeed, 30), false);
}

#[test]
fn test_feasibility_is_monotonic_in_the_hint() {
    for classes in &fixed_cases() {
        let program = program(classes);
        let minimum = brute_force_minimum(classes, true);

        let below = LayoutConfig::default().with_bound_hint(minimum - 1);
        assert!(
            matches!(
                layout::compute(&program, &below),
                Err(LayoutError::Infeasible { internal: false, .. })
            ),
            "classes {:?}",
            classes
        );
        for hint in [minimum, minimum + 2] {
            let at = LayoutConfig::default().with_bound_hint(hint);
            let result = layout::compute(&program, &at).unwrap();
            assert_eq!(result.table_bound, minimum);
        }
    }
}

#[test]
fn test_layouts_verify_and_occupancy_is_positive() {
    for classes in fixed_cases().iter().chain(&random_cases(7, 10)) {
        let program = program(classes);
        let result = layout::compute(&program, &LayoutConfig::default()).unwrap();
        assert!(result.verify(&program).is_ok());
        assert!(result.occupancy > 0.0);
        assert_eq!(result.dispatch_table().len() as i64, result.table_bound + 1);
    }
}

#[test]
fn test_parallel_budgets_agree() {
    let cases = fixed_cases();
    let classes = &cases[5];
    let program = program(classes);
    let budgets = [
        std::time::Duration::from_secs(1),
        std::time::Duration::from_secs(2),
        std::time::Duration::from_secs(3),
    ];
    let bounds: Vec<i64> = layout::solve_budgets(&program, &LayoutConfig::default(), &budgets)
        .into_iter()
        .map(|r| r.unwrap().table_bound)
        .collect();
    let minimum = brute_force_minimum(classes, true);
    assert_eq!(bounds, vec![minimum; 3]);
}
