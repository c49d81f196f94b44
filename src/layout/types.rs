//! Core types for the layout engine

use std::collections::{HashMap, HashSet};

use crate::program::ProgramModel;

use super::error::LayoutError;

/// A resolved class or method offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offset {
    pub name: String,
    pub value: i64,
}

impl Offset {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One occupied cell of the dispatch table
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotEntry {
    pub slot: i64,
    pub class: String,
    pub method: String,
}

/// The result of a layout computation
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutResult {
    /// Class offsets in declaration order
    pub class_offsets: Vec<Offset>,
    /// Method offsets in order of first declaration
    pub method_offsets: Vec<Offset>,
    /// Entries sorted by (slot, class, method)
    pub entries: Vec<SlotEntry>,
    /// Largest occupied slot, 0 for a program without entries
    pub table_bound: i64,
    pub occupancy: f64,
    /// Whether `table_bound` is proven minimal
    pub optimal: bool,
    /// Upper bound the solve was constrained to
    pub bound_hint: i64,
    /// A bound no layout can reach
    pub infeasible_bound: i64,
    pub distinct_class_offsets: bool,
}

impl LayoutResult {
    pub fn class_offset(&self, class: &str) -> Option<i64> {
        find(&self.class_offsets, class)
    }

    pub fn method_offset(&self, method: &str) -> Option<i64> {
        find(&self.method_offsets, method)
    }

    /// Slot dispatching `method` on `class`, if the class declares it
    pub fn slot_of(&self, class: &str, method: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.class == class && e.method == method)
            .map(|e| e.slot)
    }

    pub fn max_slot(&self) -> Option<i64> {
        self.entries.last().map(|e| e.slot)
    }

    /// Flat table of `table_bound + 1` cells; empty cells are `None`
    pub fn dispatch_table(&self) -> Vec<Option<(&str, &str)>> {
        let len = self.max_slot().map_or(0, |max| max as usize + 1);
        let mut table = vec![None; len];
        for entry in &self.entries {
            if let Some(cell) = usize::try_from(entry.slot)
                .ok()
                .and_then(|i| table.get_mut(i))
            {
                *cell = Some((entry.class.as_str(), entry.method.as_str()));
            }
        }
        table
    }

    /// Check the layout against the program it was computed for
    pub fn verify(&self, program: &ProgramModel) -> Result<(), LayoutError> {
        let mut seen_offsets = HashSet::new();
        for class in program.class_names() {
            let offset = self
                .class_offset(class)
                .ok_or_else(|| LayoutError::invariant(format!("class {} has no offset", class)))?;
            if offset < 0 {
                return Err(LayoutError::invariant(format!(
                    "class {} has negative offset {}",
                    class, offset
                )));
            }
            if self.distinct_class_offsets && !seen_offsets.insert(offset) {
                return Err(LayoutError::invariant(format!(
                    "class {} shares offset {} with another class",
                    class, offset
                )));
            }
        }

        if self.entries.len() != program.entry_count() {
            return Err(LayoutError::invariant(format!(
                "expected {} entries, found {}",
                program.entry_count(),
                self.entries.len()
            )));
        }

        if self.entries.len() >= 2 && self.table_bound <= self.infeasible_bound {
            return Err(LayoutError::invariant(format!(
                "table bound {} is not above the unreachable bound {}",
                self.table_bound, self.infeasible_bound
            )));
        }

        let mut occupied: HashMap<i64, (&str, &str)> = HashMap::new();
        for entry in program.entries() {
            let expected = self
                .class_offset(entry.class)
                .zip(self.method_offset(entry.method))
                .map(|(c, m)| c + m);
            let slot = self.slot_of(entry.class, entry.method);
            let slot = match (slot, expected) {
                (Some(slot), Some(expected)) if slot == expected => slot,
                _ => {
                    return Err(LayoutError::invariant(format!(
                        "slot of {}::{} does not match its offsets",
                        entry.class, entry.method
                    )))
                }
            };
            if slot < 0 || slot > self.table_bound {
                return Err(LayoutError::invariant(format!(
                    "slot {} of {}::{} lies outside [0, {}]",
                    slot, entry.class, entry.method, self.table_bound
                )));
            }
            if let Some((class, method)) = occupied.insert(slot, (entry.class, entry.method)) {
                return Err(LayoutError::invariant(format!(
                    "{}::{} and {}::{} share slot {}",
                    class, method, entry.class, entry.method, slot
                )));
            }
        }

        Ok(())
    }
}

fn find(offsets: &[Offset], name: &str) -> Option<i64> {
    offsets.iter().find(|o| o.name == name).map(|o| o.value)
}

/// Entries per slot extent, with the zero extent pinned to 1.0
pub fn occupancy(entries: usize, max_slot: i64) -> f64 {
    if entries <= 1 || max_slot <= 0 {
        1.0
    } else {
        entries as f64 / max_slot as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(slot: i64, class: &str, method: &str) -> SlotEntry {
        SlotEntry {
            slot,
            class: class.to_string(),
            method: method.to_string(),
        }
    }

    fn scenario_b() -> (ProgramModel, LayoutResult) {
        let program = ProgramModel::builder()
            .class("A", ["x"])
            .class("B", ["y"])
            .build()
            .unwrap();
        let result = LayoutResult {
            class_offsets: vec![Offset::new("A", 0), Offset::new("B", 1)],
            method_offsets: vec![Offset::new("x", 0), Offset::new("y", 0)],
            entries: vec![entry(0, "A", "x"), entry(1, "B", "y")],
            table_bound: 1,
            occupancy: occupancy(2, 1),
            optimal: true,
            bound_hint: 4,
            infeasible_bound: 0,
            distinct_class_offsets: true,
        };
        (program, result)
    }

    #[test]
    fn test_occupancy_special_cases() {
        assert_eq!(occupancy(0, 0), 1.0);
        assert_eq!(occupancy(1, 0), 1.0);
        assert_eq!(occupancy(4, 3), 4.0 / 3.0);
    }

    #[test]
    fn test_lookups() {
        let (_, result) = scenario_b();
        assert_eq!(result.class_offset("B"), Some(1));
        assert_eq!(result.method_offset("y"), Some(0));
        assert_eq!(result.slot_of("B", "y"), Some(1));
        assert_eq!(result.slot_of("B", "x"), None);
        assert_eq!(result.max_slot(), Some(1));
    }

    #[test]
    fn test_dispatch_table() {
        let (_, mut result) = scenario_b();
        result.entries[1].slot = 2;
        result.class_offsets[1].value = 2;
        assert_eq!(
            result.dispatch_table(),
            vec![Some(("A", "x")), None, Some(("B", "y"))]
        );
    }

    #[test]
    fn test_verify_accepts_valid_layout() {
        let (program, result) = scenario_b();
        assert!(result.verify(&program).is_ok());
    }

    #[test]
    fn test_verify_rejects_shared_class_offset() {
        let (program, mut result) = scenario_b();
        result.class_offsets[1].value = 0;
        result.method_offsets[1].value = 1;
        let err = result.verify(&program).unwrap_err();
        assert!(err.to_string().contains("shares offset"));

        result.distinct_class_offsets = false;
        assert!(result.verify(&program).is_ok());
    }

    #[test]
    fn test_verify_rejects_collision() {
        let (program, mut result) = scenario_b();
        result.method_offsets[1].value = -1;
        result.entries[1].slot = 0;
        let err = result.verify(&program).unwrap_err();
        assert!(err.to_string().contains("share slot 0"));
    }

    #[test]
    fn test_verify_rejects_bound_at_unreachable_bound() {
        let (program, mut result) = scenario_b();
        result.infeasible_bound = 1;
        let err = result.verify(&program).unwrap_err();
        assert!(err.to_string().contains("unreachable bound 1"));
    }

    #[test]
    fn test_verify_rejects_slot_beyond_bound() {
        let (program, mut result) = scenario_b();
        result.table_bound = 0;
        assert!(result.verify(&program).is_err());
    }
}
