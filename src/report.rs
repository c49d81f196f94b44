//! Rendering of layout results
//!
//! The text report is meant for people; the TOML document is the structured
//! mapping a code generator reads back.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::layout::{LayoutResult, Offset};

/// Output format of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Toml,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "toml" => Ok(ReportFormat::Toml),
            other => Err(format!(
                "unknown format '{}' (expected 'text' or 'toml')",
                other
            )),
        }
    }
}

/// Render a result in the requested format
pub fn render(result: &LayoutResult, format: ReportFormat) -> Result<String, toml::ser::Error> {
    match format {
        ReportFormat::Text => Ok(render_text(result)),
        ReportFormat::Toml => render_toml(result),
    }
}

/// Offsets, the slot listing, the bound and the occupancy as plain text
pub fn render_text(result: &LayoutResult) -> String {
    let mut out = String::new();

    out.push_str("class offsets:\n");
    for offset in &result.class_offsets {
        let _ = writeln!(out, "  {} = {}", offset.name, offset.value);
    }
    out.push_str("method offsets:\n");
    for offset in &result.method_offsets {
        let _ = writeln!(out, "  {} = {}", offset.name, offset.value);
    }
    out.push_str("slots:\n");
    for entry in &result.entries {
        let _ = writeln!(out, "  {}: {}::{}", entry.slot, entry.class, entry.method);
    }

    let quality = if result.optimal {
        "optimal"
    } else {
        "best found within budget"
    };
    let _ = writeln!(out, "table bound: {} ({})", result.table_bound, quality);
    let _ = writeln!(out, "occupancy: {:.3}", result.occupancy);
    out
}

/// The class and method offset mapping plus the slot listing as TOML
pub fn render_toml(result: &LayoutResult) -> Result<String, toml::ser::Error> {
    toml::to_string(&LayoutDocument::from(result))
}

/// Serialized form of a [`LayoutResult`]; scalars come before tables
#[derive(Debug, Serialize)]
struct LayoutDocument<'a> {
    table_bound: i64,
    occupancy: f64,
    optimal: bool,
    classes: OffsetTable<'a>,
    methods: OffsetTable<'a>,
    entries: Vec<EntryRecord<'a>>,
}

impl<'a> From<&'a LayoutResult> for LayoutDocument<'a> {
    fn from(result: &'a LayoutResult) -> Self {
        Self {
            table_bound: result.table_bound,
            occupancy: result.occupancy,
            optimal: result.optimal,
            classes: OffsetTable(&result.class_offsets),
            methods: OffsetTable(&result.method_offsets),
            entries: result
                .entries
                .iter()
                .map(|e| EntryRecord {
                    slot: e.slot,
                    class: &e.class,
                    method: &e.method,
                })
                .collect(),
        }
    }
}

/// `name = offset` pairs in their original order
#[derive(Debug)]
struct OffsetTable<'a>(&'a [Offset]);

impl Serialize for OffsetTable<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for offset in self.0 {
            map.serialize_entry(&offset.name, &offset.value)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize)]
struct EntryRecord<'a> {
    slot: i64,
    class: &'a str,
    method: &'a str,
}
