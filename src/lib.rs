//! vtable-layout - compact dispatch tables by selector coloring and row displacement
//!
//! Every class and every method gets an integer offset; the dispatch slot of a
//! method on a class is the sum of the two. This library picks offsets so that
//! all slots are distinct and the largest slot is as small as possible.
//!
//! # Example
//!
//! ```rust
//! use vtable_layout::render;
//!
//! let report = render("A { f; g } B { g; h }").unwrap();
//! assert!(report.contains("table bound: 3 (optimal)"));
//! ```

pub mod error;
pub mod layout;
pub mod parser;
pub mod program;
pub mod report;

pub use error::ParseError;
pub use layout::{BackendKind, ConfigError, LayoutConfig, LayoutError, LayoutResult};
pub use parser::{parse, Document};
pub use program::{ClassDef, ModelError, ProgramModel};
pub use report::ReportFormat;

use thiserror::Error;

/// Errors that can occur anywhere in the pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Error during parsing
    #[error("parse errors: {}", format_parse_errors(.0))]
    Parse(Vec<ParseError>),

    /// Error during layout
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Error loading configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error serializing a report
    #[error("report error: {0}")]
    Report(#[from] toml::ser::Error),
}

impl From<Vec<ParseError>> for Error {
    fn from(errors: Vec<ParseError>) -> Self {
        Error::Parse(errors)
    }
}

impl From<ModelError> for Error {
    fn from(error: ModelError) -> Self {
        Error::Layout(error.into())
    }
}

fn format_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Format the error with source context where a span is known
    pub fn format(&self, source: &str, filename: &str) -> String {
        match self {
            Error::Parse(errors) => errors
                .iter()
                .map(|e| e.format(source, filename))
                .collect::<Vec<_>>()
                .join("\n"),
            Error::Layout(e) => match e.span() {
                Some(span) => {
                    let message = e.to_string();
                    error::render_report(source, filename, span, &message, &message)
                }
                None => self.to_string(),
            },
            Error::Config(_) | Error::Report(_) => self.to_string(),
        }
    }
}

/// Parse and validate a class description
pub fn parse_program(source: &str) -> Result<ProgramModel, Error> {
    let doc = parse(source)?;
    Ok(ProgramModel::from_document(&doc)?)
}

/// Parse a class description and compute its layout
pub fn compute_layout(source: &str, config: &LayoutConfig) -> Result<LayoutResult, Error> {
    let program = parse_program(source)?;
    Ok(layout::compute(&program, config)?)
}

/// Lay out a class description with the default configuration and render the
/// text report
///
/// # Example
///
/// ```rust
/// use vtable_layout::render;
///
/// let report = render("A { x } B { y }").unwrap();
/// assert!(report.contains("0: A::x"));
/// assert!(report.contains("1: B::y"));
/// ```
pub fn render(source: &str) -> Result<String, Error> {
    let result = compute_layout(source, &LayoutConfig::default())?;
    Ok(report::render_text(&result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_entry() {
        let report = render("A { f }").unwrap();
        assert!(report.contains("A = 0"));
        assert!(report.contains("0: A::f"));
        assert!(report.contains("occupancy: 1.000"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = render("A { f").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_duplicate_method_points_at_source() {
        let source = "A { f; f }";
        let err = compute_layout(source, &LayoutConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Layout(LayoutError::Model(_))));
        let formatted = err.format(source, "input.vt");
        assert!(formatted.contains("input.vt"));
        assert!(formatted.contains("more than once"));
    }

    #[test]
    fn test_empty_input() {
        let result = compute_layout("", &LayoutConfig::default()).unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(result.table_bound, 0);
        assert!(result.optimal);
    }
}
