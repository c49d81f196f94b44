//! Configuration for the layout engine
//!
//! A [`LayoutConfig`] can be built in code or loaded from a TOML file:
//!
//! ```toml
//! timeout_ms = 5000
//! distinct_class_offsets = true
//! backend = "search"
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Which solver answers the layout problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Built-in branch-and-bound search
    #[default]
    Search,
    /// External SMT solver speaking SMT-LIB2 over stdin
    #[serde(alias = "z3")]
    Smt2,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Search => write!(f, "search"),
            BackendKind::Smt2 => write!(f, "smt2"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(BackendKind::Search),
            "smt2" | "z3" => Ok(BackendKind::Smt2),
            other => Err(format!(
                "unknown backend '{}' (expected 'search' or 'smt2')",
                other
            )),
        }
    }
}

/// Configuration options for layout computation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Solve budget in milliseconds
    pub timeout_ms: u64,

    /// Give every class its own offset; turning this off allows denser
    /// tables at a higher search cost
    pub distinct_class_offsets: bool,

    /// Upper bound on the table bound; defaults to |classes| * |methods|
    pub bound_hint: Option<i64>,

    /// Solver backend
    pub backend: BackendKind,

    /// Executable used by the SMT-LIB2 backend
    pub z3_path: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            distinct_class_offsets: true,
            bound_hint: None,
            backend: BackendKind::Search,
            z3_path: "z3".to_string(),
        }
    }
}

impl LayoutConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string; missing keys keep their defaults
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Set the solve budget
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_distinct_class_offsets(mut self, distinct: bool) -> Self {
        self.distinct_class_offsets = distinct;
        self
    }

    pub fn with_bound_hint(mut self, hint: i64) -> Self {
        self.bound_hint = Some(hint);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_z3_path(mut self, path: impl Into<String>) -> Self {
        self.z3_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LayoutConfig::default();
        assert_eq!(config.timeout_ms, 10_000);
        assert!(config.distinct_class_offsets);
        assert_eq!(config.bound_hint, None);
        assert_eq!(config.backend, BackendKind::Search);
        assert_eq!(config.z3_path, "z3");
    }

    #[test]
    fn test_builder_pattern() {
        let config = LayoutConfig::new()
            .with_timeout_ms(250)
            .with_bound_hint(7)
            .with_backend(BackendKind::Smt2);

        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.bound_hint, Some(7));
        assert_eq!(config.backend, BackendKind::Smt2);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = LayoutConfig::from_toml(
            r#"
timeout_ms = 1500
backend = "smt2"
"#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.backend, BackendKind::Smt2);
        assert!(config.distinct_class_offsets);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let result = LayoutConfig::from_toml("timeout = 10");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("search".parse::<BackendKind>(), Ok(BackendKind::Search));
        assert_eq!("z3".parse::<BackendKind>(), Ok(BackendKind::Smt2));
        assert!("cplex".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_spellings_match_in_toml() {
        for (spelling, expected) in [
            ("search", BackendKind::Search),
            ("smt2", BackendKind::Smt2),
            ("z3", BackendKind::Smt2),
        ] {
            let config = LayoutConfig::from_toml(&format!("backend = \"{}\"", spelling)).unwrap();
            assert_eq!(config.backend, expected);
            assert_eq!(spelling.parse::<BackendKind>(), Ok(expected));
        }
    }
}
