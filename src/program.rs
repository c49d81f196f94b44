//! Program model: the validated classes and the methods each one declares
//!
//! A [`ProgramModel`] is the read-only input of every layout computation. It
//! owns the class list in declaration order and derives the distinct method
//! names and the full list of [`Entry`] values from it.

use std::collections::HashSet;

use thiserror::Error;

use crate::parser::ast::{Document, Span};

/// Errors raised while validating class declarations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// The same method name appears twice inside one class
    #[error("class '{class}' declares method '{method}' more than once")]
    DuplicateMethod {
        class: String,
        method: String,
        span: Option<Span>,
    },

    /// Two class blocks share a name
    #[error("class '{class}' is declared more than once")]
    DuplicateClass { class: String, span: Option<Span> },
}

impl ModelError {
    /// Get the source span if the error came from parsed input
    pub fn span(&self) -> Option<&Span> {
        match self {
            Self::DuplicateMethod { span, .. } | Self::DuplicateClass { span, .. } => {
                span.as_ref()
            }
        }
    }
}

/// A class and the methods it needs dispatch slots for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: String,
    pub methods: Vec<String>,
}

impl ClassDef {
    pub fn new<I, S>(name: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }
}

/// One (class, method) occurrence that needs its own table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entry<'a> {
    pub class: &'a str,
    pub method: &'a str,
}

/// Validated, immutable set of class definitions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramModel {
    classes: Vec<ClassDef>,
    methods: Vec<String>,
}

impl ProgramModel {
    /// Build a model, rejecting duplicate classes and duplicate methods within a class
    pub fn new(classes: Vec<ClassDef>) -> Result<Self, ModelError> {
        let spans = vec![None; classes.len()];
        Self::with_spans(classes, spans)
    }

    /// Start an incremental builder
    pub fn builder() -> ProgramModelBuilder {
        ProgramModelBuilder::default()
    }

    /// Build a model from a parsed document, keeping spans for error reports
    pub fn from_document(doc: &Document) -> Result<Self, ModelError> {
        let mut classes = Vec::with_capacity(doc.classes.len());
        let mut spans = Vec::with_capacity(doc.classes.len());
        for block in &doc.classes {
            let block = &block.node;
            classes.push(ClassDef::new(block.name.node.as_str(), block.method_names()));
            spans.push(Some(ClassSpans {
                name: block.name.span.clone(),
                methods: block.methods.iter().map(|m| m.span.clone()).collect(),
            }));
        }
        Self::with_spans(classes, spans)
    }

    fn with_spans(
        classes: Vec<ClassDef>,
        spans: Vec<Option<ClassSpans>>,
    ) -> Result<Self, ModelError> {
        let mut class_names = HashSet::new();
        let mut method_names = HashSet::new();
        let mut methods = Vec::new();

        for (class, spans) in classes.iter().zip(&spans) {
            if !class_names.insert(class.name.as_str()) {
                return Err(ModelError::DuplicateClass {
                    class: class.name.clone(),
                    span: spans.as_ref().map(|s| s.name.clone()),
                });
            }

            let mut seen = HashSet::new();
            for (index, method) in class.methods.iter().enumerate() {
                if !seen.insert(method.as_str()) {
                    return Err(ModelError::DuplicateMethod {
                        class: class.name.clone(),
                        method: method.clone(),
                        span: spans.as_ref().and_then(|s| s.methods.get(index).cloned()),
                    });
                }
                if method_names.insert(method.as_str()) {
                    methods.push(method.clone());
                }
            }
        }

        Ok(Self { classes, methods })
    }

    /// Classes in declaration order
    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|c| c.name.as_str())
    }

    /// Distinct method names in order of first declaration
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    /// Every declared (class, method) pair, in declaration order
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        self.classes.iter().flat_map(|class| {
            class.methods.iter().map(move |method| Entry {
                class: &class.name,
                method,
            })
        })
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn entry_count(&self) -> usize {
        self.classes.iter().map(|c| c.methods.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }
}

#[derive(Debug, Clone)]
struct ClassSpans {
    name: Span,
    methods: Vec<Span>,
}

/// Collects classes one at a time, validating on [`ProgramModelBuilder::build`]
#[derive(Debug, Default)]
pub struct ProgramModelBuilder {
    classes: Vec<ClassDef>,
}

impl ProgramModelBuilder {
    pub fn class<I, S>(mut self, name: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes.push(ClassDef::new(name, methods));
        self
    }

    pub fn build(self) -> Result<ProgramModel, ModelError> {
        ProgramModel::new(self.classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_distinct_names_and_entries() {
        let program = ProgramModel::builder()
            .class("A", ["f", "g"])
            .class("B", ["g", "h"])
            .build()
            .unwrap();

        assert_eq!(program.class_names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(
            program.method_names().collect::<Vec<_>>(),
            vec!["f", "g", "h"]
        );
        assert_eq!(program.entry_count(), 4);
        let entries: Vec<_> = program
            .entries()
            .map(|e| format!("{}::{}", e.class, e.method))
            .collect();
        assert_eq!(entries, vec!["A::f", "A::g", "B::g", "B::h"]);
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let err = ProgramModel::builder()
            .class("A", ["f", "f"])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::DuplicateMethod {
                class: "A".to_string(),
                method: "f".to_string(),
                span: None,
            }
        );
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let err = ProgramModel::builder()
            .class("A", ["f"])
            .class("A", ["g"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateClass { .. }));
        assert!(err.to_string().contains("'A'"));
    }

    #[test]
    fn test_class_and_method_may_share_a_name() {
        let program = ProgramModel::builder()
            .class("m1", ["m1"])
            .build()
            .unwrap();
        assert_eq!(program.entry_count(), 1);
    }

    #[test]
    fn test_from_document_keeps_spans() {
        let doc = parse("A { f; g; f }").unwrap();
        let err = ProgramModel::from_document(&doc).unwrap_err();
        assert_eq!(err.span(), Some(&(10..11)));
    }

    #[test]
    fn test_empty_class_has_no_entries() {
        let doc = parse("Marker {} A { f }").unwrap();
        let program = ProgramModel::from_document(&doc).unwrap();
        assert_eq!(program.class_count(), 2);
        assert_eq!(program.entry_count(), 1);
        assert!(program.class("Marker").unwrap().methods.is_empty());
    }
}
