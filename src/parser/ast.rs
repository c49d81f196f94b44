//! Abstract Syntax Tree types for class/method descriptions

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// AST node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Valid identifier (alphanumeric + underscore, starts with letter/_)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(pub String);

impl Identifier {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Root AST node - every class block in source order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub classes: Vec<Spanned<ClassBlock>>,
}

/// `Name { method; method; ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct ClassBlock {
    pub name: Spanned<Identifier>,
    /// Methods exactly as written, duplicates included
    pub methods: Vec<Spanned<Identifier>>,
}

impl ClassBlock {
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.node.as_str())
    }
}
