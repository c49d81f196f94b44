//! Lexer for class/method descriptions using logos

use logos::Logos;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // Delimiters
    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,

    // Method separators
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Comments (skip)
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[regex(r"/\*([^*]|\*[^/])*\*/", logos::skip)]
    BlockComment,

    /// Text the lexer could not match; kept so the grammar reports it
    Invalid(String),
}

/// Lex input string into tokens with spans
///
/// Unrecognized input becomes [`Token::Invalid`] instead of being dropped, so
/// a stray character fails the parse at its own location.
pub fn lex(input: &str) -> impl Iterator<Item = (Token, Span)> + '_ {
    Token::lexer(input)
        .spanned()
        .map(move |(tok, span)| match tok {
            Ok(t) => (t, span),
            Err(()) => (Token::Invalid(input[span.clone()].to_string()), span),
        })
}
