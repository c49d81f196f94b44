//! Parser for `Class { method; ... }` descriptions

pub mod ast;
mod grammar;
pub mod lexer;

pub use ast::*;
pub use grammar::parse;
