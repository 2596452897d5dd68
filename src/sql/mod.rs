//! The query language: tokenizer, statement types and parser.

pub mod ast;
mod parser;
mod tokenizer;

pub use ast::Statement;
pub use parser::{parse, Parser};
pub use tokenizer::{Spanned, Token, Tokenizer};
