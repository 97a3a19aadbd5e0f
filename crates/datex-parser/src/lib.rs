//! DATEX parser: converts a token stream into a script AST.

mod parse_expr;
mod parse_literal;
mod parser;

pub use parser::{parse_script, ParseResult, Parser, MAX_NESTING};
