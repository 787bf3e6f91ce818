//! Lexer and bytecode-emitting parser for the rill language.
//!
//! There is no syntax tree: the parser walks the token stream and emits
//! instructions directly, the way a one-pass compiler does. See
//! [`parser::Parser`] for the two-pass scheme that resolves forward calls.

pub mod parser;
mod priv_prelude;
pub mod token;

pub use crate::{
    parser::Parser,
    token::{lex, Token, TokenKind},
};

use crate::priv_prelude::*;

/// Compiles rill source text into a program.
pub fn compile(src: Arc<str>, path: Option<Arc<PathBuf>>) -> Result<Program, CompileError> {
    let tokens = lex(&src, path.clone())?;
    let full_span = Span::from_string(src, path);
    let mut parser = Parser::new(&tokens, full_span);
    parser.parse()?;
    Ok(parser.into_program())
}
