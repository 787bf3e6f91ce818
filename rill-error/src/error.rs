use crate::{lex_error::LexError, parser_error::ParseError};
use rill_types::{Ident, Span, Spanned};
use thiserror::Error;

/// Any error produced while turning source text into bytecode.
#[derive(Debug, Error, Clone, PartialEq, Eq, Hash)]
pub enum CompileError {
    #[error("{}", error)]
    Lex { error: LexError },
    #[error("{}", error)]
    Parse { error: ParseError },
    #[error("unknown variable `{}`", name)]
    UnknownVariable { name: Ident },
    #[error("unknown function `{}`", name)]
    UnknownFunction { name: Ident },
    #[error("function `{}` is defined more than once", name)]
    DuplicateFunction { name: Ident },
    #[error("duplicate parameter `{}`", name)]
    DuplicateParameter { name: Ident },
    #[error("`{}` takes {} argument(s) but {} were supplied", name, expected, found)]
    ArityMismatch {
        name: Ident,
        expected: usize,
        found: usize,
    },
    #[error("too many live variables and temporaries in this function")]
    OutOfRegisters { span: Span },
    #[error("too many distinct wide constants in this program")]
    TooManyConstants { span: Span },
    #[error("jump displacement does not fit in 16 bits")]
    JumpTooFar { span: Span },
    #[error("`return` outside of a function")]
    ReturnOutsideFunction { span: Span },
}

impl Spanned for CompileError {
    fn span(&self) -> Span {
        match self {
            CompileError::Lex { error } => error.span(),
            CompileError::Parse { error } => error.span(),
            CompileError::UnknownVariable { name } => name.span(),
            CompileError::UnknownFunction { name } => name.span(),
            CompileError::DuplicateFunction { name } => name.span(),
            CompileError::DuplicateParameter { name } => name.span(),
            CompileError::ArityMismatch { name, .. } => name.span(),
            CompileError::OutOfRegisters { span } => span.clone(),
            CompileError::TooManyConstants { span } => span.clone(),
            CompileError::JumpTooFar { span } => span.clone(),
            CompileError::ReturnOutsideFunction { span } => span.clone(),
        }
    }
}

impl From<LexError> for CompileError {
    fn from(error: LexError) -> Self {
        CompileError::Lex { error }
    }
}

impl From<ParseError> for CompileError {
    fn from(error: ParseError) -> Self {
        CompileError::Parse { error }
    }
}
