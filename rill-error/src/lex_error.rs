use rill_types::{Span, Spanned};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
#[error("{}", kind)]
pub struct LexError {
    pub span: Span,
    pub kind: LexErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum LexErrorKind {
    #[error("invalid character")]
    InvalidCharacter { position: usize, character: char },
    #[error("integer literal does not fit a 64-bit signed integer")]
    IntLiteralOutOfRange { position: usize },
}

impl Spanned for LexError {
    fn span(&self) -> Span {
        self.span.clone()
    }
}
