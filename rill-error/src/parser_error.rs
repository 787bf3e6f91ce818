use rill_types::{Span, Spanned};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    #[error("expected a statement")]
    ExpectedStatement,
    #[error("expected an expression")]
    ExpectedExpression,
    #[error("expected an identifier")]
    ExpectedIdent,
    #[error("expected `{}`", word)]
    ExpectedKeyword { word: &'static str },
    #[error("expected `{}`", punct)]
    ExpectedPunct { punct: &'static str },
    #[error("expected an opening brace")]
    ExpectedOpenBrace,
    #[error("expected a comma or closing parenthesis in function arguments")]
    ExpectedCommaOrCloseParenInFnArgs,
    #[error("expected `=` or a call after this identifier")]
    ExpectedAssignmentOrCall,
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Hash)]
#[error("{}", kind)]
pub struct ParseError {
    pub span: Span,
    pub kind: ParseErrorKind,
}

impl Spanned for ParseError {
    fn span(&self) -> Span {
        self.span.clone()
    }
}
