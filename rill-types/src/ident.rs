use crate::{span::Span, Spanned};
use std::{
    cmp::{Ord, Ordering},
    fmt,
    hash::{Hash, Hasher},
};

/// An identifier whose text is backed by its source span.
#[derive(Clone)]
pub struct Ident {
    span: Span,
}

impl Ident {
    pub fn new(span: Span) -> Ident {
        Ident { span }
    }

    pub fn as_str(&self) -> &str {
        self.span.as_str()
    }
}

impl Spanned for Ident {
    fn span(&self) -> Span {
        self.span.clone()
    }
}

impl PartialEq for Ident {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Ident {}

impl PartialOrd for Ident {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ident {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for Ident {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ident({})", self.as_str())
    }
}
