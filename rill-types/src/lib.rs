pub mod ident;
pub mod span;

pub use ident::Ident;
pub use span::Span;

/// Anything that carries a source span.
pub trait Spanned {
    fn span(&self) -> Span;
}
