pub use {
    crate::token::{lex, Token, TokenKind},
    extension_trait::extension_trait,
    num_bigint::BigUint,
    num_traits::cast::ToPrimitive,
    rill_bytecode::{Instruction, Opcode, Program},
    rill_error::{
        error::CompileError,
        lex_error::{LexError, LexErrorKind},
        parser_error::{ParseError, ParseErrorKind},
    },
    rill_types::{Ident, Span, Spanned},
    std::{path::PathBuf, sync::Arc},
    unicode_xid::UnicodeXID,
};
