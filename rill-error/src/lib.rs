pub mod error;
pub mod lex_error;
pub mod parser_error;
