use rill_bytecode::InvalidOpcode;
use std::io;
use thiserror::Error;

/// A runtime error. Execution stops at the first trap; no instruction has
/// partial effects.
#[derive(Debug, Error)]
pub enum Trap {
    #[error("division by zero")]
    DivisionByZero,
    #[error("call stack overflow")]
    StackOverflow,
    #[error("return without a call frame")]
    CallStackUnderflow,
    #[error("program counter out of bounds at {}", pc)]
    PcOutOfBounds { pc: i64 },
    #[error("constant index {} out of bounds", index)]
    ConstantOutOfBounds { index: u16 },
    #[error(transparent)]
    InvalidOpcode(#[from] InvalidOpcode),
    #[error("expected an integer on input")]
    Input,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
