pub mod instruction;
pub mod printer;
pub mod program;

pub use instruction::{Instruction, InvalidOpcode, Opcode};
pub use program::Program;
