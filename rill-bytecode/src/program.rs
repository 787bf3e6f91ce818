use crate::instruction::Instruction;

/// A compiled program: the instruction stream plus the pool of constants
/// too wide for a `Movi` immediate. `Loadk` indexes the pool through its
/// `d` operand reinterpreted as unsigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub code: Vec<Instruction>,
    pub constants: Vec<i64>,
}

impl Program {
    pub fn new(code: Vec<Instruction>, constants: Vec<i64>) -> Program {
        Program { code, constants }
    }

    pub fn constant(&self, index: u16) -> Option<i64> {
        self.constants.get(index as usize).copied()
    }
}
