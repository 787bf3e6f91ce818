use thiserror::Error;

/// The operation encoded in the lowest byte of an [`Instruction`].
///
/// Binary operations come in register-register (`Rr`) and immediate forms.
/// For commutative operations a single register-immediate (`Ri`) form
/// suffices; noncommutative ones additionally need the immediate on the
/// left (`Ir`). Immediates in `Ri`/`Ir` forms are signed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Commutative binary instructions.
    AddRr, // a <- b + c
    MulRr, // a <- b * c
    EqRr,  // a <- b == c
    NeRr,  // a <- b != c
    AddRi, // a <- b + $c
    MulRi, // a <- b * $c
    EqRi,  // a <- b == $c
    NeRi,  // a <- b != $c
    // Noncommutative binary instructions.
    SubRr, // a <- b - c
    DivRr, // a <- b / c
    ModRr, // a <- b % c
    LtRr,  // a <- b < c
    LeRr,  // a <- b <= c
    SubRi, // a <- b - $c
    DivRi, // a <- b / $c
    ModRi, // a <- b % $c
    LtRi,  // a <- b < $c
    LeRi,  // a <- b <= $c
    SubIr, // a <- $b - c
    DivIr, // a <- $b / c
    ModIr, // a <- $b % c
    LtIr,  // a <- $b < c
    LeIr,  // a <- $b <= c
    // Unary instructions.
    Neg, // a <- -b
    Not, // a <- !b
    // Move instructions.
    Movi,  // a <- $d
    Movr,  // a <- b
    Loadk, // a <- constants[d]
    // Jump instructions.
    Jmp, // goto pc + d + 1
    Jt,  // if a != 0 goto pc + d + 1
    Jf,  // if a == 0 goto pc + d + 1
    // Call/ret instructions.
    Call, // a <- a(a + 1, a + 2, ..., a + b)
    Retr, // return a
    Reti, // return $d
    // System instructions.
    Exit, // exit(a)
    In,   // a <- read one integer
    Out,  // write a and a newline
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[error("invalid opcode byte {:#04x}", byte)]
pub struct InvalidOpcode {
    pub byte: u8,
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(byte: u8) -> Result<Opcode, InvalidOpcode> {
        if byte > Opcode::Out as u8 {
            return Err(InvalidOpcode { byte });
        }
        // Contiguous discriminants starting at zero, checked above.
        Ok(unsafe { core::mem::transmute::<u8, Opcode>(byte) })
    }
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::AddRr => "addrr",
            Opcode::MulRr => "mulrr",
            Opcode::EqRr => "eqrr",
            Opcode::NeRr => "nerr",
            Opcode::AddRi => "addri",
            Opcode::MulRi => "mulri",
            Opcode::EqRi => "eqri",
            Opcode::NeRi => "neri",
            Opcode::SubRr => "subrr",
            Opcode::DivRr => "divrr",
            Opcode::ModRr => "modrr",
            Opcode::LtRr => "ltrr",
            Opcode::LeRr => "lerr",
            Opcode::SubRi => "subri",
            Opcode::DivRi => "divri",
            Opcode::ModRi => "modri",
            Opcode::LtRi => "ltri",
            Opcode::LeRi => "leri",
            Opcode::SubIr => "subir",
            Opcode::DivIr => "divir",
            Opcode::ModIr => "modir",
            Opcode::LtIr => "ltir",
            Opcode::LeIr => "leir",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::Movi => "movi",
            Opcode::Movr => "movr",
            Opcode::Loadk => "loadk",
            Opcode::Jmp => "jmp",
            Opcode::Jt => "jt",
            Opcode::Jf => "jf",
            Opcode::Call => "call",
            Opcode::Retr => "retr",
            Opcode::Reti => "reti",
            Opcode::Exit => "exit",
            Opcode::In => "in",
            Opcode::Out => "out",
        }
    }
}

/// One 32-bit instruction.
///
/// The opcode lives in bits 0..8 and the `a` operand in bits 8..16. The
/// upper half is either two byte operands `b` (16..24) and `c` (24..32),
/// or a single signed 16-bit operand `d`. Fields are extracted with
/// shifts, so the encoding is independent of host endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    data: u32,
}

impl Instruction {
    pub fn new_abc(opcode: Opcode, a: u8, b: u8, c: u8) -> Instruction {
        Instruction {
            data: opcode as u32 | (a as u32) << 8 | (b as u32) << 16 | (c as u32) << 24,
        }
    }

    pub fn new_ad(opcode: Opcode, a: u8, d: i16) -> Instruction {
        Instruction {
            data: opcode as u32 | (a as u32) << 8 | (d as u16 as u32) << 16,
        }
    }

    pub fn opcode(self) -> Result<Opcode, InvalidOpcode> {
        Opcode::try_from((self.data & 0xff) as u8)
    }

    pub fn a(self) -> u8 {
        (self.data >> 8) as u8
    }

    pub fn b(self) -> u8 {
        (self.data >> 16) as u8
    }

    pub fn c(self) -> u8 {
        (self.data >> 24) as u8
    }

    pub fn d(self) -> i16 {
        (self.data >> 16) as u16 as i16
    }

    pub fn data(self) -> u32 {
        self.data
    }

    /// Replaces the `d` operand, keeping the opcode and `a` intact. Used
    /// when back-patching jump targets and call displacements.
    pub fn set_d(&mut self, d: i16) {
        self.data = (self.data & 0xffff) | (d as u16 as u32) << 16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abc_fields_round_trip() {
        let inst = Instruction::new_abc(Opcode::AddRr, 1, 2, 3);
        assert_eq!(inst.opcode(), Ok(Opcode::AddRr));
        assert_eq!(inst.a(), 1);
        assert_eq!(inst.b(), 2);
        assert_eq!(inst.c(), 3);
    }

    #[test]
    fn d_field_is_signed() {
        let inst = Instruction::new_ad(Opcode::Jmp, 0, -7);
        assert_eq!(inst.opcode(), Ok(Opcode::Jmp));
        assert_eq!(inst.d(), -7);
        let inst = Instruction::new_ad(Opcode::Movi, 3, i16::MIN);
        assert_eq!(inst.a(), 3);
        assert_eq!(inst.d(), i16::MIN);
    }

    #[test]
    fn d_overlaps_b_and_c() {
        let inst = Instruction::new_ad(Opcode::Movi, 0, 0x1234);
        assert_eq!(inst.b(), 0x34);
        assert_eq!(inst.c(), 0x12);
    }

    #[test]
    fn set_d_preserves_opcode_and_a() {
        let mut inst = Instruction::new_ad(Opcode::Jf, 9, 0);
        inst.set_d(-1);
        assert_eq!(inst.opcode(), Ok(Opcode::Jf));
        assert_eq!(inst.a(), 9);
        assert_eq!(inst.d(), -1);
    }

    #[test]
    fn opcode_decoding_rejects_junk() {
        assert_eq!(Opcode::try_from(Opcode::Out as u8), Ok(Opcode::Out));
        assert!(Opcode::try_from(Opcode::Out as u8 + 1).is_err());
        assert!(Opcode::try_from(0xff).is_err());
    }
}
