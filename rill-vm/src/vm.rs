use crate::trap::Trap;
use rill_bytecode::{printer::render_instruction, Instruction, Opcode, Program};
use std::io::{BufRead, Write};

/// Default size of the register file, in bytes of i64 slots.
pub const DEFAULT_MEMORY_BYTES: usize = 1024 * 1024;

/// Registers addressable from one call frame.
const FRAME_REGS: usize = 0x100;

/// The interpreter. One flat slab of i64 registers holds every call
/// frame; `Call` slides a window up the slab and `Retr`/`Reti` slide it
/// back down, so calls never allocate.
pub struct Vm<R, W> {
    memory: Vec<i64>,
    input: R,
    output: W,
    trace: bool,
}

impl<R: BufRead, W: Write> Vm<R, W> {
    pub fn new(input: R, output: W) -> Vm<R, W> {
        Vm::with_memory_bytes(input, output, DEFAULT_MEMORY_BYTES)
    }

    pub fn with_memory_bytes(input: R, output: W, bytes: usize) -> Vm<R, W> {
        let slots = (bytes / std::mem::size_of::<i64>()).max(FRAME_REGS);
        Vm {
            memory: vec![0; slots],
            input,
            output,
            trace: false,
        }
    }

    /// When enabled, every instruction is logged at TRACE level before it
    /// executes.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs the program to its `Exit` instruction and returns the exit
    /// value.
    pub fn run(&mut self, program: &Program) -> Result<i64, Trap> {
        let mut pc = 0usize;
        let mut base = 0usize;
        loop {
            let inst = *program
                .code
                .get(pc)
                .ok_or(Trap::PcOutOfBounds { pc: pc as i64 })?;
            if self.trace {
                tracing::trace!(pc, base, "{}", render_instruction(inst, pc, program));
            }
            match inst.opcode()? {
                // Commutative binary instructions.
                Opcode::AddRr => self.binary_rr(base, inst, |b, c| b.wrapping_add(c)),
                Opcode::MulRr => self.binary_rr(base, inst, |b, c| b.wrapping_mul(c)),
                Opcode::EqRr => self.binary_rr(base, inst, |b, c| (b == c) as i64),
                Opcode::NeRr => self.binary_rr(base, inst, |b, c| (b != c) as i64),
                Opcode::AddRi => self.binary_ri(base, inst, |b, c| b.wrapping_add(c)),
                Opcode::MulRi => self.binary_ri(base, inst, |b, c| b.wrapping_mul(c)),
                Opcode::EqRi => self.binary_ri(base, inst, |b, c| (b == c) as i64),
                Opcode::NeRi => self.binary_ri(base, inst, |b, c| (b != c) as i64),
                // Noncommutative binary instructions.
                Opcode::SubRr => self.binary_rr(base, inst, |b, c| b.wrapping_sub(c)),
                Opcode::DivRr => self.try_binary_rr(base, inst, div)?,
                Opcode::ModRr => self.try_binary_rr(base, inst, rem)?,
                Opcode::LtRr => self.binary_rr(base, inst, |b, c| (b < c) as i64),
                Opcode::LeRr => self.binary_rr(base, inst, |b, c| (b <= c) as i64),
                Opcode::SubRi => self.binary_ri(base, inst, |b, c| b.wrapping_sub(c)),
                Opcode::DivRi => self.try_binary_ri(base, inst, div)?,
                Opcode::ModRi => self.try_binary_ri(base, inst, rem)?,
                Opcode::LtRi => self.binary_ri(base, inst, |b, c| (b < c) as i64),
                Opcode::LeRi => self.binary_ri(base, inst, |b, c| (b <= c) as i64),
                Opcode::SubIr => self.binary_ir(base, inst, |b, c| b.wrapping_sub(c)),
                Opcode::DivIr => self.try_binary_ir(base, inst, div)?,
                Opcode::ModIr => self.try_binary_ir(base, inst, rem)?,
                Opcode::LtIr => self.binary_ir(base, inst, |b, c| (b < c) as i64),
                Opcode::LeIr => self.binary_ir(base, inst, |b, c| (b <= c) as i64),
                // Unary instructions.
                Opcode::Neg => {
                    let value = self.reg(base, inst.b()).wrapping_neg();
                    self.set_reg(base, inst.a(), value);
                }
                Opcode::Not => {
                    let value = (self.reg(base, inst.b()) == 0) as i64;
                    self.set_reg(base, inst.a(), value);
                }
                // Move instructions.
                Opcode::Movi => self.set_reg(base, inst.a(), inst.d() as i64),
                Opcode::Movr => {
                    let value = self.reg(base, inst.b());
                    self.set_reg(base, inst.a(), value);
                }
                Opcode::Loadk => {
                    let index = inst.d() as u16;
                    let value = program
                        .constant(index)
                        .ok_or(Trap::ConstantOutOfBounds { index })?;
                    self.set_reg(base, inst.a(), value);
                }
                // Jump instructions.
                Opcode::Jmp => {
                    pc = jump_target(pc, inst)?;
                    continue;
                }
                Opcode::Jt => {
                    if self.reg(base, inst.a()) != 0 {
                        pc = jump_target(pc, inst)?;
                        continue;
                    }
                }
                Opcode::Jf => {
                    if self.reg(base, inst.a()) == 0 {
                        pc = jump_target(pc, inst)?;
                        continue;
                    }
                }
                // Call/ret instructions.
                Opcode::Call => {
                    let a = inst.a() as usize;
                    let target = jump_target_value(pc, self.memory[base + a])?;
                    let new_base = base + a + 1;
                    if new_base + FRAME_REGS > self.memory.len() {
                        return Err(Trap::StackOverflow);
                    }
                    // The return slot doubles as the saved pc.
                    self.memory[base + a] = pc as i64;
                    base = new_base;
                    pc = target;
                    continue;
                }
                Opcode::Retr => {
                    let value = self.reg(base, inst.a());
                    (pc, base) = self.pop_frame(program, base, value)?;
                    continue;
                }
                Opcode::Reti => {
                    let value = inst.d() as i64;
                    (pc, base) = self.pop_frame(program, base, value)?;
                    continue;
                }
                // System instructions.
                Opcode::Exit => return Ok(self.reg(base, inst.a())),
                Opcode::In => {
                    let value = self.read_int()?;
                    self.set_reg(base, inst.a(), value);
                }
                Opcode::Out => {
                    let value = self.reg(base, inst.a());
                    writeln!(self.output, "{value}")?;
                }
            }
            pc += 1;
        }
    }

    fn reg(&self, base: usize, reg: u8) -> i64 {
        self.memory[base + reg as usize]
    }

    fn set_reg(&mut self, base: usize, reg: u8, value: i64) {
        self.memory[base + reg as usize] = value;
    }

    fn binary_rr(&mut self, base: usize, inst: Instruction, f: impl Fn(i64, i64) -> i64) {
        let value = f(self.reg(base, inst.b()), self.reg(base, inst.c()));
        self.set_reg(base, inst.a(), value);
    }

    fn binary_ri(&mut self, base: usize, inst: Instruction, f: impl Fn(i64, i64) -> i64) {
        let value = f(self.reg(base, inst.b()), inst.c() as i8 as i64);
        self.set_reg(base, inst.a(), value);
    }

    fn binary_ir(&mut self, base: usize, inst: Instruction, f: impl Fn(i64, i64) -> i64) {
        let value = f(inst.b() as i8 as i64, self.reg(base, inst.c()));
        self.set_reg(base, inst.a(), value);
    }

    fn try_binary_rr(
        &mut self,
        base: usize,
        inst: Instruction,
        f: impl Fn(i64, i64) -> Result<i64, Trap>,
    ) -> Result<(), Trap> {
        let value = f(self.reg(base, inst.b()), self.reg(base, inst.c()))?;
        self.set_reg(base, inst.a(), value);
        Ok(())
    }

    fn try_binary_ri(
        &mut self,
        base: usize,
        inst: Instruction,
        f: impl Fn(i64, i64) -> Result<i64, Trap>,
    ) -> Result<(), Trap> {
        let value = f(self.reg(base, inst.b()), inst.c() as i8 as i64)?;
        self.set_reg(base, inst.a(), value);
        Ok(())
    }

    fn try_binary_ir(
        &mut self,
        base: usize,
        inst: Instruction,
        f: impl Fn(i64, i64) -> Result<i64, Trap>,
    ) -> Result<(), Trap> {
        let value = f(inst.b() as i8 as i64, self.reg(base, inst.c()))?;
        self.set_reg(base, inst.a(), value);
        Ok(())
    }

    /// Unwinds one call frame, storing the return value into the caller's
    /// call register. Returns the new pc and base.
    fn pop_frame(
        &mut self,
        program: &Program,
        base: usize,
        value: i64,
    ) -> Result<(usize, usize), Trap> {
        if base == 0 {
            return Err(Trap::CallStackUnderflow);
        }
        let call_pc = self.memory[base - 1];
        let call_pc = usize::try_from(call_pc).map_err(|_| Trap::PcOutOfBounds { pc: call_pc })?;
        let call_inst = program
            .code
            .get(call_pc)
            .ok_or(Trap::PcOutOfBounds { pc: call_pc as i64 })?;
        self.memory[base - 1] = value;
        let base = base
            .checked_sub(call_inst.a() as usize + 1)
            .ok_or(Trap::CallStackUnderflow)?;
        Ok((call_pc + 1, base))
    }

    /// Reads one whitespace-delimited integer token, scanf-style.
    fn read_int(&mut self) -> Result<i64, Trap> {
        loop {
            let available = self.input.fill_buf()?;
            if available.is_empty() {
                return Err(Trap::Input);
            }
            let skip = available
                .iter()
                .take_while(|byte| byte.is_ascii_whitespace())
                .count();
            let exhausted = skip == available.len();
            self.input.consume(skip);
            if !exhausted {
                break;
            }
        }
        let mut token = Vec::new();
        loop {
            let available = self.input.fill_buf()?;
            let taken = available
                .iter()
                .take_while(|byte| !byte.is_ascii_whitespace())
                .count();
            token.extend_from_slice(&available[..taken]);
            let exhausted = taken == available.len();
            self.input.consume(taken);
            if !exhausted || taken == 0 {
                break;
            }
        }
        std::str::from_utf8(&token)
            .ok()
            .and_then(|token| token.parse().ok())
            .ok_or(Trap::Input)
    }
}

fn div(lhs: i64, rhs: i64) -> Result<i64, Trap> {
    if rhs == 0 {
        return Err(Trap::DivisionByZero);
    }
    Ok(lhs.wrapping_div(rhs))
}

fn rem(lhs: i64, rhs: i64) -> Result<i64, Trap> {
    if rhs == 0 {
        return Err(Trap::DivisionByZero);
    }
    Ok(lhs.wrapping_rem(rhs))
}

fn jump_target(pc: usize, inst: Instruction) -> Result<usize, Trap> {
    jump_target_value(pc, inst.d() as i64)
}

fn jump_target_value(pc: usize, displacement: i64) -> Result<usize, Trap> {
    // Saturating so arbitrary call-register contents cannot overflow; a
    // saturated target is out of bounds and traps on the next fetch.
    let target = (pc as i64).saturating_add(displacement).saturating_add(1);
    usize::try_from(target).map_err(|_| Trap::PcOutOfBounds { pc: target })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_bytecode::{Instruction, Opcode, Program};
    use std::io;

    fn run(program: &Program) -> Result<i64, Trap> {
        Vm::new(io::empty(), io::sink()).run(program)
    }

    #[test]
    fn exit_returns_the_register_value() {
        let program = Program::new(
            vec![
                Instruction::new_ad(Opcode::Movi, 0, 42),
                Instruction::new_abc(Opcode::Exit, 0, 0, 0),
            ],
            vec![],
        );
        assert_eq!(run(&program).unwrap(), 42);
    }

    #[test]
    fn jt_jumps_on_nonzero() {
        let program = Program::new(
            vec![
                Instruction::new_ad(Opcode::Movi, 0, 1),
                Instruction::new_ad(Opcode::Jt, 0, 1),
                Instruction::new_ad(Opcode::Movi, 0, 99),
                Instruction::new_abc(Opcode::Exit, 0, 0, 0),
            ],
            vec![],
        );
        assert_eq!(run(&program).unwrap(), 1);
    }

    #[test]
    fn division_by_zero_traps() {
        let program = Program::new(
            vec![
                Instruction::new_ad(Opcode::Movi, 0, 1),
                Instruction::new_ad(Opcode::Movi, 1, 0),
                Instruction::new_abc(Opcode::DivRr, 2, 0, 1),
                Instruction::new_abc(Opcode::Exit, 2, 0, 0),
            ],
            vec![],
        );
        assert!(matches!(run(&program), Err(Trap::DivisionByZero)));
    }

    #[test]
    fn running_off_the_end_traps() {
        let program = Program::new(vec![Instruction::new_ad(Opcode::Movi, 0, 1)], vec![]);
        assert!(matches!(
            run(&program),
            Err(Trap::PcOutOfBounds { pc: 1 })
        ));
    }

    #[test]
    fn return_without_a_frame_traps() {
        let program = Program::new(vec![Instruction::new_ad(Opcode::Reti, 0, 0)], vec![]);
        assert!(matches!(run(&program), Err(Trap::CallStackUnderflow)));
    }

    #[test]
    fn loadk_reads_the_constant_pool() {
        let program = Program::new(
            vec![
                Instruction::new_ad(Opcode::Loadk, 0, 0),
                Instruction::new_abc(Opcode::Exit, 0, 0, 0),
            ],
            vec![1 << 40],
        );
        assert_eq!(run(&program).unwrap(), 1 << 40);
    }

    #[test]
    fn loadk_out_of_range_traps() {
        let program = Program::new(
            vec![Instruction::new_ad(Opcode::Loadk, 0, 3)],
            vec![],
        );
        assert!(matches!(
            run(&program),
            Err(Trap::ConstantOutOfBounds { index: 3 })
        ));
    }

    #[test]
    fn deep_recursion_overflows_the_stack() {
        // The call jumps back to the start, so frames pile up forever.
        let program = Program::new(
            vec![
                Instruction::new_ad(Opcode::Movi, 0, -2),
                Instruction::new_abc(Opcode::Call, 0, 0, 0),
            ],
            vec![],
        );
        assert!(matches!(run(&program), Err(Trap::StackOverflow)));
    }

    #[test]
    fn call_with_a_huge_displacement_traps() {
        let program = Program::new(
            vec![
                Instruction::new_ad(Opcode::Loadk, 0, 0),
                Instruction::new_abc(Opcode::Call, 0, 0, 0),
            ],
            vec![i64::MAX],
        );
        assert!(matches!(run(&program), Err(Trap::PcOutOfBounds { .. })));
    }

    #[test]
    fn input_trap_on_empty_input() {
        let program = Program::new(
            vec![
                Instruction::new_abc(Opcode::In, 0, 0, 0),
                Instruction::new_abc(Opcode::Exit, 0, 0, 0),
            ],
            vec![],
        );
        assert!(matches!(run(&program), Err(Trap::Input)));
    }

    #[test]
    fn reads_whitespace_separated_integers() {
        let program = Program::new(
            vec![
                Instruction::new_abc(Opcode::In, 0, 0, 0),
                Instruction::new_abc(Opcode::In, 1, 0, 0),
                Instruction::new_abc(Opcode::AddRr, 0, 0, 1),
                Instruction::new_abc(Opcode::Exit, 0, 0, 0),
            ],
            vec![],
        );
        let input = io::BufReader::new(&b"  40\n\t-38 "[..]);
        let mut vm = Vm::new(input, io::sink());
        assert_eq!(vm.run(&program).unwrap(), 2);
    }
}
