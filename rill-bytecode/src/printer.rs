//! Textual rendering of instructions and whole programs.

use crate::{instruction::Instruction, program::Program, Opcode};
use std::fmt::Write;

/// Renders one instruction, without its position. `pc` is the position of
/// the instruction itself and is only used to annotate jump targets.
pub fn render_instruction(inst: Instruction, pc: usize, program: &Program) -> String {
    let opcode = match inst.opcode() {
        Ok(opcode) => opcode,
        Err(invalid) => return format!("<{invalid}>"),
    };
    let mnemonic = opcode.mnemonic();
    match opcode {
        Opcode::AddRr
        | Opcode::MulRr
        | Opcode::EqRr
        | Opcode::NeRr
        | Opcode::SubRr
        | Opcode::DivRr
        | Opcode::ModRr
        | Opcode::LtRr
        | Opcode::LeRr => {
            format!("{} r{}, r{}, r{}", mnemonic, inst.a(), inst.b(), inst.c())
        }
        Opcode::AddRi
        | Opcode::MulRi
        | Opcode::EqRi
        | Opcode::NeRi
        | Opcode::SubRi
        | Opcode::DivRi
        | Opcode::ModRi
        | Opcode::LtRi
        | Opcode::LeRi => {
            format!(
                "{} r{}, r{}, {}",
                mnemonic,
                inst.a(),
                inst.b(),
                inst.c() as i8
            )
        }
        Opcode::SubIr | Opcode::DivIr | Opcode::ModIr | Opcode::LtIr | Opcode::LeIr => {
            format!(
                "{} r{}, {}, r{}",
                mnemonic,
                inst.a(),
                inst.b() as i8,
                inst.c()
            )
        }
        Opcode::Neg | Opcode::Not | Opcode::Movr => {
            format!("{} r{}, r{}", mnemonic, inst.a(), inst.b())
        }
        Opcode::Movi => format!("{} r{}, {}", mnemonic, inst.a(), inst.d()),
        Opcode::Loadk => {
            let index = inst.d() as u16;
            match program.constant(index) {
                Some(value) => format!("{} r{}, k{} ; {}", mnemonic, inst.a(), index, value),
                None => format!("{} r{}, k{} ; <out of range>", mnemonic, inst.a(), index),
            }
        }
        Opcode::Jmp => format!("{} {} ; -> {}", mnemonic, inst.d(), jump_target(pc, inst)),
        Opcode::Jt | Opcode::Jf => format!(
            "{} r{}, {} ; -> {}",
            mnemonic,
            inst.a(),
            inst.d(),
            jump_target(pc, inst)
        ),
        Opcode::Call => format!("{} r{}, {}", mnemonic, inst.a(), inst.b()),
        Opcode::Retr | Opcode::Exit | Opcode::In | Opcode::Out => {
            format!("{} r{}", mnemonic, inst.a())
        }
        Opcode::Reti => format!("{} {}", mnemonic, inst.d()),
    }
}

fn jump_target(pc: usize, inst: Instruction) -> i64 {
    pc as i64 + inst.d() as i64 + 1
}

/// Renders a whole program, one instruction per line with its position.
pub fn disassemble(program: &Program) -> String {
    let mut output = String::new();
    for (pc, inst) in program.code.iter().enumerate() {
        let _ = writeln!(
            output,
            "{:08} {}",
            pc,
            render_instruction(*inst, pc, program)
        );
    }
    output
}
