use crate::priv_prelude::*;
use std::{collections::HashMap, mem};

pub type ParseResult<T> = Result<T, CompileError>;

/// Words that cannot be used as variable or function names.
const KEYWORDS: &[&str] = &["fn", "let", "if", "else", "while", "return", "in", "out"];

/// Registers available per call frame. Operands are single bytes.
const NUM_REGS: usize = 0x100;

/// The value of an expression while it is being compiled: either a
/// constant known at compile time or the register currently holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Value(i64),
    Reg(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Mul,
    Eq,
    Ne,
    Sub,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    fn from_token(kind: TokenKind) -> Option<BinaryOp> {
        match kind {
            TokenKind::Add => Some(BinaryOp::Add),
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::DoubleEquals => Some(BinaryOp::Eq),
            TokenKind::BangEquals => Some(BinaryOp::Ne),
            TokenKind::Sub => Some(BinaryOp::Sub),
            TokenKind::ForwardSlash => Some(BinaryOp::Div),
            TokenKind::Percent => Some(BinaryOp::Mod),
            TokenKind::LessThan => Some(BinaryOp::Lt),
            TokenKind::LessThanEq => Some(BinaryOp::Le),
            TokenKind::GreaterThan => Some(BinaryOp::Gt),
            TokenKind::GreaterThanEq => Some(BinaryOp::Ge),
            _ => None,
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Eq | BinaryOp::Ne => 1,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 2,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 4,
        }
    }

    fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    fn rr_opcode(self) -> Opcode {
        match self {
            BinaryOp::Add => Opcode::AddRr,
            BinaryOp::Mul => Opcode::MulRr,
            BinaryOp::Eq => Opcode::EqRr,
            BinaryOp::Ne => Opcode::NeRr,
            BinaryOp::Sub => Opcode::SubRr,
            BinaryOp::Div => Opcode::DivRr,
            BinaryOp::Mod => Opcode::ModRr,
            BinaryOp::Lt => Opcode::LtRr,
            BinaryOp::Le => Opcode::LeRr,
            BinaryOp::Gt | BinaryOp::Ge => unreachable!("normalized before emission"),
        }
    }

    fn ri_opcode(self) -> Opcode {
        match self {
            BinaryOp::Add => Opcode::AddRi,
            BinaryOp::Mul => Opcode::MulRi,
            BinaryOp::Eq => Opcode::EqRi,
            BinaryOp::Ne => Opcode::NeRi,
            BinaryOp::Sub => Opcode::SubRi,
            BinaryOp::Div => Opcode::DivRi,
            BinaryOp::Mod => Opcode::ModRi,
            BinaryOp::Lt => Opcode::LtRi,
            BinaryOp::Le => Opcode::LeRi,
            BinaryOp::Gt | BinaryOp::Ge => unreachable!("normalized before emission"),
        }
    }

    fn ir_opcode(self) -> Opcode {
        match self {
            BinaryOp::Sub => Opcode::SubIr,
            BinaryOp::Div => Opcode::DivIr,
            BinaryOp::Mod => Opcode::ModIr,
            BinaryOp::Lt => Opcode::LtIr,
            BinaryOp::Le => Opcode::LeIr,
            _ => unreachable!("commutative operators have no ir form"),
        }
    }
}

fn fold_unary_op(op: UnaryOp, value: i64) -> i64 {
    match op {
        UnaryOp::Neg => value.wrapping_neg(),
        UnaryOp::Not => (value == 0) as i64,
    }
}

/// Folds a binary operator over two constants. Division and remainder by
/// a constant zero are left for the runtime to trap on.
fn fold_binary_op(op: BinaryOp, lhs: i64, rhs: i64) -> Option<i64> {
    match op {
        BinaryOp::Add => Some(lhs.wrapping_add(rhs)),
        BinaryOp::Mul => Some(lhs.wrapping_mul(rhs)),
        BinaryOp::Eq => Some((lhs == rhs) as i64),
        BinaryOp::Ne => Some((lhs != rhs) as i64),
        BinaryOp::Sub => Some(lhs.wrapping_sub(rhs)),
        BinaryOp::Div => (rhs != 0).then(|| lhs.wrapping_div(rhs)),
        BinaryOp::Mod => (rhs != 0).then(|| lhs.wrapping_rem(rhs)),
        BinaryOp::Lt => Some((lhs < rhs) as i64),
        BinaryOp::Le => Some((lhs <= rhs) as i64),
        BinaryOp::Gt => Some((lhs > rhs) as i64),
        BinaryOp::Ge => Some((lhs >= rhs) as i64),
    }
}

#[derive(Debug, Clone, Copy)]
struct FnInfo {
    pos: usize,
    arity: usize,
}

/// A one-pass compiling parser: statements are parsed and instructions
/// emitted in the same walk, with no syntax tree in between.
///
/// The whole token stream is compiled twice. The first pass records each
/// function's bytecode position and arity (emitting placeholder call
/// displacements); the second emits final code. Both passes emit the same
/// number of instructions for every construct, so the recorded positions
/// stay valid.
pub struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
    full_span: Span,
    code: Vec<Instruction>,
    constants: Vec<i64>,
    /// Pool index of each constant, for deduplication.
    constant_indices: HashMap<i64, u16>,
    functions: HashMap<String, FnInfo>,
    /// In-scope variables of the current frame, innermost last.
    locals: Vec<(Ident, u8)>,
    /// First register not holding a variable or live temporary.
    first_free_reg: usize,
    in_function: bool,
    final_pass: bool,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], full_span: Span) -> Parser<'a> {
        Parser {
            tokens,
            index: 0,
            full_span,
            code: Vec::new(),
            constants: Vec::new(),
            constant_indices: HashMap::new(),
            functions: HashMap::new(),
            locals: Vec::new(),
            first_free_reg: 0,
            in_function: false,
            final_pass: false,
        }
    }

    pub fn parse(&mut self) -> ParseResult<()> {
        self.final_pass = false;
        self.parse_program()?;
        self.index = 0;
        self.code.clear();
        self.constants.clear();
        self.constant_indices.clear();
        self.locals.clear();
        self.first_free_reg = 0;
        self.final_pass = true;
        self.parse_program()
    }

    pub fn into_program(self) -> Program {
        Program::new(self.code, self.constants)
    }

    // Token access.

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|token| token.kind)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    /// A span covering the last character of the source, for errors and
    /// code emitted past the final token.
    fn eof_span(&self) -> Span {
        let src = self.full_span.src();
        let end = self.full_span.end();
        let mut start = end.saturating_sub(1);
        while !src.is_char_boundary(start) {
            start -= 1;
        }
        Span::new(src.clone(), start, end, self.full_span.path().cloned()).unwrap()
    }

    /// The span of the token at the current position, or a span just past
    /// the last token if the stream is exhausted.
    fn current_span(&self) -> Span {
        match self.peek() {
            Some(token) => token.span.clone(),
            None => self.eof_span(),
        }
    }

    fn error_here(&self, kind: ParseErrorKind) -> CompileError {
        CompileError::Parse {
            error: ParseError {
                span: self.current_span(),
                kind,
            },
        }
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn take(&mut self, kind: TokenKind) -> bool {
        if self.peek_is(kind) {
            self.index += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind, punct: &'static str) -> ParseResult<Span> {
        if self.peek_is(kind) {
            return Ok(self.bump().unwrap().span);
        }
        Err(self.error_here(ParseErrorKind::ExpectedPunct { punct }))
    }

    fn peek_is_keyword(&self, word: &str) -> bool {
        match self.peek() {
            Some(token) => token.kind == TokenKind::Ident && token.span.as_str() == word,
            None => false,
        }
    }

    fn take_keyword(&mut self, word: &str) -> bool {
        if self.peek_is_keyword(word) {
            self.index += 1;
            return true;
        }
        false
    }

    fn expect_keyword(&mut self, word: &'static str) -> ParseResult<Span> {
        if self.peek_is_keyword(word) {
            return Ok(self.bump().unwrap().span);
        }
        Err(self.error_here(ParseErrorKind::ExpectedKeyword { word }))
    }

    fn expect_ident(&mut self) -> ParseResult<Ident> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Ident => {
                if KEYWORDS.contains(&token.span.as_str()) {
                    return Err(self.error_here(ParseErrorKind::ExpectedIdent));
                }
                Ok(Ident::new(self.bump().unwrap().span))
            }
            _ => Err(self.error_here(ParseErrorKind::ExpectedIdent)),
        }
    }

    // Register and constant bookkeeping.

    fn find_variable(&self, name: &str) -> Option<u8> {
        self.locals
            .iter()
            .rev()
            .find(|(ident, _)| ident.as_str() == name)
            .map(|&(_, reg)| reg)
    }

    fn next_reg(&mut self, span: &Span) -> ParseResult<u8> {
        if self.first_free_reg >= NUM_REGS {
            return Err(CompileError::OutOfRegisters { span: span.clone() });
        }
        let reg = self.first_free_reg as u8;
        self.first_free_reg += 1;
        Ok(reg)
    }

    /// Frees the operand's register if it is a temporary. A freed
    /// temporary is always the most recently allocated register.
    fn free_operand(&mut self, operand: Operand) {
        if let Operand::Reg(reg) = operand {
            if reg as usize >= self.locals.len() {
                debug_assert_eq!(reg as usize + 1, self.first_free_reg);
                self.first_free_reg -= 1;
            }
        }
    }

    /// Frees two operands, higher register first, so the temporary stack
    /// unwinds in order regardless of evaluation order.
    fn free_pair(&mut self, x: Operand, y: Operand) {
        match (x, y) {
            (Operand::Reg(a), Operand::Reg(b)) if a < b => {
                self.free_operand(y);
                self.free_operand(x);
            }
            _ => {
                self.free_operand(x);
                self.free_operand(y);
            }
        }
    }

    fn add_constant(&mut self, value: i64, span: &Span) -> ParseResult<u16> {
        if let Some(&index) = self.constant_indices.get(&value) {
            return Ok(index);
        }
        let index = self.constants.len();
        if index > u16::MAX as usize {
            return Err(CompileError::TooManyConstants { span: span.clone() });
        }
        let index = index as u16;
        self.constants.push(value);
        self.constant_indices.insert(value, index);
        Ok(index)
    }

    fn emit(&mut self, inst: Instruction) -> usize {
        let pos = self.code.len();
        self.code.push(inst);
        pos
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn patch_jump(&mut self, pos: usize, target: usize, span: &Span) -> ParseResult<()> {
        let displacement = target as i64 - pos as i64 - 1;
        let displacement = i16::try_from(displacement)
            .map_err(|_| CompileError::JumpTooFar { span: span.clone() })?;
        self.code[pos].set_d(displacement);
        Ok(())
    }

    fn patch_jump_list(&mut self, list: &[usize], target: usize, span: &Span) -> ParseResult<()> {
        for &pos in list {
            self.patch_jump(pos, target, span)?;
        }
        Ok(())
    }

    /// Stores the operand into the given register.
    fn operand_to_reg(&mut self, operand: Operand, reg: u8, span: &Span) -> ParseResult<()> {
        match operand {
            Operand::Value(value) => match i16::try_from(value) {
                Ok(value) => {
                    self.emit(Instruction::new_ad(Opcode::Movi, reg, value));
                }
                Err(_) => {
                    let index = self.add_constant(value, span)?;
                    self.emit(Instruction::new_ad(Opcode::Loadk, reg, index as i16));
                }
            },
            Operand::Reg(src) => {
                if src != reg {
                    self.emit(Instruction::new_abc(Opcode::Movr, reg, src, 0));
                }
            }
        }
        Ok(())
    }

    /// Makes sure the operand lives in a register, materializing constants
    /// into the next free one.
    fn operand_to_any_reg(&mut self, operand: Operand, span: &Span) -> ParseResult<u8> {
        match operand {
            Operand::Reg(reg) => Ok(reg),
            Operand::Value(_) => {
                let reg = self.next_reg(span)?;
                self.operand_to_reg(operand, reg, span)?;
                Ok(reg)
            }
        }
    }

    // Expression codegen.

    fn emit_unary_op(&mut self, op: UnaryOp, operand: Operand, span: &Span) -> ParseResult<Operand> {
        if let Operand::Value(value) = operand {
            return Ok(Operand::Value(fold_unary_op(op, value)));
        }
        let src = self.operand_to_any_reg(operand, span)?;
        self.free_operand(Operand::Reg(src));
        let dst = self.next_reg(span)?;
        let opcode = match op {
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Not => Opcode::Not,
        };
        self.emit(Instruction::new_abc(opcode, dst, src, 0));
        Ok(Operand::Reg(dst))
    }

    fn emit_binary_op(
        &mut self,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
        span: &Span,
    ) -> ParseResult<Operand> {
        if let (Operand::Value(lhs), Operand::Value(rhs)) = (lhs, rhs) {
            if let Some(value) = fold_binary_op(op, lhs, rhs) {
                return Ok(Operand::Value(value));
            }
        }
        // There are no gt/ge instructions; swap the operands instead.
        let (op, lhs, rhs) = match op {
            BinaryOp::Gt => (BinaryOp::Lt, rhs, lhs),
            BinaryOp::Ge => (BinaryOp::Le, rhs, lhs),
            _ => (op, lhs, rhs),
        };
        if op.is_commutative() {
            let (lhs, rhs) = match lhs {
                Operand::Value(_) => (rhs, lhs),
                _ => (lhs, rhs),
            };
            if let Operand::Value(value) = rhs {
                if let Ok(imm) = i8::try_from(value) {
                    let src = self.operand_to_any_reg(lhs, span)?;
                    self.free_operand(Operand::Reg(src));
                    let dst = self.next_reg(span)?;
                    self.emit(Instruction::new_abc(op.ri_opcode(), dst, src, imm as u8));
                    return Ok(Operand::Reg(dst));
                }
            }
        } else {
            match (lhs, rhs) {
                (lhs, Operand::Value(value)) => {
                    if let Ok(imm) = i8::try_from(value) {
                        let src = self.operand_to_any_reg(lhs, span)?;
                        self.free_operand(Operand::Reg(src));
                        let dst = self.next_reg(span)?;
                        self.emit(Instruction::new_abc(op.ri_opcode(), dst, src, imm as u8));
                        return Ok(Operand::Reg(dst));
                    }
                }
                (Operand::Value(value), rhs) => {
                    if let Ok(imm) = i8::try_from(value) {
                        let src = self.operand_to_any_reg(rhs, span)?;
                        self.free_operand(Operand::Reg(src));
                        let dst = self.next_reg(span)?;
                        self.emit(Instruction::new_abc(op.ir_opcode(), dst, imm as u8, src));
                        return Ok(Operand::Reg(dst));
                    }
                }
                _ => {}
            }
        }
        let lhs_reg = self.operand_to_any_reg(lhs, span)?;
        let rhs_reg = self.operand_to_any_reg(rhs, span)?;
        self.free_pair(Operand::Reg(lhs_reg), Operand::Reg(rhs_reg));
        let dst = self.next_reg(span)?;
        self.emit(Instruction::new_abc(op.rr_opcode(), dst, lhs_reg, rhs_reg));
        Ok(Operand::Reg(dst))
    }

    // Expression parsing.

    fn parse_expr(&mut self) -> ParseResult<Operand> {
        self.parse_binary_expr(0)
    }

    fn parse_binary_expr(&mut self, limit: u8) -> ParseResult<Operand> {
        let mut lhs = self.parse_unary_expr()?;
        while let Some(op) = self.peek_kind().and_then(BinaryOp::from_token) {
            if op.precedence() <= limit {
                break;
            }
            let span = self.current_span();
            let _ = self.bump();
            let rhs = self.parse_binary_expr(op.precedence())?;
            lhs = self.emit_binary_op(op, lhs, rhs, &span)?;
        }
        Ok(lhs)
    }

    fn parse_unary_expr(&mut self) -> ParseResult<Operand> {
        let op = match self.peek_kind() {
            Some(TokenKind::Sub) => UnaryOp::Neg,
            Some(TokenKind::Bang) => UnaryOp::Not,
            _ => return self.parse_primary_expr(),
        };
        let span = self.current_span();
        let _ = self.bump();
        let operand = self.parse_unary_expr()?;
        self.emit_unary_op(op, operand, &span)
    }

    fn parse_primary_expr(&mut self) -> ParseResult<Operand> {
        match self.peek_kind() {
            Some(TokenKind::IntLiteral(value)) => {
                let _ = self.bump();
                Ok(Operand::Value(value))
            }
            Some(TokenKind::OpenParen) => {
                let _ = self.bump();
                let operand = self.parse_expr()?;
                self.expect(TokenKind::CloseParen, ")")?;
                Ok(operand)
            }
            Some(TokenKind::Ident) => {
                if KEYWORDS.contains(&self.current_span().as_str()) {
                    return Err(self.error_here(ParseErrorKind::ExpectedExpression));
                }
                let name = self.expect_ident()?;
                if self.peek_is(TokenKind::OpenParen) {
                    return self.parse_call_expr(name);
                }
                match self.find_variable(name.as_str()) {
                    Some(reg) => Ok(Operand::Reg(reg)),
                    None => Err(CompileError::UnknownVariable { name }),
                }
            }
            _ => Err(self.error_here(ParseErrorKind::ExpectedExpression)),
        }
    }

    /// Parses `(args)` after a function name and emits the call sequence:
    /// arguments in the registers above the call register, then a load of
    /// the callee displacement, then the call itself.
    fn parse_call_expr(&mut self, name: Ident) -> ParseResult<Operand> {
        let name_span = name.span();
        self.expect(TokenKind::OpenParen, "(")?;
        let call_reg = self.next_reg(&name_span)?;
        let mut num_args = 0usize;
        if !self.peek_is(TokenKind::CloseParen) {
            loop {
                let span = self.current_span();
                let target = self.next_reg(&span)?;
                let operand = self.parse_expr()?;
                self.operand_to_reg(operand, target, &span)?;
                if let Operand::Reg(reg) = operand {
                    if reg != target {
                        self.free_operand(operand);
                    }
                }
                num_args += 1;
                if self.take(TokenKind::Comma) {
                    continue;
                }
                if self.peek_is(TokenKind::CloseParen) {
                    break;
                }
                return Err(self.error_here(ParseErrorKind::ExpectedCommaOrCloseParenInFnArgs));
            }
        }
        self.expect(TokenKind::CloseParen, ")")?;
        let displacement = match self.functions.get(name.as_str()) {
            Some(info) => {
                if info.arity != num_args {
                    return Err(CompileError::ArityMismatch {
                        name,
                        expected: info.arity,
                        found: num_args,
                    });
                }
                // The call lands one instruction after the displacement
                // load emitted below.
                let call_pos = self.here() + 1;
                let displacement = info.pos as i64 - call_pos as i64 - 1;
                i16::try_from(displacement)
                    .map_err(|_| CompileError::JumpTooFar { span: name_span })?
            }
            None if self.final_pass => return Err(CompileError::UnknownFunction { name }),
            // Forward call in the first pass; the second pass fills it in.
            None => 0,
        };
        self.emit(Instruction::new_ad(Opcode::Movi, call_reg, displacement));
        self.emit(Instruction::new_abc(Opcode::Call, call_reg, num_args as u8, 0));
        // The argument registers die with the call; the call register
        // holds the return value.
        self.first_free_reg -= num_args;
        Ok(Operand::Reg(call_reg))
    }

    // Statement parsing.

    fn parse_statement(&mut self) -> ParseResult<()> {
        match self.peek_kind() {
            Some(TokenKind::OpenBrace) => self.parse_block(),
            Some(TokenKind::Ident) => match self.current_span().as_str() {
                "if" => self.parse_if(),
                "while" => self.parse_while(),
                "let" => self.parse_let(),
                "in" => self.parse_in(),
                "out" => self.parse_out(),
                "return" => self.parse_return(),
                "fn" | "else" => Err(self.error_here(ParseErrorKind::ExpectedStatement)),
                _ => self.parse_assignment_or_call(),
            },
            _ => Err(self.error_here(ParseErrorKind::ExpectedStatement)),
        }
    }

    fn parse_block(&mut self) -> ParseResult<()> {
        if !self.peek_is(TokenKind::OpenBrace) {
            return Err(self.error_here(ParseErrorKind::ExpectedOpenBrace));
        }
        let _ = self.bump();
        let num_locals = self.locals.len();
        let first_free_reg = self.first_free_reg;
        while !self.peek_is(TokenKind::CloseBrace) {
            if self.peek().is_none() {
                return Err(self.error_here(ParseErrorKind::ExpectedPunct { punct: "}" }));
            }
            self.parse_statement()?;
        }
        let _ = self.bump();
        // Variables declared in the block go out of scope with it.
        self.locals.truncate(num_locals);
        self.first_free_reg = first_free_reg;
        Ok(())
    }

    /// Parses a condition expression followed by a block, emitting a
    /// conditional jump taken when the condition is false. Returns the
    /// positions to patch once the false target is known.
    fn parse_cond_block(&mut self) -> ParseResult<Vec<usize>> {
        let span = self.current_span();
        let operand = self.parse_expr()?;
        let reg = self.operand_to_any_reg(operand, &span)?;
        let jump = self.emit(Instruction::new_ad(Opcode::Jf, reg, 0));
        self.free_operand(Operand::Reg(reg));
        self.parse_block()?;
        Ok(vec![jump])
    }

    fn parse_if(&mut self) -> ParseResult<()> {
        let if_span = self.expect_keyword("if")?;
        let mut end_list = Vec::new();
        loop {
            let false_list = self.parse_cond_block()?;
            if self.take_keyword("else") {
                end_list.push(self.emit(Instruction::new_ad(Opcode::Jmp, 0, 0)));
                let target = self.here();
                self.patch_jump_list(&false_list, target, &if_span)?;
                if self.take_keyword("if") {
                    continue;
                }
                self.parse_block()?;
                break;
            }
            let target = self.here();
            self.patch_jump_list(&false_list, target, &if_span)?;
            break;
        }
        let target = self.here();
        self.patch_jump_list(&end_list, target, &if_span)
    }

    fn parse_while(&mut self) -> ParseResult<()> {
        let while_span = self.expect_keyword("while")?;
        let loop_start = self.here();
        let false_list = self.parse_cond_block()?;
        let back = self.emit(Instruction::new_ad(Opcode::Jmp, 0, 0));
        self.patch_jump(back, loop_start, &while_span)?;
        let target = self.here();
        self.patch_jump_list(&false_list, target, &while_span)
    }

    fn parse_let(&mut self) -> ParseResult<()> {
        let let_span = self.expect_keyword("let")?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Equals, "=")?;
        let operand = self.parse_expr()?;
        match operand {
            // The value already sits in the first temporary; adopt that
            // register as the variable's.
            Operand::Reg(reg) if reg as usize == self.locals.len() => {
                self.locals.push((name, reg));
            }
            operand => {
                self.free_operand(operand);
                let reg = self.next_reg(&let_span)?;
                self.operand_to_reg(operand, reg, &let_span)?;
                self.locals.push((name, reg));
            }
        }
        self.expect(TokenKind::Semicolon, ";")?;
        Ok(())
    }

    fn parse_in(&mut self) -> ParseResult<()> {
        self.expect_keyword("in")?;
        let name = self.expect_ident()?;
        let reg = self
            .find_variable(name.as_str())
            .ok_or(CompileError::UnknownVariable { name })?;
        self.emit(Instruction::new_abc(Opcode::In, reg, 0, 0));
        self.expect(TokenKind::Semicolon, ";")?;
        Ok(())
    }

    fn parse_out(&mut self) -> ParseResult<()> {
        let out_span = self.expect_keyword("out")?;
        let operand = self.parse_expr()?;
        let reg = self.operand_to_any_reg(operand, &out_span)?;
        self.emit(Instruction::new_abc(Opcode::Out, reg, 0, 0));
        self.free_operand(Operand::Reg(reg));
        self.expect(TokenKind::Semicolon, ";")?;
        Ok(())
    }

    fn parse_return(&mut self) -> ParseResult<()> {
        let return_span = self.expect_keyword("return")?;
        if !self.in_function {
            return Err(CompileError::ReturnOutsideFunction { span: return_span });
        }
        let operand = self.parse_expr()?;
        match operand {
            Operand::Value(value) if i16::try_from(value).is_ok() => {
                self.emit(Instruction::new_ad(Opcode::Reti, 0, value as i16));
            }
            operand => {
                let reg = self.operand_to_any_reg(operand, &return_span)?;
                self.emit(Instruction::new_abc(Opcode::Retr, reg, 0, 0));
                self.free_operand(Operand::Reg(reg));
            }
        }
        self.expect(TokenKind::Semicolon, ";")?;
        Ok(())
    }

    fn parse_assignment_or_call(&mut self) -> ParseResult<()> {
        let name = self.expect_ident()?;
        if self.take(TokenKind::Equals) {
            let span = name.span();
            let reg = self
                .find_variable(name.as_str())
                .ok_or(CompileError::UnknownVariable { name })?;
            let operand = self.parse_expr()?;
            self.operand_to_reg(operand, reg, &span)?;
            self.free_operand(operand);
            self.expect(TokenKind::Semicolon, ";")?;
            return Ok(());
        }
        if self.peek_is(TokenKind::OpenParen) {
            let result = self.parse_call_expr(name)?;
            self.free_operand(result);
            self.expect(TokenKind::Semicolon, ";")?;
            return Ok(());
        }
        Err(self.error_here(ParseErrorKind::ExpectedAssignmentOrCall))
    }

    fn parse_fn(&mut self) -> ParseResult<()> {
        let fn_span = self.expect_keyword("fn")?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::OpenParen, "(")?;
        let mut params = Vec::new();
        if !self.peek_is(TokenKind::CloseParen) {
            loop {
                params.push(self.expect_ident()?);
                if self.take(TokenKind::Comma) {
                    continue;
                }
                if self.peek_is(TokenKind::CloseParen) {
                    break;
                }
                return Err(self.error_here(ParseErrorKind::ExpectedCommaOrCloseParenInFnArgs));
            }
        }
        self.expect(TokenKind::CloseParen, ")")?;
        // Top-level control flow jumps over the body.
        let skip = self.emit(Instruction::new_ad(Opcode::Jmp, 0, 0));
        let pos = self.here();
        if !self.final_pass {
            if self.functions.contains_key(name.as_str()) {
                return Err(CompileError::DuplicateFunction { name });
            }
            self.functions.insert(
                name.as_str().to_owned(),
                FnInfo {
                    pos,
                    arity: params.len(),
                },
            );
        }
        let saved_locals = mem::take(&mut self.locals);
        let saved_first_free_reg = mem::replace(&mut self.first_free_reg, 0);
        let saved_in_function = mem::replace(&mut self.in_function, true);
        for param in params {
            if self
                .locals
                .iter()
                .any(|(existing, _)| existing.as_str() == param.as_str())
            {
                return Err(CompileError::DuplicateParameter { name: param });
            }
            let reg = self.next_reg(&param.span())?;
            self.locals.push((param, reg));
        }
        self.parse_block()?;
        // A body that falls off the end returns zero.
        self.emit(Instruction::new_ad(Opcode::Reti, 0, 0));
        let target = self.here();
        self.patch_jump(skip, target, &fn_span)?;
        self.locals = saved_locals;
        self.first_free_reg = saved_first_free_reg;
        self.in_function = saved_in_function;
        Ok(())
    }

    fn parse_program(&mut self) -> ParseResult<()> {
        while self.peek().is_some() {
            if self.peek_is_keyword("fn") {
                self.parse_fn()?;
            } else {
                self.parse_statement()?;
            }
        }
        // Epilogue so every program terminates with exit status 0.
        let span = self.eof_span();
        let reg = self.next_reg(&span)?;
        self.emit(Instruction::new_ad(Opcode::Movi, reg, 0));
        self.emit(Instruction::new_abc(Opcode::Exit, reg, 0, 0));
        self.free_operand(Operand::Reg(reg));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use assert_matches::assert_matches;

    fn compile_str(text: &str) -> Result<Program, CompileError> {
        compile(Arc::from(text), None)
    }

    fn opcodes(program: &Program) -> Vec<Opcode> {
        program
            .code
            .iter()
            .map(|inst| inst.opcode().unwrap())
            .collect()
    }

    #[test]
    fn constant_expressions_fold() {
        let program = compile_str("out 1 + 2 * 3;").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![Opcode::Movi, Opcode::Out, Opcode::Movi, Opcode::Exit],
        );
        assert_eq!(program.code[0].d(), 7);
        assert!(program.constants.is_empty());
    }

    #[test]
    fn wide_constants_go_through_the_pool() {
        let program = compile_str("out 314606869;").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![Opcode::Loadk, Opcode::Out, Opcode::Movi, Opcode::Exit],
        );
        assert_eq!(program.constants, vec![314606869]);
        assert_eq!(program.constant(program.code[0].d() as u16), Some(314606869));
    }

    #[test]
    fn constant_pool_deduplicates() {
        let program = compile_str("out 100000; out 100000; out 100001;").unwrap();
        assert_eq!(program.constants, vec![100000, 100001]);
    }

    #[test]
    fn while_loop_shape() {
        let program = compile_str("let i = 0; while i < 3 { i = i + 1; }").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::Movi,  // i = 0
                Opcode::LtRi,  // i < 3
                Opcode::Jf,    // exit loop
                Opcode::AddRi, // i + 1
                Opcode::Movr,  // i = ...
                Opcode::Jmp,   // back to the condition
                Opcode::Movi,  // epilogue
                Opcode::Exit,
            ],
        );
        // Jf skips past the Jmp; the Jmp lands back on the condition.
        assert_eq!(program.code[2].d(), 3);
        assert_eq!(program.code[5].d(), -5);
    }

    #[test]
    fn if_else_chain_patches_to_the_end() {
        let program = compile_str("let x = 0; if x == 1 { out 1; } else { out 2; }").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::Movi, // x = 0
                Opcode::EqRi,
                Opcode::Jf,   // to the else arm
                Opcode::Movi, // out 1
                Opcode::Out,
                Opcode::Jmp,  // over the else arm
                Opcode::Movi, // out 2
                Opcode::Out,
                Opcode::Movi,
                Opcode::Exit,
            ],
        );
        assert_eq!(program.code[2].d(), 3);
        assert_eq!(program.code[5].d(), 2);
    }

    #[test]
    fn calls_resolve_forward_definitions() {
        let program = compile_str("out one();\nfn one() { return 1; }").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::Movi, // callee displacement
                Opcode::Call,
                Opcode::Out,
                Opcode::Jmp,  // over the body
                Opcode::Reti, // return 1
                Opcode::Reti, // implicit return 0
                Opcode::Movi,
                Opcode::Exit,
            ],
        );
        // call at 1, body at 4: displacement stored before the call.
        assert_eq!(program.code[0].d(), 2);
        assert_eq!(program.code[4].d(), 1);
    }

    #[test]
    fn comparison_with_constant_on_the_left_uses_ir_form() {
        let program = compile_str("let n = 5; out 2 < n;").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![Opcode::Movi, Opcode::LtIr, Opcode::Out, Opcode::Movi, Opcode::Exit],
        );
        assert_eq!(program.code[1].b() as i8, 2);
    }

    #[test]
    fn greater_than_compiles_to_swapped_less_than() {
        let program = compile_str("let a = 1; let b = 2; out a > b;").unwrap();
        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::Movi,
                Opcode::Movi,
                Opcode::LtRr,
                Opcode::Out,
                Opcode::Movi,
                Opcode::Exit,
            ],
        );
        // a > b is emitted as b < a.
        assert_eq!(program.code[2].b(), 1);
        assert_eq!(program.code[2].c(), 0);
    }

    #[test]
    fn block_scoping_frees_registers() {
        let program = compile_str("{ let a = 1; out a; } { let b = 2; out b; }").unwrap();
        // Both blocks use register zero.
        assert_eq!(program.code[0].a(), 0);
        assert_eq!(program.code[2].a(), 0);
    }

    #[test]
    fn unknown_variable_is_an_error() {
        assert_matches!(
            compile_str("out nope;"),
            Err(CompileError::UnknownVariable { name }) if name.as_str() == "nope"
        );
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert_matches!(
            compile_str("out nope(1);"),
            Err(CompileError::UnknownFunction { name }) if name.as_str() == "nope"
        );
    }

    #[test]
    fn arity_is_checked() {
        assert_matches!(
            compile_str("fn pair(a, b) { return a + b; } out pair(1);"),
            Err(CompileError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            })
        );
    }

    #[test]
    fn duplicate_functions_are_rejected() {
        assert_matches!(
            compile_str("fn f() { return 1; } fn f() { return 2; }"),
            Err(CompileError::DuplicateFunction { .. })
        );
    }

    #[test]
    fn return_outside_a_function_is_rejected() {
        assert_matches!(
            compile_str("return 1;"),
            Err(CompileError::ReturnOutsideFunction { .. })
        );
    }

    #[test]
    fn division_by_constant_zero_is_not_folded() {
        let program = compile_str("out 1 / 0;").unwrap();
        assert!(opcodes(&program).contains(&Opcode::DivRi));
    }

    #[test]
    fn missing_semicolon_is_a_parse_error() {
        assert_matches!(
            compile_str("let x = 1"),
            Err(CompileError::Parse { error: ParseError {
                kind: ParseErrorKind::ExpectedPunct { punct: ";" },
                ..
            }})
        );
    }

    #[test]
    fn source_ending_with_a_multibyte_char_compiles() {
        // The epilogue span must not split the trailing character.
        let program = compile_str("out 1; // café").unwrap();
        assert_eq!(opcodes(&program).last(), Some(&Opcode::Exit));
        assert_matches!(
            compile_str("let x = 1 // café"),
            Err(CompileError::Parse { error: ParseError {
                kind: ParseErrorKind::ExpectedPunct { punct: ";" },
                ..
            }})
        );
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        assert_matches!(
            compile_str("fn f(a, a) { return a; }"),
            Err(CompileError::DuplicateParameter { name }) if name.as_str() == "a"
        );
    }

    #[test]
    fn register_exhaustion_is_an_error() {
        let mut source = String::new();
        for i in 0..=NUM_REGS {
            source.push_str(&format!("let x{i} = 0;\n"));
        }
        assert_matches!(
            compile_str(&source),
            Err(CompileError::OutOfRegisters { .. })
        );
    }

    #[test]
    fn too_many_wide_constants_is_an_error() {
        // One more distinct pool entry than a u16 index can reach.
        let mut source = String::new();
        for i in 0..=(u16::MAX as i64 + 1) {
            source.push_str(&format!("out {};\n", 100_000 + i));
        }
        assert_matches!(
            compile_str(&source),
            Err(CompileError::TooManyConstants { .. })
        );
    }

    #[test]
    fn jump_displacement_overflow_is_an_error() {
        // An if body too long for the i16 displacement of its Jf.
        let mut source = String::from("let x = 0;\nif x {\n");
        for _ in 0..17_000 {
            source.push_str("out 100000;\n");
        }
        source.push('}');
        assert_matches!(compile_str(&source), Err(CompileError::JumpTooFar { .. }));
    }
}
