// Apolo: single-pass bytecode compiler.
//
// Copyright (C) 2026  The Apolo Developers
//
// Statements parse by recursive descent; expressions parse by Pratt
// precedence climbing, driven by a per-token rule of optional prefix
// and infix handlers. No AST is built: handlers emit bytecode into
// the chunk as tokens are consumed. Local variables resolve to stack
// slots at compile time; everything else becomes a named global.
//
// Errors report once per panic, then the parser synchronizes at the
// next statement boundary so one mistake does not drown the rest of
// the file in noise.

use crate::chunk::{Chunk, OpCode};
use crate::object::ObjectHeap;
use crate::scanner::{Scanner, Token, TokenType};
use crate::value::Value;

/// Compile one source string into a chunk, interning identifier and
/// string literals through the given heap. Diagnostics go to stderr;
/// the error carries no payload because reporting already happened.
pub fn compile(source: &str, heap: &mut ObjectHeap) -> Result<Chunk, CompileError> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.match_token(TokenType::Eof) {
        compiler.declaration();
    }
    compiler.emit_op(OpCode::Return);

    if compiler.had_error {
        Err(CompileError)
    } else {
        trace!(
            "compiled {} code bytes, {} constants",
            compiler.chunk.code.len(),
            compiler.chunk.constants.len()
        );
        Ok(compiler.chunk)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompileError;

// Constant and slot operands are single bytes, so both pools cap at
// one past the largest index a byte can name.
const MAX_CONSTANTS: usize = 256;
const MAX_LOCALS: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    // One level tighter, for left-associative infix operands.
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Compiler<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

// A local lives at the stack slot matching its index in the
// compiler's local list.
struct Local<'src> {
    name: Token<'src>,
    depth: usize,
}

struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    heap: &'h mut ObjectHeap,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    scope_depth: usize,
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut ObjectHeap) -> Compiler<'src, 'h> {
        let before_first = Token {
            ttype: TokenType::Eof,
            lexeme: "",
            line: 1,
        };
        Compiler {
            scanner: Scanner::new(source),
            current: before_first,
            previous: before_first,
            had_error: false,
            panic_mode: false,
            heap,
            chunk: Chunk::new(),
            locals: Vec::new(),
            scope_depth: 0,
        }
    }

    ///////////////////////////// Token plumbing /////////////////////////////

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.ttype != TokenType::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, ttype: TokenType, message: &str) {
        if self.current.ttype == ttype {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, ttype: TokenType) -> bool {
        self.current.ttype == ttype
    }

    fn match_token(&mut self, ttype: TokenType) -> bool {
        if !self.check(ttype) {
            return false;
        }
        self.advance();
        true
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    // First error per panic wins; the rest stay quiet until the
    // parser resynchronizes.
    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        eprint!("[Line {}] Error", token.line);
        match token.ttype {
            TokenType::Eof => eprint!(" at end"),
            TokenType::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {}", message);
    }

    // Skip to the next statement boundary: just past a semicolon, or
    // just before a keyword that starts a statement.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.ttype != TokenType::Eof {
            if self.previous.ttype == TokenType::Semicolon {
                return;
            }
            match self.current.ttype {
                TokenType::Var
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::For
                | TokenType::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    ///////////////////////////// Bytecode emission /////////////////////////////

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.chunk.add_constant(value);
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(index);
    }

    // Emit a forward jump with a placeholder displacement and return
    // the offset of the operand for later patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 skips over the operand itself.
        let jump = self.chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        self.chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        // +2 accounts for the operand the VM will have consumed.
        let offset = self.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    ///////////////////////////// Declarations and statements /////////////////////////////

    fn declaration(&mut self) {
        if self.match_token(TokenType::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect variable name.");
        let name = self.previous;

        let global = if self.scope_depth == 0 {
            Some(self.identifier_constant(name))
        } else {
            // The slot exists before the initializer runs, so a
            // redeclared name shadows from this point on.
            self.add_local(name);
            None
        };

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");

        if let Some(index) = global {
            self.emit_op(OpCode::DefineGlobal);
            self.emit_byte(index);
        }
        // A local needs no store instruction: the initializer's value
        // on the stack is the slot.
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::Print) {
            self.print_statement();
        } else if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    // JumpIfFalse peeks, so both arms start by popping the condition.
    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk.code.len();
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    // The compile-time local list parallels the runtime stack, so
    // leaving a scope pops both.
    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while self
            .locals
            .last()
            .map_or(false, |local| local.depth > self.scope_depth)
        {
            self.emit_op(OpCode::Pop);
            self.locals.pop();
        }
    }

    ///////////////////////////// Expressions /////////////////////////////

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match get_rule(self.previous.ttype).prefix {
            Some(prefix) => prefix,
            None => {
                self.error("Expect expression.");
                return;
            }
        };

        // Only a parse at assignment level or looser may treat a
        // following '=' as an assignment; otherwise the '=' is left
        // for the enclosing parser to reject.
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.ttype).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.ttype).infix {
                infix(self, can_assign);
            }
        }
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let string = self.heap.copy_string(name.lexeme);
        self.make_constant(Value::Obj(string))
    }

    // Innermost declaration wins: scan the local list from the top.
    fn resolve_local(&self, name: Token<'src>) -> Option<u8> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name.lexeme == name.lexeme {
                return Some(i as u8);
            }
        }
        None
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in scope.");
            return;
        }
        let depth = self.scope_depth;
        self.locals.push(Local { name, depth });
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(name) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => {
                let index = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, index)
            }
        };

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
    }
}

///////////////////////////// Parse rules /////////////////////////////

macro_rules! rule {
    ($prefix:expr, $infix:expr, $precedence:expr) => {
        ParseRule {
            prefix: $prefix,
            infix: $infix,
            precedence: $precedence,
        }
    };
}

#[rustfmt::skip]
fn get_rule<'src, 'h>(ttype: TokenType) -> ParseRule<'src, 'h> {
    use TokenType::*;
    match ttype {
        //                    Prefix          Infix         Precedence
        LeftParen    => rule!(Some(grouping), None,         Precedence::None),
        RightParen   => rule!(None,           None,         Precedence::None),
        LeftBrace    => rule!(None,           None,         Precedence::None),
        RightBrace   => rule!(None,           None,         Precedence::None),
        Comma        => rule!(None,           None,         Precedence::None),
        Dot          => rule!(None,           None,         Precedence::None),
        Minus        => rule!(Some(unary),    Some(binary), Precedence::Term),
        Plus         => rule!(None,           Some(binary), Precedence::Term),
        Semicolon    => rule!(None,           None,         Precedence::None),
        Slash        => rule!(None,           Some(binary), Precedence::Factor),
        Star         => rule!(None,           Some(binary), Precedence::Factor),
        Bang         => rule!(Some(unary),    None,         Precedence::None),
        BangEqual    => rule!(None,           Some(binary), Precedence::Equality),
        Equal        => rule!(None,           None,         Precedence::None),
        EqualEqual   => rule!(None,           Some(binary), Precedence::Equality),
        Greater      => rule!(None,           Some(binary), Precedence::Comparison),
        GreaterEqual => rule!(None,           Some(binary), Precedence::Comparison),
        Less         => rule!(None,           Some(binary), Precedence::Comparison),
        LessEqual    => rule!(None,           Some(binary), Precedence::Comparison),
        Identifier   => rule!(Some(variable), None,         Precedence::None),
        Str          => rule!(Some(string),   None,         Precedence::None),
        Number       => rule!(Some(number),   None,         Precedence::None),
        And          => rule!(None,           None,         Precedence::None),
        Else         => rule!(None,           None,         Precedence::None),
        False        => rule!(Some(literal),  None,         Precedence::None),
        For          => rule!(None,           None,         Precedence::None),
        If           => rule!(None,           None,         Precedence::None),
        Input        => rule!(Some(input),    None,         Precedence::None),
        Nil          => rule!(Some(literal),  None,         Precedence::None),
        Or           => rule!(None,           None,         Precedence::None),
        Print        => rule!(None,           None,         Precedence::None),
        Return       => rule!(None,           None,         Precedence::None),
        True         => rule!(Some(literal),  None,         Precedence::None),
        Var          => rule!(None,           None,         Precedence::None),
        While        => rule!(None,           None,         Precedence::None),
        Error        => rule!(None,           None,         Precedence::None),
        Eof          => rule!(None,           None,         Precedence::None),
    }
}

fn grouping<'src, 'h>(compiler: &mut Compiler<'src, 'h>, _can_assign: bool) {
    compiler.expression();
    compiler.consume(TokenType::RightParen, "Expect ')' after expression.");
}

fn number<'src, 'h>(compiler: &mut Compiler<'src, 'h>, _can_assign: bool) {
    match compiler.previous.lexeme.parse::<f64>() {
        Ok(value) => compiler.emit_constant(Value::Number(value)),
        Err(_) => compiler.error("Invalid number literal."),
    }
}

fn string<'src, 'h>(compiler: &mut Compiler<'src, 'h>, _can_assign: bool) {
    let lexeme = compiler.previous.lexeme;
    // Strip the surrounding quotes; the bytes between are raw.
    let contents = &lexeme[1..lexeme.len() - 1];
    let interned = compiler.heap.copy_string(contents);
    compiler.emit_constant(Value::Obj(interned));
}

fn literal<'src, 'h>(compiler: &mut Compiler<'src, 'h>, _can_assign: bool) {
    match compiler.previous.ttype {
        TokenType::False => compiler.emit_op(OpCode::False),
        TokenType::Nil => compiler.emit_op(OpCode::Nil),
        TokenType::True => compiler.emit_op(OpCode::True),
        _ => {}
    }
}

fn variable<'src, 'h>(compiler: &mut Compiler<'src, 'h>, can_assign: bool) {
    let name = compiler.previous;
    compiler.named_variable(name, can_assign);
}

fn unary<'src, 'h>(compiler: &mut Compiler<'src, 'h>, _can_assign: bool) {
    let operator = compiler.previous.ttype;
    compiler.parse_precedence(Precedence::Unary);
    match operator {
        TokenType::Bang => compiler.emit_op(OpCode::Not),
        TokenType::Minus => compiler.emit_op(OpCode::Negate),
        _ => {}
    }
}

fn binary<'src, 'h>(compiler: &mut Compiler<'src, 'h>, _can_assign: bool) {
    let operator = compiler.previous.ttype;
    let precedence = get_rule(operator).precedence.next();
    compiler.parse_precedence(precedence);

    match operator {
        TokenType::BangEqual => compiler.emit_ops(OpCode::Equal, OpCode::Not),
        TokenType::EqualEqual => compiler.emit_op(OpCode::Equal),
        TokenType::Greater => compiler.emit_op(OpCode::Greater),
        TokenType::GreaterEqual => compiler.emit_ops(OpCode::Less, OpCode::Not),
        TokenType::Less => compiler.emit_op(OpCode::Less),
        TokenType::LessEqual => compiler.emit_ops(OpCode::Greater, OpCode::Not),
        TokenType::Plus => compiler.emit_op(OpCode::Add),
        TokenType::Minus => compiler.emit_op(OpCode::Sub),
        TokenType::Star => compiler.emit_op(OpCode::Mul),
        TokenType::Slash => compiler.emit_op(OpCode::Div),
        _ => {}
    }
}

fn input<'src, 'h>(compiler: &mut Compiler<'src, 'h>, _can_assign: bool) {
    compiler.consume(TokenType::LeftParen, "Expect '(' after 'input'.");
    compiler.consume(TokenType::RightParen, "Expect ')' after 'input'.");
    compiler.emit_op(OpCode::Input);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    fn compile_source(source: &str) -> Chunk {
        let mut heap = ObjectHeap::new();
        match compile(source, &mut heap) {
            Ok(chunk) => chunk,
            Err(_) => panic!("program should compile: {}", source),
        }
    }

    fn compile_fails(source: &str) {
        let mut heap = ObjectHeap::new();
        assert!(compile(source, &mut heap).is_err(), "expected compile error: {}", source);
    }

    // Walk the byte stream into (offset, opcode, operand bytes).
    fn decode(chunk: &Chunk) -> Vec<(usize, OpCode, Vec<u8>)> {
        let mut out = Vec::new();
        let mut ip = 0;
        while ip < chunk.code.len() {
            let at = ip;
            let op = match OpCode::try_from(chunk.code[ip]) {
                Ok(op) => op,
                Err(_) => panic!("undecodable byte {:#04x} at {}", chunk.code[ip], ip),
            };
            ip += 1;
            let width = match op {
                OpCode::Constant
                | OpCode::GetLocal
                | OpCode::SetLocal
                | OpCode::GetGlobal
                | OpCode::DefineGlobal
                | OpCode::SetGlobal => 1,
                OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => 2,
                _ => 0,
            };
            let operands = chunk.code[ip..ip + width].to_vec();
            ip += width;
            out.push((at, op, operands));
        }
        out
    }

    fn ops(chunk: &Chunk) -> Vec<OpCode> {
        decode(chunk).into_iter().map(|(_, op, _)| op).collect()
    }

    fn short(operands: &[u8]) -> usize {
        ((operands[0] as usize) << 8) | operands[1] as usize
    }

    #[test]
    fn lines_parallel_code() {
        for source in [
            "print 1 + 2 * 3;",
            "var x = 10;\n{ var x = 20; print x; }\nprint x;",
            "var i = 0; while (i < 3) { i = i + 1; }",
        ]
        .iter()
        {
            let chunk = compile_source(source);
            assert_eq!(chunk.code.len(), chunk.lines.len());
        }
    }

    #[test]
    fn constant_operands_stay_in_range() {
        let chunk = compile_source("var a = 1; var b = \"two\"; print a; print b; a = 3;");
        for (_, op, operands) in decode(&chunk) {
            match op {
                OpCode::Constant
                | OpCode::GetGlobal
                | OpCode::DefineGlobal
                | OpCode::SetGlobal => {
                    assert!((operands[0] as usize) < chunk.constants.len());
                }
                _ => {}
            }
        }
    }

    #[test]
    fn expression_statement_ends_in_pop() {
        let chunk = compile_source("1 + 2;");
        assert_eq!(
            ops(&chunk),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Add,
                OpCode::Pop,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn desugared_comparisons_compile_to_two_ops() {
        assert_eq!(
            ops(&compile_source("1 != 2;")),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Equal,
                OpCode::Not,
                OpCode::Pop,
                OpCode::Return
            ]
        );
        assert_eq!(
            ops(&compile_source("1 <= 2;")),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Greater,
                OpCode::Not,
                OpCode::Pop,
                OpCode::Return
            ]
        );
        assert_eq!(
            ops(&compile_source("1 >= 2;")),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Less,
                OpCode::Not,
                OpCode::Pop,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn global_declaration_emits_define_global() {
        let chunk = compile_source("var a = 1;");
        let decoded = decode(&chunk);
        assert_eq!(decoded[0].1, OpCode::Constant);
        assert_eq!(decoded[1].1, OpCode::DefineGlobal);
        // The name constant precedes the initializer constant.
        match &chunk.constants[decoded[1].2[0] as usize] {
            Value::Obj(name) => assert_eq!(name.as_str(), "a"),
            other => panic!("name constant should be a string, was {:?}", other),
        }
    }

    #[test]
    fn local_declaration_has_no_store_instruction() {
        let chunk = compile_source("{ var a = 1; print a; }");
        assert_eq!(
            ops(&chunk),
            vec![
                OpCode::Constant,
                OpCode::GetLocal,
                OpCode::Print,
                OpCode::Pop,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn scope_exit_pops_each_local() {
        let chunk = compile_source("{ var a = 1; { var b = 2; } }");
        let pops = ops(&chunk)
            .into_iter()
            .filter(|op| *op == OpCode::Pop)
            .count();
        assert_eq!(pops, 2);
    }

    #[test]
    fn if_pops_the_condition_on_both_arms() {
        let chunk = compile_source("if (true) 1; else 2;");
        let decoded = decode(&chunk);
        let (at, op, operands) = &decoded[1];
        assert_eq!(*op, OpCode::JumpIfFalse);
        // The false branch lands exactly on the else-side Pop.
        let target = at + 3 + short(operands);
        let landing = decoded.iter().find(|(offset, _, _)| *offset == target);
        assert_eq!(landing.map(|(_, op, _)| *op), Some(OpCode::Pop));
        // The true branch starts with its own Pop.
        assert_eq!(decoded[2].1, OpCode::Pop);
    }

    #[test]
    fn then_arm_jumps_past_the_else_arm() {
        let chunk = compile_source("if (true) 1; else 2;");
        let decoded = decode(&chunk);
        let (at, _, operands) = decoded
            .iter()
            .find(|(_, op, _)| *op == OpCode::Jump)
            .expect("an if with an else emits an unconditional jump");
        let target = at + 3 + short(operands);
        let landing = decoded.iter().find(|(offset, _, _)| *offset == target);
        assert_eq!(landing.map(|(_, op, _)| *op), Some(OpCode::Return));
    }

    #[test]
    fn while_loop_jumps_back_to_the_condition() {
        let chunk = compile_source("while (false) 1;");
        let decoded = decode(&chunk);
        let (at, _, operands) = decoded
            .iter()
            .find(|(_, op, _)| *op == OpCode::Loop)
            .expect("a while emits a backward loop");
        // The displacement is subtracted after both operand bytes are
        // consumed, so execution resumes at the condition.
        assert_eq!(at + 3 - short(operands), 0);
    }

    #[test]
    fn assignment_needs_an_lvalue() {
        compile_fails("1 + 2 = 3;");
        compile_fails("a + b = c;");
    }

    #[test]
    fn assignment_to_a_name_compiles() {
        let chunk = compile_source("var a = 1; a = 2;");
        assert!(ops(&chunk).contains(&OpCode::SetGlobal));
    }

    #[test]
    fn dangling_operator_is_an_error() {
        compile_fails("print 1 +;");
    }

    #[test]
    fn missing_semicolon_is_an_error() {
        compile_fails("print 1");
    }

    #[test]
    fn reserved_words_do_not_start_expressions() {
        compile_fails("print and;");
        compile_fails("return 1;");
    }

    #[test]
    fn input_requires_call_parentheses() {
        assert!(ops(&compile_source("print input();")).contains(&OpCode::Input));
        compile_fails("print input;");
    }

    #[test]
    fn constant_pool_overflows_at_256() {
        let mut source = String::new();
        for i in 0..300 {
            source.push_str(&format!("print {};", i));
        }
        compile_fails(&source);
    }

    #[test]
    fn error_recovery_reaches_later_statements() {
        // The second statement is fine; the first still fails the
        // compile as a whole.
        compile_fails("var ;\nprint 1;");
    }

    #[test]
    fn duplicate_local_shadows_with_a_new_slot() {
        let chunk = compile_source("{ var x = 1; var x = 2; print x; }");
        let decoded = decode(&chunk);
        let get = decoded
            .iter()
            .find(|(_, op, _)| *op == OpCode::GetLocal)
            .expect("print x reads a local");
        assert_eq!(get.2[0], 1);
        // Both slots pop at scope exit.
        let pops = decoded.iter().filter(|(_, op, _)| *op == OpCode::Pop).count();
        assert_eq!(pops, 2);
    }
}
