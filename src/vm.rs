// Apolo: the bytecode interpreter.
//
// Copyright (C) 2026  The Apolo Developers
//
// *Execution model*
//
// A chunk is a flat byte stream over a constant pool. The VM walks it
// with a single instruction cursor and a bounded value stack. There
// are no call frames: a chunk is one top-level script, and local
// variables live directly in the lower stack slots the compiler
// assigned them.
//
// *State*
//
// The VM outlives any one chunk. Global variables and the string
// interner persist across `interpret` calls, which is what lets a
// REPL accumulate definitions line by line.
//
// *Validity*
//
// The set of runtime errors is the RuntimeError enum in this file.
// All are non-recoverable: the dispatch loop stops, the error is
// reported with the source line of the faulting instruction, and the
// stack is cleared for the next interpret call. Where the instruction
// stream itself is malformed (an undecodable opcode, a slot past the
// live stack) the VM reports an error rather than trusting the bytes.
//
// *Effects*
//
// `print` and `input()` are the only ways a program touches the
// outside world, and both go through the Console trait so embedders
// and tests can redirect them.

use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::chunk::{Chunk, OpCode};
use crate::compiler;
use crate::object::{ObjString, ObjectHeap};
use crate::table::Table;
use crate::value::{TypeSet, TypeTag, Value};

pub const STACK_MAX: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Everything that can stop the dispatch loop. Type errors carry the
/// expected set and the observed tags so the report can say what was
/// actually on the stack.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    UnaryType { expect: TypeSet, got: TypeTag },
    BinaryType { expect: TypeSet, lhs: TypeTag, rhs: TypeTag },
    UndefinedVariable(Rc<ObjString>),
    StackOverflow,
    StackUnderflow,
    BadSlot(usize),
    IllegalOpcode(u8),
    IllegalConstant(TypeTag),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::UnaryType { .. } => write!(f, "Operand must be a number."),
            RuntimeError::BinaryType { expect, .. } => {
                if expect.contains(TypeTag::Str) {
                    write!(f, "Operands must be two numbers or two strings.")
                } else {
                    write!(f, "Operands must be numbers.")
                }
            }
            RuntimeError::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            RuntimeError::StackOverflow => write!(f, "Value stack overflow."),
            RuntimeError::StackUnderflow => write!(f, "Value stack underflow."),
            RuntimeError::BadSlot(slot) => write!(f, "Local slot {} is out of range.", slot),
            RuntimeError::IllegalOpcode(byte) => write!(f, "Illegal opcode {:#04x}.", byte),
            RuntimeError::IllegalConstant(tag) => {
                write!(f, "Variable name constant is a {:?}, not a string.", tag)
            }
        }
    }
}

/// Where `print` writes and `input()` reads.
pub trait Console {
    fn print(&mut self, value: &Value);

    /// One line of input with its trailing newline removed, or None
    /// at end of input.
    fn read_line(&mut self) -> Option<String>;
}

/// The process's stdin and stdout.
pub struct StdConsole;

impl Console for StdConsole {
    fn print(&mut self, value: &Value) {
        println!("{}", value);
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
        }
    }
}

// A runtime error plus the offset of the opcode that raised it, for
// the line map.
struct Fault {
    error: RuntimeError,
    at: usize,
}

enum Flow {
    Continue,
    Halt,
}

pub struct Vm<C: Console> {
    stack: Vec<Value>,
    globals: Table,
    heap: ObjectHeap,
    console: C,
}

impl<C: Console> Vm<C> {
    pub fn new(console: C) -> Vm<C> {
        Vm {
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            heap: ObjectHeap::new(),
            console,
        }
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    /// Compile and run one source string. Globals and interned
    /// strings persist across calls; the chunk does not.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let chunk = match compiler::compile(source, &mut self.heap) {
            Ok(chunk) => chunk,
            Err(_) => return InterpretResult::CompileError,
        };

        match self.run(&chunk) {
            Ok(()) => InterpretResult::Ok,
            Err(fault) => {
                eprintln!("{}", fault.error);
                eprintln!("[Line {}] in script", chunk.lines[fault.at]);
                self.stack.clear();
                InterpretResult::RuntimeError
            }
        }
    }

    fn run(&mut self, chunk: &Chunk) -> Result<(), Fault> {
        let mut ip = 0;
        loop {
            let at = ip;
            match self.step(chunk, &mut ip) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(error) => return Err(Fault { error, at }),
            }
        }
    }

    fn step(&mut self, chunk: &Chunk, ip: &mut usize) -> Result<Flow, RuntimeError> {
        if *ip >= chunk.code.len() {
            return Ok(Flow::Halt);
        }
        let byte = read_byte(chunk, ip);
        let op = OpCode::try_from(byte).map_err(|_| RuntimeError::IllegalOpcode(byte))?;
        trace!("{:04} {:?} {:?}", *ip - 1, op, self.stack);

        match op {
            OpCode::Constant => {
                let value = read_constant(chunk, ip);
                self.push(value)?;
            }
            OpCode::Nil => self.push(Value::Nil)?,
            OpCode::True => self.push(Value::Bool(true))?,
            OpCode::False => self.push(Value::Bool(false))?,
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::GetLocal => {
                let slot = read_byte(chunk, ip) as usize;
                let value = self
                    .stack
                    .get(slot)
                    .cloned()
                    .ok_or(RuntimeError::BadSlot(slot))?;
                self.push(value)?;
            }
            OpCode::SetLocal => {
                let slot = read_byte(chunk, ip) as usize;
                let value = self.peek(0)?.clone();
                match self.stack.get_mut(slot) {
                    Some(cell) => *cell = value,
                    None => return Err(RuntimeError::BadSlot(slot)),
                }
            }
            OpCode::GetGlobal => {
                let name = read_string(chunk, ip)?;
                match self.globals.get(&name) {
                    Some(value) => self.push(value)?,
                    None => return Err(RuntimeError::UndefinedVariable(name)),
                }
            }
            OpCode::DefineGlobal => {
                let name = read_string(chunk, ip)?;
                let value = self.peek(0)?.clone();
                self.globals.set(name, value);
                self.pop()?;
            }
            OpCode::SetGlobal => {
                let name = read_string(chunk, ip)?;
                let value = self.peek(0)?.clone();
                if self.globals.set(name.clone(), value) {
                    // The insert created the name. Assignment may
                    // only overwrite, so roll it back.
                    self.globals.delete(&name);
                    return Err(RuntimeError::UndefinedVariable(name));
                }
            }
            OpCode::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b))?;
            }
            OpCode::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
            OpCode::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,
            OpCode::Add => self.add()?,
            OpCode::Sub => self.binary_number_op(|a, b| Value::Number(a - b))?,
            OpCode::Mul => self.binary_number_op(|a, b| Value::Number(a * b))?,
            OpCode::Div => self.binary_number_op(|a, b| Value::Number(a / b))?,
            OpCode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(value.is_falsey()))?;
            }
            OpCode::Negate => {
                let value = self.pop()?;
                match value {
                    Value::Number(n) => self.push(Value::Number(-n))?,
                    other => {
                        return Err(RuntimeError::UnaryType {
                            expect: BitFlags::from_flag(TypeTag::Number),
                            got: other.get_type(),
                        })
                    }
                }
            }
            OpCode::Print => {
                let value = self.pop()?;
                self.console.print(&value);
            }
            OpCode::Input => {
                let value = match self.console.read_line() {
                    Some(line) => Value::Obj(self.heap.copy_string(&line)),
                    None => Value::Nil,
                };
                self.push(value)?;
            }
            OpCode::Jump => {
                let offset = read_short(chunk, ip) as usize;
                *ip += offset;
            }
            OpCode::JumpIfFalse => {
                let offset = read_short(chunk, ip) as usize;
                if self.peek(0)?.is_falsey() {
                    *ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = read_short(chunk, ip) as usize;
                *ip -= offset;
            }
            OpCode::Return => return Ok(Flow::Halt),
        }
        Ok(Flow::Continue)
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == STACK_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn peek(&self, distance: usize) -> Result<&Value, RuntimeError> {
        let len = self.stack.len();
        if distance < len {
            Ok(&self.stack[len - 1 - distance])
        } else {
            Err(RuntimeError::StackUnderflow)
        }
    }

    fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => self.push(op(*x, *y)),
            _ => Err(RuntimeError::BinaryType {
                expect: BitFlags::from_flag(TypeTag::Number),
                lhs: a.get_type(),
                rhs: b.get_type(),
            }),
        }
    }

    // Addition is the one overloaded operator: two strings
    // concatenate, two numbers add, anything else is an error.
    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Obj(x), Value::Obj(y)) => {
                let mut chars = String::with_capacity(x.len() + y.len());
                chars.push_str(x.as_str());
                chars.push_str(y.as_str());
                let joined = self.heap.take_string(chars);
                self.push(Value::Obj(joined))
            }
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x + y)),
            _ => Err(RuntimeError::BinaryType {
                expect: TypeTag::Number | TypeTag::Str,
                lhs: a.get_type(),
                rhs: b.get_type(),
            }),
        }
    }
}

fn read_byte(chunk: &Chunk, ip: &mut usize) -> u8 {
    let byte = chunk.code[*ip];
    *ip += 1;
    byte
}

fn read_short(chunk: &Chunk, ip: &mut usize) -> u16 {
    let hi = u16::from(read_byte(chunk, ip));
    let lo = u16::from(read_byte(chunk, ip));
    (hi << 8) | lo
}

fn read_constant(chunk: &Chunk, ip: &mut usize) -> Value {
    let index = read_byte(chunk, ip) as usize;
    chunk.constants[index].clone()
}

fn read_string(chunk: &Chunk, ip: &mut usize) -> Result<Rc<ObjString>, RuntimeError> {
    match read_constant(chunk, ip) {
        Value::Obj(string) => Ok(string),
        other => Err(RuntimeError::IllegalConstant(other.get_type())),
    }
}
