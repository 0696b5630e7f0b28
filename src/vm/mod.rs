use serde::Serialize;

use crate::bytes::BufferError;
use crate::env::Environment;
use crate::functions::FunctionRegistry;
use crate::value::{BinaryOp, RuntimeError, UnaryOp, Value, binary_operate, unary_operate};

pub mod chunk;
pub mod compiler;
pub mod disassembler;

pub use chunk::{Chunk, ChunkError, ChunkReader, ChunkWriter, ConstantPool};
pub use compiler::{CompileError, Compiler};
pub use disassembler::disassemble;

// ── Opcodes ──────────────────────────────────────────────────────────

/// One-byte opcodes with 4-byte big-endian inline operands where
/// noted. The numbering is part of the persisted chunk format; gaps
/// (`GetLocal`, `SetLocal`, `DefineGlobal`, `Return`) are reserved
/// tags this crate never emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Constant = 0,
    Null = 1,
    True = 2,
    False = 3,
    Pop = 4,
    GetLocal = 5,
    SetLocal = 6,
    GetGlobal = 7,
    DefineGlobal = 8,
    SetGlobal = 9,
    GetProperty = 10,
    SetProperty = 11,
    EqualEqual = 12,
    BangEqual = 13,
    Greater = 14,
    GreaterEqual = 15,
    Less = 16,
    LessEqual = 17,
    Add = 18,
    Subtract = 19,
    Multiply = 20,
    Divide = 21,
    Mode = 22,
    Power = 23,
    Not = 24,
    Negate = 25,
    Jump = 26,
    JumpIfFalse = 27,
    Call = 28,
    Begin = 29,
    End = 30,
    Return = 31,
    Exit = 32,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        match byte {
            0 => Some(OpCode::Constant),
            1 => Some(OpCode::Null),
            2 => Some(OpCode::True),
            3 => Some(OpCode::False),
            4 => Some(OpCode::Pop),
            5 => Some(OpCode::GetLocal),
            6 => Some(OpCode::SetLocal),
            7 => Some(OpCode::GetGlobal),
            8 => Some(OpCode::DefineGlobal),
            9 => Some(OpCode::SetGlobal),
            10 => Some(OpCode::GetProperty),
            11 => Some(OpCode::SetProperty),
            12 => Some(OpCode::EqualEqual),
            13 => Some(OpCode::BangEqual),
            14 => Some(OpCode::Greater),
            15 => Some(OpCode::GreaterEqual),
            16 => Some(OpCode::Less),
            17 => Some(OpCode::LessEqual),
            18 => Some(OpCode::Add),
            19 => Some(OpCode::Subtract),
            20 => Some(OpCode::Multiply),
            21 => Some(OpCode::Divide),
            22 => Some(OpCode::Mode),
            23 => Some(OpCode::Power),
            24 => Some(OpCode::Not),
            25 => Some(OpCode::Negate),
            26 => Some(OpCode::Jump),
            27 => Some(OpCode::JumpIfFalse),
            28 => Some(OpCode::Call),
            29 => Some(OpCode::Begin),
            30 => Some(OpCode::End),
            31 => Some(OpCode::Return),
            32 => Some(OpCode::Exit),
            _ => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            OpCode::Constant => "OP_CONSTANT",
            OpCode::Null => "OP_NULL",
            OpCode::True => "OP_TRUE",
            OpCode::False => "OP_FALSE",
            OpCode::Pop => "OP_POP",
            OpCode::GetLocal => "OP_GET_LOCAL",
            OpCode::SetLocal => "OP_SET_LOCAL",
            OpCode::GetGlobal => "OP_GET_GLOBAL",
            OpCode::DefineGlobal => "OP_DEFINE_GLOBAL",
            OpCode::SetGlobal => "OP_SET_GLOBAL",
            OpCode::GetProperty => "OP_GET_PROPERTY",
            OpCode::SetProperty => "OP_SET_PROPERTY",
            OpCode::EqualEqual => "OP_EQUAL_EQUAL",
            OpCode::BangEqual => "OP_BANG_EQUAL",
            OpCode::Greater => "OP_GREATER",
            OpCode::GreaterEqual => "OP_GREATER_EQUAL",
            OpCode::Less => "OP_LESS",
            OpCode::LessEqual => "OP_LESS_EQUAL",
            OpCode::Add => "OP_ADD",
            OpCode::Subtract => "OP_SUBTRACT",
            OpCode::Multiply => "OP_MULTIPLY",
            OpCode::Divide => "OP_DIVIDE",
            OpCode::Mode => "OP_MODE",
            OpCode::Power => "OP_POWER",
            OpCode::Not => "OP_NOT",
            OpCode::Negate => "OP_NEGATE",
            OpCode::Jump => "OP_JUMP",
            OpCode::JumpIfFalse => "OP_JUMP_IF_FALSE",
            OpCode::Call => "OP_CALL",
            OpCode::Begin => "OP_BEGIN",
            OpCode::End => "OP_END",
            OpCode::Return => "OP_RETURN",
            OpCode::Exit => "OP_EXIT",
        }
    }

    /// Inline operand width in bytes, for instruction-accurate skips.
    pub fn operand_size(self) -> usize {
        match self {
            OpCode::Constant
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Call
            | OpCode::Begin => 4,
            _ => 0,
        }
    }
}

// ── Results and errors ───────────────────────────────────────────────

/// Outcome of one formula, tagged with its original batch index. VM
/// runtime failures become `Err` outcomes instead of aborting the
/// batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExResult {
    pub index: usize,
    pub outcome: std::result::Result<Value, String>,
}

impl ExResult {
    pub fn success(index: usize, value: Value) -> Self {
        ExResult { index, outcome: Ok(value) }
    }

    pub fn error(index: usize, message: impl Into<String>) -> Self {
        ExResult { index, outcome: Err(message.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }
}

/// Fatal VM defects. Unlike formula-local runtime errors these abort
/// the whole run: they mean the chunk or the machine itself is broken.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
    #[error("unsupported instruction: {0}")]
    UnsupportedInstruction(&'static str),
    #[error("invalid constant index: {0}")]
    BadConstant(i32),
    #[error("value stack not empty at exit: {0} values left")]
    StackNotEmpty(usize),
    #[error("bytecode truncated")]
    Truncated(#[from] BufferError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// An opcode either failed the current formula (recoverable) or the
/// machine itself (fatal). Keeping the split explicit keeps the
/// recovery loop auditable.
enum Fault {
    Runtime(RuntimeError),
    Fatal(VmError),
}

impl From<RuntimeError> for Fault {
    fn from(e: RuntimeError) -> Fault {
        Fault::Runtime(e)
    }
}

impl From<VmError> for Fault {
    fn from(e: VmError) -> Fault {
        Fault::Fatal(e)
    }
}

impl From<BufferError> for Fault {
    fn from(e: BufferError) -> Fault {
        Fault::Fatal(VmError::Truncated(e))
    }
}

// ── Virtual machine ──────────────────────────────────────────────────

pub const STACK_MAX: usize = 256;

/// Bounded-stack bytecode interpreter. One instance may execute many
/// chunks, but never concurrently; the stack is exclusive state.
#[derive(Debug, Default)]
pub struct Vm {
    stack: Vec<Value>,
}

impl Vm {
    pub fn new() -> Self {
        Vm { stack: Vec::with_capacity(STACK_MAX) }
    }

    pub fn execute(
        &mut self,
        chunk: &Chunk,
        env: &mut dyn Environment,
        functions: &FunctionRegistry,
    ) -> Result<Vec<ExResult>, VmError> {
        let mut reader = ChunkReader::new(chunk)?;
        self.run(&mut reader, env, functions)
    }

    /// Decode-and-execute loop. `Begin`/`End` bracket each formula;
    /// a runtime fault records an error result and skips forward to
    /// the next top-level `Begin`.
    pub fn run(
        &mut self,
        reader: &mut ChunkReader,
        env: &mut dyn Environment,
        functions: &FunctionRegistry,
    ) -> Result<Vec<ExResult>, VmError> {
        self.stack.clear();
        let mut results = Vec::new();
        let mut order: usize = 0;

        loop {
            let byte = reader.read_byte()?;
            let op = OpCode::from_byte(byte).ok_or(VmError::UnknownOpcode(byte))?;

            match op {
                OpCode::Begin => {
                    order = reader.read_i32()? as usize;
                    continue;
                }
                OpCode::Exit => {
                    if !self.stack.is_empty() {
                        return Err(VmError::StackNotEmpty(self.stack.len()));
                    }
                    tracing::trace!(results = results.len(), "vm finished");
                    return Ok(results);
                }
                _ => {}
            }

            match self.step(op, reader, env, functions) {
                Ok(Some(value)) => results.push(ExResult::success(order, value)),
                Ok(None) => {}
                Err(Fault::Runtime(e)) => {
                    tracing::debug!(index = order, error = %e, "formula failed, resuming at next");
                    results.push(ExResult::error(order, e.message));
                    self.stack.clear();
                    skip_to_next_formula(reader)?;
                }
                Err(Fault::Fatal(e)) => return Err(e),
            }
        }
    }

    /// Execute one formula-level opcode. Returns the formula's result
    /// value when the opcode was `End`.
    fn step(
        &mut self,
        op: OpCode,
        reader: &mut ChunkReader,
        env: &mut dyn Environment,
        functions: &FunctionRegistry,
    ) -> Result<Option<Value>, Fault> {
        match op {
            OpCode::End => return Ok(Some(self.pop()?)),

            OpCode::Constant => {
                let value = read_constant(reader)?;
                self.push(value)?;
            }
            OpCode::Null => self.push(Value::Null)?,
            OpCode::True => self.push(Value::Bool(true))?,
            OpCode::False => self.push(Value::Bool(false))?,
            OpCode::Pop => {
                self.pop()?;
            }

            OpCode::GetGlobal => {
                let name = read_string(reader)?;
                let value = env.get_or_default(&name, Value::Null);
                self.push(value)?;
            }
            OpCode::SetGlobal => {
                let name = read_string(reader)?;
                let value = self.peek()?.clone();
                env.put_value(&name, value);
            }

            OpCode::GetProperty => {
                let name = read_string(reader)?;
                let object = self.pop()?;
                if !object.is_instance() {
                    return Err(Fault::Runtime(RuntimeError::new(format!(
                        "Only instances have properties: {}",
                        name
                    ))));
                }
                let value = object.as_instance().map_err(Fault::Runtime)?.borrow().get(&name)?;
                self.push(value)?;
            }
            OpCode::SetProperty => {
                let name = read_string(reader)?;
                let object = self.pop()?;
                if !object.is_instance() {
                    return Err(Fault::Runtime(RuntimeError::new(format!(
                        "Only instances have properties: {}",
                        name
                    ))));
                }
                let value = self.peek()?.clone();
                object.as_instance().map_err(Fault::Runtime)?.borrow_mut().set(&name, value);
            }

            OpCode::Add => self.binary(BinaryOp::Add)?,
            OpCode::Subtract => self.binary(BinaryOp::Subtract)?,
            OpCode::Multiply => self.binary(BinaryOp::Multiply)?,
            OpCode::Divide => self.binary(BinaryOp::Divide)?,
            OpCode::Mode => self.binary(BinaryOp::Mode)?,
            OpCode::Power => self.binary(BinaryOp::Power)?,
            OpCode::Greater => self.binary(BinaryOp::Greater)?,
            OpCode::GreaterEqual => self.binary(BinaryOp::GreaterEqual)?,
            OpCode::Less => self.binary(BinaryOp::Less)?,
            OpCode::LessEqual => self.binary(BinaryOp::LessEqual)?,
            OpCode::EqualEqual => self.binary(BinaryOp::EqualEqual)?,
            OpCode::BangEqual => self.binary(BinaryOp::BangEqual)?,

            OpCode::Not => self.unary(UnaryOp::Not)?,
            OpCode::Negate => self.unary(UnaryOp::Negate)?,

            OpCode::Call => {
                let name = read_string(reader)?;
                self.call_function(&name, functions)?;
            }

            OpCode::JumpIfFalse => {
                let offset = reader.read_i32()?;
                if !self.peek()?.is_truthy() {
                    jump(reader, offset)?;
                }
            }
            OpCode::Jump => {
                let offset = reader.read_i32()?;
                jump(reader, offset)?;
            }

            // Reserved tags; a well-formed chunk never contains them.
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::DefineGlobal
            | OpCode::Return => {
                return Err(Fault::Fatal(VmError::UnsupportedInstruction(op.title())));
            }

            // Handled by the main loop.
            OpCode::Begin | OpCode::Exit => {}
        }
        Ok(None)
    }

    fn call_function(&mut self, name: &str, functions: &FunctionRegistry) -> Result<(), Fault> {
        let function = functions
            .get(name)
            .ok_or_else(|| Fault::Runtime(RuntimeError::new(format!("Function not found: {}", name))))?
            .clone();

        let arity = function.arity();
        let mut args = vec![Value::Null; arity];
        for slot in (0..arity).rev() {
            args[slot] = self.pop()?;
        }

        let result = function.call(&args).map_err(Fault::Runtime)?;
        self.push(result)?;
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp) -> Result<(), Fault> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = binary_operate(&a, &b, op)?;
        self.push(result)?;
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp) -> Result<(), Fault> {
        let operand = self.pop()?;
        let result = unary_operate(&operand, op)?;
        self.push(result)?;
        Ok(())
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= STACK_MAX {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn peek(&self) -> Result<&Value, VmError> {
        self.stack.last().ok_or(VmError::StackUnderflow)
    }
}

fn jump(reader: &mut ChunkReader, offset: i32) -> Result<(), Fault> {
    let target = reader.position() as i64 + offset as i64;
    if target < 0 {
        return Err(Fault::Fatal(VmError::Truncated(BufferError { position: reader.position() })));
    }
    reader.set_position(target as usize).map_err(VmError::Truncated)?;
    Ok(())
}

fn read_constant(reader: &mut ChunkReader) -> Result<Value, Fault> {
    let ix = reader.read_i32()?;
    reader
        .constant(ix as usize)
        .cloned()
        .ok_or(Fault::Fatal(VmError::BadConstant(ix)))
}

fn read_string(reader: &mut ChunkReader) -> Result<String, Fault> {
    match read_constant(reader)? {
        Value::Str(s) => Ok(s),
        _ => Err(Fault::Runtime(RuntimeError::new("Expected string constant"))),
    }
}

/// Advance instruction-by-instruction (skipping operand bytes) until
/// the next top-level `Begin`, leaving the cursor just before it.
/// Nested `Begin`/`End` pairs are depth-matched on the way.
fn skip_to_next_formula(reader: &mut ChunkReader) -> Result<(), VmError> {
    let mut depth: usize = 0;
    while reader.remaining() > 0 {
        let at = reader.position();
        let byte = reader.read_byte()?;
        let op = OpCode::from_byte(byte).ok_or(VmError::UnknownOpcode(byte))?;

        match op {
            OpCode::Begin if depth == 0 => {
                reader.set_position(at)?;
                return Ok(());
            }
            OpCode::Begin => depth += 1,
            OpCode::End if depth > 0 => depth -= 1,
            OpCode::End => return Ok(()),
            _ => {}
        }

        let skip_to = reader.position() + op.operand_size();
        reader.set_position(skip_to)?;
    }
    Ok(())
}
