use std::collections::BTreeSet;

use crate::ast::Expr;
use crate::analysis::FormulaInfo;
use crate::functions::FunctionRegistry;
use crate::lexer::TokenKind;
use crate::value::Value;
use crate::vm::chunk::{Chunk, ChunkError, ChunkWriter};
use crate::vm::OpCode;

/// Structural compilation failures. Unlike runtime errors these abort
/// the whole batch; a chunk is only produced when every formula
/// lowered cleanly.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error("Function undefined: {0}")]
    UnknownFunction(String),
    #[error("Expected {expected} arguments but got {found} for '{name}'.")]
    ArityMismatch { name: String, expected: usize, found: usize },
    #[error("Can only compile calls to named functions")]
    BadCallee,
    #[error("Unsupported binary operator: {0}")]
    UnsupportedOperator(String),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

type Result<T> = std::result::Result<T, CompileError>;

const JUMP_OPERAND_SIZE: usize = 4;

/// Lowers expression trees to stack-machine bytecode. Each formula is
/// bracketed with `Begin <index>` / `End`; `end_compile` appends the
/// final `Exit`, records the variable bitset and freezes the chunk.
pub struct Compiler<'a> {
    writer: ChunkWriter,
    var_set: BTreeSet<String>,
    functions: &'a FunctionRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Compiler {
            writer: ChunkWriter::new(),
            var_set: BTreeSet::new(),
            functions,
        }
    }

    pub fn begin_compile(&mut self) {
        self.writer.clear();
        self.var_set.clear();
    }

    /// Compile one formula and collect its variable names for the
    /// chunk's variable bitset.
    pub fn compile(&mut self, info: &FormulaInfo) -> Result<()> {
        self.compile_expr(info.expr(), info.index())?;
        self.var_set.extend(info.precursors().iter().cloned());
        self.var_set.extend(info.successors().iter().cloned());
        Ok(())
    }

    pub fn compile_expr(&mut self, expr: &Expr, order: usize) -> Result<()> {
        self.emit_with_operand(OpCode::Begin, order as i32);
        self.emit_expr(expr)?;
        self.emit(OpCode::End);
        Ok(())
    }

    pub fn end_compile(&mut self) -> Result<Chunk> {
        self.emit(OpCode::Exit);
        self.writer.set_variables(&self.var_set)?;
        Ok(self.writer.flush()?)
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal { value } => match value {
                Value::Bool(true) => self.emit(OpCode::True),
                Value::Bool(false) => self.emit(OpCode::False),
                Value::Null => self.emit(OpCode::Null),
                other => self.emit_constant(other.clone())?,
            },

            Expr::Identifier { name } => {
                let ix = self.writer.add_constant(Value::Str(name.lexeme.clone()))?;
                self.emit_with_operand(OpCode::GetGlobal, ix as i32);
            }

            Expr::Unary { operator, right } => {
                self.emit_expr(right)?;
                match operator.kind {
                    TokenKind::Bang => self.emit(OpCode::Not),
                    _ => self.emit(OpCode::Negate),
                }
            }

            Expr::Binary { left, operator, right } => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(binary_opcode(operator.kind)?);
            }

            Expr::Logic { left, operator, right } => {
                self.emit_logic(left, operator.kind, right)?;
            }

            Expr::Assign { name, value } => {
                self.emit_expr(value)?;
                let ix = self.writer.add_constant(Value::Str(name.lexeme.clone()))?;
                self.emit_with_operand(OpCode::SetGlobal, ix as i32);
            }

            Expr::Call { callee, args, .. } => {
                let Expr::Identifier { name } = callee.as_ref() else {
                    return Err(CompileError::BadCallee);
                };
                let function = self
                    .functions
                    .get(&name.lexeme)
                    .ok_or_else(|| CompileError::UnknownFunction(name.lexeme.clone()))?;
                if args.len() != function.arity() {
                    return Err(CompileError::ArityMismatch {
                        name: name.lexeme.clone(),
                        expected: function.arity(),
                        found: args.len(),
                    });
                }
                for arg in args {
                    self.emit_expr(arg)?;
                }
                let ix = self.writer.add_constant(Value::Str(name.lexeme.clone()))?;
                self.emit_with_operand(OpCode::Call, ix as i32);
            }

            Expr::If { condition, then_branch, else_branch } => {
                self.emit_expr(condition)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.emit(OpCode::Pop);
                self.emit_expr(then_branch)?;
                let end_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump)?;
                self.emit(OpCode::Pop);
                match else_branch {
                    Some(else_branch) => self.emit_expr(else_branch)?,
                    None => self.emit(OpCode::Null),
                }
                self.patch_jump(end_jump)?;
            }

            Expr::Get { object, name } => {
                self.emit_expr(object)?;
                let ix = self.writer.add_constant(Value::Str(name.lexeme.clone()))?;
                self.emit_with_operand(OpCode::GetProperty, ix as i32);
            }

            Expr::Set { object, name, value } => {
                self.emit_expr(value)?;
                self.emit_expr(object)?;
                let ix = self.writer.add_constant(Value::Str(name.lexeme.clone()))?;
                self.emit_with_operand(OpCode::SetProperty, ix as i32);
            }
        }
        Ok(())
    }

    /// Short-circuit lowering that leaves exactly what the tree
    /// evaluator produces: a plain boolean when the left operand
    /// decides, the right operand's raw value otherwise.
    fn emit_logic(&mut self, left: &Expr, kind: TokenKind, right: &Expr) -> Result<()> {
        self.emit_expr(left)?;
        if kind == TokenKind::And {
            let false_jump = self.emit_jump(OpCode::JumpIfFalse);
            self.emit(OpCode::Pop);
            self.emit_expr(right)?;
            let end_jump = self.emit_jump(OpCode::Jump);
            self.patch_jump(false_jump)?;
            self.emit(OpCode::Pop);
            self.emit(OpCode::False);
            self.patch_jump(end_jump)?;
        } else {
            let false_jump = self.emit_jump(OpCode::JumpIfFalse);
            let true_jump = self.emit_jump(OpCode::Jump);
            self.patch_jump(false_jump)?;
            self.emit(OpCode::Pop);
            self.emit_expr(right)?;
            let end_jump = self.emit_jump(OpCode::Jump);
            self.patch_jump(true_jump)?;
            self.emit(OpCode::Pop);
            self.emit(OpCode::True);
            self.patch_jump(end_jump)?;
        }
        Ok(())
    }

    fn emit(&mut self, op: OpCode) {
        self.writer.write_byte(op as u8);
    }

    fn emit_with_operand(&mut self, op: OpCode, operand: i32) {
        self.emit(op);
        self.writer.write_i32(operand);
    }

    fn emit_constant(&mut self, value: Value) -> Result<()> {
        let ix = self.writer.add_constant(value)?;
        self.emit_with_operand(OpCode::Constant, ix as i32);
        Ok(())
    }

    /// Emit a jump with a placeholder offset; the returned index is
    /// patched once the target position is known.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit(op);
        self.writer.write_i32(-1);
        self.writer.position() - JUMP_OPERAND_SIZE
    }

    fn patch_jump(&mut self, index: usize) -> Result<()> {
        let offset = self.writer.position() - index - JUMP_OPERAND_SIZE;
        Ok(self.writer.update_i32(index, offset as i32)?)
    }
}

fn binary_opcode(kind: TokenKind) -> Result<OpCode> {
    match kind {
        TokenKind::Plus => Ok(OpCode::Add),
        TokenKind::Minus => Ok(OpCode::Subtract),
        TokenKind::Star => Ok(OpCode::Multiply),
        TokenKind::Slash => Ok(OpCode::Divide),
        TokenKind::Percent => Ok(OpCode::Mode),
        TokenKind::StarStar => Ok(OpCode::Power),
        TokenKind::Greater => Ok(OpCode::Greater),
        TokenKind::GreaterEqual => Ok(OpCode::GreaterEqual),
        TokenKind::Less => Ok(OpCode::Less),
        TokenKind::LessEqual => Ok(OpCode::LessEqual),
        TokenKind::EqualEqual => Ok(OpCode::EqualEqual),
        TokenKind::BangEqual => Ok(OpCode::BangEqual),
        other => Err(CompileError::UnsupportedOperator(format!("{:?}", other))),
    }
}
