//! recalc: a batch formula engine with dependency-ordered
//! recalculation.
//!
//! Callers hand over a batch of formula sources plus a variable
//! backing store. The pipeline parses each source, analyzes which
//! variables every formula reads and writes, topologically orders
//! assignment formulas so producers run before consumers, and then
//! executes the batch, either by walking the syntax trees or by
//! compiling everything into one bytecode chunk for the stack VM.
//! Chunks serialize to a compact binary form and can be re-executed
//! later without re-parsing.
//!
//! ```
//! use recalc::{Environment, MapEnvironment, Runner, Value};
//!
//! let mut env = MapEnvironment::new();
//! env.put("m", 2i64);
//! env.put("n", 4i64);
//!
//! let runner = Runner::new();
//! let results = runner
//!     .execute_batch(&["b = a * 2", "a = m + n"], &mut env)
//!     .unwrap();
//!
//! // `a = m + n` ran first even though it came second.
//! assert_eq!(env.get("b"), Some(Value::Int(12)));
//! assert_eq!(results[0].as_ref().unwrap().value(), Some(&Value::Int(12)));
//! ```

pub mod analysis;
pub mod ast;
pub mod bytes;
pub mod env;
pub mod functions;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod runner;
pub mod schedule;
pub mod value;
pub mod vm;

pub use analysis::{FormulaInfo, VariableSet, analyze};
pub use ast::Expr;
pub use env::{Environment, Field, MapEnvironment};
pub use functions::{Callable, FunctionRegistry};
pub use interpreter::Evaluator;
pub use lexer::{LexError, Token, TokenKind, scan};
pub use parser::{ParseError, Parser, parse};
pub use runner::{BatchResults, ExecuteMode, Runner};
pub use schedule::{CycleError, Scheduler};
pub use value::{Instance, RuntimeError, Value};
pub use vm::{Chunk, ChunkReader, CompileError, Compiler, ExResult, Vm, VmError, disassemble};

/// Everything that can go wrong across the pipeline. Structural
/// failures (lex, parse, compile, cycle) abort the operation that hit
/// them; `Vetoed` means the environment refused the batch before any
/// formula ran.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("batch execution vetoed by the environment")]
    Vetoed,
}
