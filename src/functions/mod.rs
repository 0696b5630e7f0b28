use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{RuntimeError, Value};

/// A host function callable from formulas. Call sites must pass exactly
/// `arity()` arguments; the compiler checks this at compile time and
/// the backends check again at run time.
pub trait Callable {
    fn arity(&self) -> usize;
    fn call(&self, args: &[Value]) -> Result<Value, RuntimeError>;
}

/// Explicit name → callable table, owned by whoever drives a pipeline
/// and passed by reference into the evaluator, compiler and VM. There
/// is deliberately no process-wide registry.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Rc<dyn Callable>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// A registry pre-populated with the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = FunctionRegistry::new();
        registry.register("abs", Rc::new(Abs));
        registry.register("clock", Rc::new(Clock));
        registry
    }

    pub fn register(&mut self, name: &str, function: Rc<dyn Callable>) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn remove(&mut self, name: &str) {
        self.functions.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&Rc<dyn Callable>> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

// ── Built-ins ────────────────────────────────────────────────────────

/// `abs(x)`: absolute value, preserving Int vs Double.
struct Abs;

impl Callable for Abs {
    fn arity(&self) -> usize {
        1
    }

    fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        match args {
            [Value::Int(v)] => Ok(Value::Int(v.wrapping_abs())),
            [Value::Double(v)] => Ok(Value::Double(v.abs())),
            _ => Err(RuntimeError::new("Operand must be a number.")),
        }
    }
}

/// `clock()`: milliseconds since the Unix epoch, as a string.
struct Clock;

impl Callable for Clock {
    fn arity(&self) -> usize {
        0
    }

    fn call(&self, _args: &[Value]) -> Result<Value, RuntimeError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Ok(Value::Str(millis.to_string()))
    }
}
