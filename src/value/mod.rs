use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// A runtime failure inside one formula. Carries a plain message; the
/// batch layers decide whether it aborts the run or just the formula.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into() }
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

// ── Value ────────────────────────────────────────────────────────────

/// Tagged runtime value. `Int` and `Double` are deliberately distinct
/// tags: `7` and `7.0` stay distinguishable from the lexer all the way
/// through evaluation and serialization.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Double(f64),
    Str(String),
    Bool(bool),
    Instance(Rc<RefCell<Instance>>),
}

/// Wire tags for serialized values. `Long` and `Float` are reserved
/// slots in the tag table and are never produced by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Integer = 1,
    Long = 2,
    Float = 3,
    Double = 4,
    String = 5,
    Boolean = 6,
    Instance = 7,
    Null = 8,
}

impl ValueType {
    pub fn from_tag(tag: u8) -> Option<ValueType> {
        match tag {
            1 => Some(ValueType::Integer),
            2 => Some(ValueType::Long),
            3 => Some(ValueType::Float),
            4 => Some(ValueType::Double),
            5 => Some(ValueType::String),
            6 => Some(ValueType::Boolean),
            7 => Some(ValueType::Instance),
            8 => Some(ValueType::Null),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Integer => "Integer",
            ValueType::Long => "Long",
            ValueType::Float => "Float",
            ValueType::Double => "Double",
            ValueType::String => "String",
            ValueType::Boolean => "Boolean",
            ValueType::Instance => "Instance",
            ValueType::Null => "Null",
        }
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Int(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::Str(_) => ValueType::String,
            Value::Bool(_) => ValueType::Boolean,
            Value::Instance(_) => ValueType::Instance,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn is_instance(&self) -> bool {
        matches!(self, Value::Instance(_))
    }

    /// Null is falsy, booleans are themselves, strings are truthy when
    /// non-empty. Everything else, every number included, is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Double(v) => Ok(v.trunc() as i64),
            _ => Err(RuntimeError::new("Not a number")),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Double(v) => Ok(*v),
            _ => Err(RuntimeError::new("Not a number")),
        }
    }

    pub fn as_instance(&self) -> Result<Rc<RefCell<Instance>>> {
        match self {
            Value::Instance(obj) => Ok(Rc::clone(obj)),
            _ => Err(RuntimeError::new("Not an instance")),
        }
    }
}

/// Type-strict equality: values of different tags are never equal,
/// `Int` vs `Double` included. Instances never compare equal at all.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Instance(_) => write!(f, "instance"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Value {
        Value::Instance(Rc::new(RefCell::new(v)))
    }
}

impl From<Rc<RefCell<Instance>>> for Value {
    fn from(v: Rc<RefCell<Instance>>) -> Value {
        Value::Instance(v)
    }
}

/// Values serialize as plain JSON scalars (instances as a field map) so
/// batch results can be reported without exposing the tag model.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Instance(obj) => {
                let obj = obj.borrow();
                let mut map = serializer.serialize_map(Some(obj.fields.len()))?;
                for (name, value) in &obj.fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

// ── Instance ─────────────────────────────────────────────────────────

/// A property bag addressed by `obj.field` expressions. Fields are
/// created on first write; reading an absent field is a runtime error.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    fields: HashMap<String, Value>,
}

impl Instance {
    pub fn new() -> Self {
        Instance::default()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("Undefined property '{}'.", name)))
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── Operator dispatch ────────────────────────────────────────────────

/// Binary operators shared by the tree evaluator and the VM. Both
/// backends funnel through [`binary_operate`] so coercion rules cannot
/// drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mode,
    Power,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    EqualEqual,
    BangEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

pub fn binary_operate(left: &Value, right: &Value, op: BinaryOp) -> Result<Value> {
    match op {
        BinaryOp::Add => {
            if !(left.is_number() || left.is_string()) || !(right.is_number() || right.is_string()) {
                return Err(RuntimeError::new("Operands must be number or string."));
            }
            if left.is_string() || right.is_string() {
                Ok(Value::Str(format!("{}{}", left, right)))
            } else if left.is_double() || right.is_double() {
                Ok(Value::Double(left.as_double()? + right.as_double()?))
            } else {
                Ok(Value::Int(left.as_int()?.wrapping_add(right.as_int()?)))
            }
        }

        BinaryOp::Subtract => {
            check_number_operands(left, right)?;
            if left.is_double() || right.is_double() {
                Ok(Value::Double(left.as_double()? - right.as_double()?))
            } else {
                Ok(Value::Int(left.as_int()?.wrapping_sub(right.as_int()?)))
            }
        }

        BinaryOp::Multiply => {
            check_number_operands(left, right)?;
            if left.is_double() || right.is_double() {
                Ok(Value::Double(left.as_double()? * right.as_double()?))
            } else {
                Ok(Value::Int(left.as_int()?.wrapping_mul(right.as_int()?)))
            }
        }

        BinaryOp::Divide => {
            check_number_operands(left, right)?;
            // An integer zero divisor is an error even against a double
            // dividend; a double zero divisor follows IEEE.
            if matches!(right, Value::Int(0)) {
                return Err(RuntimeError::new("Division by zero."));
            }
            if left.is_double() || right.is_double() {
                Ok(Value::Double(left.as_double()? / right.as_double()?))
            } else {
                Ok(Value::Int(left.as_int()?.wrapping_div(right.as_int()?)))
            }
        }

        BinaryOp::Mode => {
            check_number_operands(left, right)?;
            if matches!(right, Value::Int(0)) {
                return Err(RuntimeError::new("Division by zero."));
            }
            if left.is_double() || right.is_double() {
                Ok(Value::Double(left.as_double()? % right.as_double()?))
            } else {
                Ok(Value::Int(left.as_int()?.wrapping_rem(right.as_int()?)))
            }
        }

        BinaryOp::Power => {
            check_number_operands(left, right)?;
            Ok(Value::Double(left.as_double()?.powf(right.as_double()?)))
        }

        BinaryOp::Greater => {
            check_number_operands(left, right)?;
            Ok(Value::Bool(left.as_double()? > right.as_double()?))
        }

        BinaryOp::GreaterEqual => {
            check_number_operands(left, right)?;
            Ok(Value::Bool(left.as_double()? >= right.as_double()?))
        }

        BinaryOp::Less => {
            check_number_operands(left, right)?;
            Ok(Value::Bool(left.as_double()? < right.as_double()?))
        }

        BinaryOp::LessEqual => {
            check_number_operands(left, right)?;
            Ok(Value::Bool(left.as_double()? <= right.as_double()?))
        }

        BinaryOp::EqualEqual => Ok(Value::Bool(left == right)),
        BinaryOp::BangEqual => Ok(Value::Bool(left != right)),
    }
}

pub fn unary_operate(operand: &Value, op: UnaryOp) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Negate => match operand {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Double(v) => Ok(Value::Double(-v)),
            _ => Err(RuntimeError::new("Operand must be a number.")),
        },
    }
}

fn check_number_operands(left: &Value, right: &Value) -> Result<()> {
    if left.is_number() && right.is_number() {
        return Ok(());
    }
    Err(RuntimeError::new(format!(
        "Operands must be numbers. left: {}, right: {}",
        left, right
    )))
}
