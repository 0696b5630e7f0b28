use std::collections::HashMap;
use std::fmt;

use crate::value::Value;

/// A dotted variable path (`A.B.c`). The core treats the full path as
/// one opaque variable name; `Field` is how the path is handed to the
/// backing store, which owns any further decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    segments: Vec<String>,
}

impl Field {
    pub fn parse(src: &str) -> Field {
        Field { segments: src.split('.').map(str::to_string).collect() }
    }

    /// The leaf segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// The pluggable variable backing store consulted before and during a
/// batch run. Dotted names are opaque strings here.
pub trait Environment {
    /// Called once per batch with every distinct variable the batch
    /// references, before any formula runs. Returning `false` vetoes
    /// the whole batch.
    fn before_execute(&mut self, vars: &[Field]) -> bool;

    fn get(&self, id: &str) -> Option<Value>;

    fn get_or_default(&self, id: &str, default: Value) -> Value {
        self.get(id).unwrap_or(default)
    }

    fn put_value(&mut self, id: &str, value: Value);

    fn size(&self) -> usize;
}

/// In-memory store backed by a hash map; accepts every batch.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    map: HashMap<String, Value>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        MapEnvironment::default()
    }

    /// Convenience write that infers the value tag from the Rust type.
    pub fn put(&mut self, id: &str, value: impl Into<Value>) {
        self.map.insert(id.to_string(), value.into());
    }
}

impl Environment for MapEnvironment {
    fn before_execute(&mut self, _vars: &[Field]) -> bool {
        true
    }

    fn get(&self, id: &str) -> Option<Value> {
        self.map.get(id).cloned()
    }

    fn put_value(&mut self, id: &str, value: Value) {
        self.map.insert(id.to_string(), value);
    }

    fn size(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn field_round_trips_dotted_paths() {
        let field = Field::parse("A.B.c");
        assert_eq!(field.segments().len(), 3);
        assert_eq!(field.name(), "c");
        assert_eq!(field.to_string(), "A.B.c");
    }

    #[test]
    fn simple_field_has_one_segment() {
        let field = Field::parse("total");
        assert_eq!(field.segments(), &["total".to_string()]);
        assert_eq!(field.name(), "total");
    }

    #[test]
    fn map_environment_stores_and_defaults() {
        let mut env = MapEnvironment::new();
        assert_eq!(env.get("x"), None);
        assert_eq!(env.get_or_default("x", Value::Null), Value::Null);
        env.put("x", 7i64);
        env.put("name", "hi");
        assert_eq!(env.get("x"), Some(Value::Int(7)));
        assert_eq!(env.get("name"), Some(Value::Str("hi".into())));
        assert_eq!(env.size(), 2);
    }
}
