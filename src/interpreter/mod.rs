use crate::ast::Expr;
use crate::env::Environment;
use crate::functions::FunctionRegistry;
use crate::lexer::TokenKind;
use crate::value::{BinaryOp, RuntimeError, UnaryOp, Value, binary_operate, unary_operate};

type Result<T> = std::result::Result<T, RuntimeError>;

/// Tree-walking backend: executes an expression tree directly against
/// the variable store and function registry. Runtime failures
/// propagate to the caller per formula; the batch layer decides what
/// to do with them.
pub struct Evaluator<'a> {
    env: &'a mut dyn Environment,
    functions: &'a FunctionRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(env: &'a mut dyn Environment, functions: &'a FunctionRegistry) -> Self {
        Evaluator { env, functions }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal { value } => Ok(value.clone()),

            Expr::Identifier { name } => {
                Ok(self.env.get_or_default(&name.lexeme, Value::Null))
            }

            Expr::Unary { operator, right } => {
                let right = self.evaluate(right)?;
                unary_operate(&right, unary_op(operator.kind))
            }

            Expr::Binary { left, operator, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary_operate(&left, &right, binary_op(operator.kind)?)
            }

            // Short-circuit with the same results the VM produces: a
            // decisive left operand yields a plain boolean, otherwise
            // the right operand's value passes through uncoerced.
            Expr::Logic { left, operator, right } => {
                let left = self.evaluate(left)?;
                if operator.kind == TokenKind::Or {
                    if left.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                } else if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                self.evaluate(right)
            }

            Expr::Assign { name, value } => {
                let value = self.evaluate(value)?;
                self.env.put_value(&name.lexeme, value.clone());
                Ok(value)
            }

            Expr::Call { callee, args, .. } => {
                let Expr::Identifier { name } = callee.as_ref() else {
                    return Err(RuntimeError::new("Can only call named functions"));
                };
                let function = self
                    .functions
                    .get(&name.lexeme)
                    .ok_or_else(|| {
                        RuntimeError::new(format!("Function not found: {}", name.lexeme))
                    })?
                    .clone();

                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg)?);
                }

                if values.len() != function.arity() {
                    return Err(RuntimeError::new(format!(
                        "Expected {} arguments but got {}.",
                        function.arity(),
                        values.len()
                    )));
                }
                function.call(&values)
            }

            Expr::If { condition, then_branch, else_branch } => {
                let condition = self.evaluate(condition)?;
                if condition.is_truthy() {
                    self.evaluate(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.evaluate(else_branch)
                } else {
                    Ok(Value::Null)
                }
            }

            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;
                if !object.is_instance() {
                    return Err(RuntimeError::new("Only instances have properties."));
                }
                object.as_instance()?.borrow().get(&name.lexeme)
            }

            Expr::Set { object, name, value } => {
                let value = self.evaluate(value)?;
                let object = self.evaluate(object)?;
                if !object.is_instance() {
                    return Err(RuntimeError::new("Only instances have fields."));
                }
                object.as_instance()?.borrow_mut().set(&name.lexeme, value.clone());
                Ok(value)
            }
        }
    }
}

fn unary_op(kind: TokenKind) -> UnaryOp {
    match kind {
        TokenKind::Bang => UnaryOp::Not,
        _ => UnaryOp::Negate,
    }
}

fn binary_op(kind: TokenKind) -> Result<BinaryOp> {
    match kind {
        TokenKind::Plus => Ok(BinaryOp::Add),
        TokenKind::Minus => Ok(BinaryOp::Subtract),
        TokenKind::Star => Ok(BinaryOp::Multiply),
        TokenKind::Slash => Ok(BinaryOp::Divide),
        TokenKind::Percent => Ok(BinaryOp::Mode),
        TokenKind::StarStar => Ok(BinaryOp::Power),
        TokenKind::Greater => Ok(BinaryOp::Greater),
        TokenKind::GreaterEqual => Ok(BinaryOp::GreaterEqual),
        TokenKind::Less => Ok(BinaryOp::Less),
        TokenKind::LessEqual => Ok(BinaryOp::LessEqual),
        TokenKind::EqualEqual => Ok(BinaryOp::EqualEqual),
        TokenKind::BangEqual => Ok(BinaryOp::BangEqual),
        _ => Err(RuntimeError::new("Unsupported binary operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnvironment;
    use crate::parser::parse;
    use crate::value::Instance;
    use pretty_assertions::assert_eq;

    fn eval_with(source: &str, env: &mut MapEnvironment) -> Result<Value> {
        let functions = FunctionRegistry::with_builtins();
        let expr = parse(source).unwrap();
        Evaluator::new(env, &functions).evaluate(&expr)
    }

    fn eval(source: &str) -> Value {
        eval_with(source, &mut MapEnvironment::new()).unwrap()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("3 * (2 + 1)"), Value::Int(9));
        assert_eq!(eval("3 * (2 + 1.0)"), Value::Double(9.0));
        assert_eq!(eval("7 / 2"), Value::Int(3));
        assert_eq!(eval("7.0 / 2"), Value::Double(3.5));
        assert_eq!(eval("7 % 4"), Value::Int(3));
    }

    #[test]
    fn power_forces_double() {
        assert_eq!(eval("1 + 2 * 3 ** 2 ** 1"), Value::Double(19.0));
        assert_eq!(eval("100 / 5 ** 2 ** 1"), Value::Double(4.0));
    }

    #[test]
    fn division_by_integer_zero_fails() {
        assert!(eval_with("7 / 0", &mut MapEnvironment::new()).is_err());
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(eval(r#""a" + 1"#), Value::Str("a1".into()));
        assert_eq!(eval(r#""a" + 1 * 2"#), Value::Str("a2".into()));
        assert_eq!(eval(r#""hello" + " world""#), Value::Str("hello world".into()));
    }

    #[test]
    fn unknown_variable_defaults_to_null() {
        assert_eq!(eval("missing"), Value::Null);
    }

    #[test]
    fn assignment_writes_store_and_returns_value() {
        let mut env = MapEnvironment::new();
        assert_eq!(eval_with("x = 10", &mut env).unwrap(), Value::Int(10));
        assert_eq!(env.get("x"), Some(Value::Int(10)));
        assert_eq!(eval_with("y = x + 5", &mut env).unwrap(), Value::Int(15));
        assert_eq!(env.get("y"), Some(Value::Int(15)));
    }

    #[test]
    fn chained_assignment() {
        let mut env = MapEnvironment::new();
        env.put("a", 1i64);
        env.put("b", 2i64);
        env.put("c", 3i64);
        assert_eq!(eval_with("x = y = a + b * c", &mut env).unwrap(), Value::Int(7));
        assert_eq!(env.get("x"), Some(Value::Int(7)));
        assert_eq!(env.get("y"), Some(Value::Int(7)));
    }

    #[test]
    fn logic_short_circuits_to_booleans() {
        let mut env = MapEnvironment::new();
        env.put("a", 1i64);
        assert_eq!(eval_with("a == 1 || b == 0", &mut env).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("a == 0 && b == 0", &mut env).unwrap(), Value::Bool(false));
        // The right side never runs on a decisive left.
        assert_eq!(eval_with("a == 1 || 1 / 0", &mut env).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("a == 0 && 1 / 0", &mut env).unwrap(), Value::Bool(false));
    }

    #[test]
    fn logic_passes_right_value_through() {
        assert_eq!(eval("1 && 2"), Value::Int(2));
        assert_eq!(eval(r#""" || "fallback""#), Value::Str("fallback".into()));
    }

    #[test]
    fn if_branches() {
        let mut env = MapEnvironment::new();
        env.put("a", 1i64);
        env.put("b", 2i64);
        env.put("c", 3i64);
        assert_eq!(eval_with("if(a + b * c >= 6, 6 ** 2, -6 * 2)", &mut env).unwrap(), Value::Double(36.0));
        assert_eq!(eval_with("if(a + b * c < 6, 6 ** 2, -6 * 2)", &mut env).unwrap(), Value::Int(-12));
        assert_eq!(eval_with("if(a + b * c < 6, 6 ** 2)", &mut env).unwrap(), Value::Null);
    }

    #[test]
    fn nested_if() {
        let mut env = MapEnvironment::new();
        let grade = r#"if(score >= 85, "A", if(score >= 70, "B", if(score >= 60, "C", "D")))"#;
        env.put("score", 90i64);
        assert_eq!(eval_with(grade, &mut env).unwrap(), Value::Str("A".into()));
        env.put("score", 65i64);
        assert_eq!(eval_with(grade, &mut env).unwrap(), Value::Str("C".into()));
        env.put("score", 50i64);
        assert_eq!(eval_with(grade, &mut env).unwrap(), Value::Str("D".into()));
    }

    #[test]
    fn if_runs_only_the_taken_branch() {
        let mut env = MapEnvironment::new();
        env.put("x1", 0i64);
        env.put("y1", 0i64);
        assert_eq!(eval_with("if(1 == 1, x1 = 1, y1 = 2)", &mut env).unwrap(), Value::Int(1));
        assert_eq!(env.get("x1"), Some(Value::Int(1)));
        assert_eq!(env.get("y1"), Some(Value::Int(0)));
    }

    #[test]
    fn property_get_and_set() {
        let mut env = MapEnvironment::new();
        let mut t1 = Instance::new();
        t1.set("a", Value::Int(1));
        env.put("t1", t1);

        assert_eq!(eval_with("t1.a + 1", &mut env).unwrap(), Value::Int(2));
        assert_eq!(eval_with("t1.x = t1.a * 5", &mut env).unwrap(), Value::Int(5));
        assert_eq!(eval_with("t1.x", &mut env).unwrap(), Value::Int(5));
    }

    #[test]
    fn property_access_on_non_instance_fails() {
        let mut env = MapEnvironment::new();
        env.put("n", 1i64);
        assert!(eval_with("n.a", &mut env).is_err());
        assert!(eval_with("n.a = 1", &mut env).is_err());
    }

    #[test]
    fn undefined_property_fails() {
        let mut env = MapEnvironment::new();
        env.put("t", Instance::new());
        assert!(eval_with("t.missing", &mut env).is_err());
    }

    #[test]
    fn calls_check_registry_and_arity() {
        let mut env = MapEnvironment::new();
        assert_eq!(eval_with("abs(0 - 3)", &mut env).unwrap(), Value::Int(3));
        assert!(eval_with("nope(1)", &mut env).is_err());
        assert!(eval_with("abs(1, 2)", &mut env).is_err());
    }

    #[test]
    fn unary_operators() {
        assert_eq!(eval("-1"), Value::Int(-1));
        assert_eq!(eval("-2.5"), Value::Double(-2.5));
        assert_eq!(eval("!(1 == 1)"), Value::Bool(false));
        assert_eq!(eval(r#"!"""#), Value::Bool(true));
        assert_eq!(eval("!1"), Value::Bool(false));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("1 < 2"), Value::Bool(true));
        assert_eq!(eval("2 >= 2"), Value::Bool(true));
        assert_eq!(eval("1 == 1"), Value::Bool(true));
        assert_eq!(eval("1 == 1.0"), Value::Bool(false));
        assert_eq!(eval(r#""a" == "a""#), Value::Bool(true));
        assert_eq!(eval("1 < 2 && 3 > 2"), Value::Bool(true));
    }
}
