use crate::lexer::Token;
use crate::value::Value;

/// The closed set of expression node kinds. Every consumer (analyzer,
/// evaluator, compiler) matches exhaustively, so adding a kind here is
/// a compile error everywhere it matters.
///
/// Operator tokens are kept on the nodes for error-location reporting.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A literal value straight from the lexer.
    Literal { value: Value },
    /// A bare variable reference.
    Identifier { name: Token },
    /// Prefix `-` or `!`.
    Unary { operator: Token, right: Box<Expr> },
    /// The twelve arithmetic / comparison / equality operators.
    Binary { left: Box<Expr>, operator: Token, right: Box<Expr> },
    /// Short-circuit `&&` / `||`.
    Logic { left: Box<Expr>, operator: Token, right: Box<Expr> },
    /// `name = value`; the parser guarantees the target is a plain
    /// identifier (property targets become `Set`).
    Assign { name: Token, value: Box<Expr> },
    /// Property read `object.name`.
    Get { object: Box<Expr>, name: Token },
    /// Property write `object.name = value`.
    Set { object: Box<Expr>, name: Token, value: Box<Expr> },
    /// `callee(args...)`; `paren` is the closing parenthesis.
    Call { callee: Box<Expr>, args: Vec<Expr>, paren: Token },
    /// `if(condition, then [, else])`.
    If { condition: Box<Expr>, then_branch: Box<Expr>, else_branch: Option<Box<Expr>> },
}

impl Expr {
    /// Whether this expression writes a variable or a property when
    /// evaluated; the batch scheduler only orders these.
    pub fn is_assign(&self) -> bool {
        matches!(self, Expr::Assign { .. } | Expr::Set { .. })
    }
}
