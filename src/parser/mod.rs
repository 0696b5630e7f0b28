use crate::ast::Expr;
use crate::lexer::{Token, TokenKind, scan};

/// Binding powers, low to high. The parser loop continues while the
/// next infix operator binds strictly tighter than the current floor,
/// so right-associative operators recurse at their own level minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    None = 0,
    Assignment = 1,
    Or = 2,
    And = 3,
    Equality = 4,
    Comparison = 5,
    Term = 6,
    Mode = 7,
    Factor = 8,
    Power = 9,
    Unary = 10,
    Call = 11,
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: u32,
    pub lexeme: String,
    pub message: String,
}

impl ParseError {
    fn at(token: &Token, message: impl Into<String>) -> Self {
        ParseError {
            line: token.line,
            lexeme: token.lexeme.clone(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.lexeme.is_empty() {
            write!(f, "[line {}] Error at end: {}", self.line, self.message)
        } else {
            write!(f, "[line {}] Error at '{}': {}", self.line, self.lexeme, self.message)
        }
    }
}

impl std::error::Error for ParseError {}

type Result<T> = std::result::Result<T, ParseError>;

/// Scan and parse a single expression; trailing tokens are an error.
pub fn parse(source: &str) -> std::result::Result<Expr, crate::Error> {
    let tokens = scan(source)?;
    let mut parser = Parser::new(tokens);
    Ok(parser.parse()?)
}

/// Hand-written precedence-climbing parser. Prefix and infix rules are
/// dispatched by token kind; the token stream always ends in EOF.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

const MAX_CALL_ARGS: usize = 255;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, current: 0 }
    }

    pub fn parse(&mut self) -> Result<Expr> {
        let expr = self.expression(Precedence::None as u8)?;
        if self.peek().kind != TokenKind::Eof {
            let token = self.peek().clone();
            return Err(ParseError::at(&token, format!("Unknown token: {}", token.lexeme)));
        }
        Ok(expr)
    }

    /// Parse a sub-expression whose operators all bind strictly
    /// tighter than `min_prec`.
    fn expression(&mut self, min_prec: u8) -> Result<Expr> {
        let token = self.advance().clone();
        let mut lhs = self.prefix(token)?;

        while self.peek().kind != TokenKind::Eof {
            let precedence = infix_precedence(self.peek().kind);
            if precedence as u8 <= min_prec {
                break;
            }
            let operator = self.advance().clone();
            lhs = self.infix(lhs, operator, precedence)?;
        }

        Ok(lhs)
    }

    fn prefix(&mut self, token: Token) -> Result<Expr> {
        match token.kind {
            TokenKind::Number | TokenKind::Str => {
                let value = token.literal.clone().unwrap_or(crate::value::Value::Null);
                Ok(Expr::Literal { value })
            }
            TokenKind::True => Ok(Expr::Literal { value: crate::value::Value::Bool(true) }),
            TokenKind::False => Ok(Expr::Literal { value: crate::value::Value::Bool(false) }),
            TokenKind::Null => Ok(Expr::Literal { value: crate::value::Value::Null }),
            TokenKind::Identifier => Ok(Expr::Identifier { name: token }),
            TokenKind::LeftParen => {
                let expr = self.expression(Precedence::None as u8)?;
                self.consume(TokenKind::RightParen, "Expect ')' after expression.")?;
                Ok(expr)
            }
            TokenKind::Minus | TokenKind::Bang => {
                let right = self.expression(Precedence::Unary as u8)?;
                Ok(Expr::Unary { operator: token, right: Box::new(right) })
            }
            TokenKind::If => self.if_expression(),
            _ => Err(ParseError::at(&token, format!("Unknown token: {}", token.lexeme))),
        }
    }

    fn infix(&mut self, lhs: Expr, operator: Token, precedence: Precedence) -> Result<Expr> {
        match operator.kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => {
                let rhs = self.expression(precedence as u8)?;
                Ok(Expr::Binary { left: Box::new(lhs), operator, right: Box::new(rhs) })
            }

            // Right-associative: parse the rhs one level below itself.
            TokenKind::StarStar => {
                let rhs = self.expression(precedence as u8 - 1)?;
                Ok(Expr::Binary { left: Box::new(lhs), operator, right: Box::new(rhs) })
            }

            TokenKind::And | TokenKind::Or => {
                let rhs = self.expression(precedence as u8)?;
                Ok(Expr::Logic { left: Box::new(lhs), operator, right: Box::new(rhs) })
            }

            // Right-associative, and rewritten by target shape:
            // identifier -> Assign, property get -> Set.
            TokenKind::Equal => {
                let rhs = self.expression(precedence as u8 - 1)?;
                match lhs {
                    Expr::Identifier { name } => {
                        Ok(Expr::Assign { name, value: Box::new(rhs) })
                    }
                    Expr::Get { object, name } => {
                        Ok(Expr::Set { object, name, value: Box::new(rhs) })
                    }
                    _ => Err(ParseError::at(&operator, "Invalid assignment target.")),
                }
            }

            TokenKind::LeftParen => self.call_arguments(lhs),

            TokenKind::Dot => {
                let name = self.consume(TokenKind::Identifier, "Expect property name after '.'.")?;
                Ok(Expr::Get { object: Box::new(lhs), name })
            }

            _ => Err(ParseError::at(&operator, format!("Unknown token: {}", operator.lexeme))),
        }
    }

    fn call_arguments(&mut self, callee: Expr) -> Result<Expr> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if args.len() >= MAX_CALL_ARGS {
                    let token = self.peek().clone();
                    return Err(ParseError::at(&token, "Can't have more than 255 arguments."));
                }
                args.push(self.expression(Precedence::None as u8)?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        let paren = self.consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
        Ok(Expr::Call { callee: Box::new(callee), args, paren })
    }

    fn if_expression(&mut self) -> Result<Expr> {
        self.consume(TokenKind::LeftParen, "Expect '(' after if.")?;
        let condition = self.expression(Precedence::None as u8)?;
        self.consume(TokenKind::Comma, "Expect ',' after condition expression.")?;
        let then_branch = self.expression(Precedence::None as u8)?;

        let else_branch = if self.matches(TokenKind::Comma) {
            Some(Box::new(self.expression(Precedence::None as u8)?))
        } else {
            None
        };

        self.consume(TokenKind::RightParen, "Expect ')' at end of if expression.")?;
        Ok(Expr::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token> {
        if self.check(kind) {
            return Ok(self.advance().clone());
        }
        Err(ParseError::at(self.peek(), message))
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if self.peek().kind != TokenKind::Eof {
            self.current += 1;
        }
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }
}

/// Infix binding power per token kind; `None` means the token has no
/// infix rule and terminates the expression at the current level.
fn infix_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Equal => Precedence::Assignment,
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            Precedence::Comparison
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Percent => Precedence::Mode,
        TokenKind::Star | TokenKind::Slash => Precedence::Factor,
        TokenKind::StarStar => Precedence::Power,
        TokenKind::LeftParen | TokenKind::Dot => Precedence::Call,
        _ => Precedence::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> Expr {
        let tokens = scan(source).unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        let tokens = scan(source).unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        // a + (b * c)
        let expr = parse_ok("a + b * c");
        let Expr::Binary { operator, right, .. } = expr else { panic!("expected binary") };
        assert_eq!(operator.kind, TokenKind::Plus);
        assert!(matches!(*right, Expr::Binary { ref operator, .. } if operator.kind == TokenKind::Star));
    }

    #[test]
    fn power_is_right_associative() {
        // a ** (b ** c)
        let expr = parse_ok("a ** b ** c");
        let Expr::Binary { left, right, .. } = expr else { panic!("expected binary") };
        assert!(matches!(*left, Expr::Identifier { .. }));
        assert!(matches!(*right, Expr::Binary { ref operator, .. } if operator.kind == TokenKind::StarStar));
    }

    #[test]
    fn assignment_is_right_associative() {
        // a = (b = c)
        let expr = parse_ok("a = b = c");
        let Expr::Assign { name, value } = expr else { panic!("expected assign") };
        assert_eq!(name.lexeme, "a");
        assert!(matches!(*value, Expr::Assign { .. }));
    }

    #[test]
    fn grouping_overrides_precedence() {
        // (a + b) * c
        let expr = parse_ok("(a + b) * c");
        let Expr::Binary { left, operator, .. } = expr else { panic!("expected binary") };
        assert_eq!(operator.kind, TokenKind::Star);
        assert!(matches!(*left, Expr::Binary { ref operator, .. } if operator.kind == TokenKind::Plus));
    }

    #[test]
    fn property_assignment_becomes_set() {
        let expr = parse_ok("t1.x = 1");
        let Expr::Set { object, name, .. } = expr else { panic!("expected set") };
        assert_eq!(name.lexeme, "x");
        assert!(matches!(*object, Expr::Identifier { .. }));
    }

    #[test]
    fn chained_property_access() {
        // (a.b).c
        let expr = parse_ok("a.b.c");
        let Expr::Get { object, name } = expr else { panic!("expected get") };
        assert_eq!(name.lexeme, "c");
        assert!(matches!(*object, Expr::Get { .. }));
    }

    #[test]
    fn invalid_assignment_target_fails() {
        let err = parse_err("1 = 2");
        assert!(err.message.contains("Invalid assignment target"));
        let err = parse_err("a + b = 2");
        assert!(err.message.contains("Invalid assignment target"));
    }

    #[test]
    fn call_with_arguments() {
        let expr = parse_ok("abs(1, x + 2)");
        let Expr::Call { callee, args, .. } = expr else { panic!("expected call") };
        assert!(matches!(*callee, Expr::Identifier { .. }));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn if_with_and_without_else() {
        let expr = parse_ok("if(a > 1, 2, 3)");
        let Expr::If { else_branch, .. } = expr else { panic!("expected if") };
        assert!(else_branch.is_some());

        let expr = parse_ok("if(a > 1, 2)");
        let Expr::If { else_branch, .. } = expr else { panic!("expected if") };
        assert!(else_branch.is_none());
    }

    #[test]
    fn malformed_if_fails() {
        assert!(scan("if()").is_ok());
        parse_err("if()");
        parse_err("if(a > 1)");
        parse_err("if(a > 1,)");
    }

    #[test]
    fn boolean_and_null_literals() {
        assert!(matches!(parse_ok("true"), Expr::Literal { value: Value::Bool(true) }));
        assert!(matches!(parse_ok("false"), Expr::Literal { value: Value::Bool(false) }));
        assert!(matches!(parse_ok("null"), Expr::Literal { value: Value::Null }));
    }

    #[test]
    fn trailing_tokens_fail() {
        let err = parse_err("a + b c");
        assert!(err.message.contains("Unknown token"));
    }

    #[test]
    fn error_message_shape() {
        let err = parse_err("a + b c");
        assert_eq!(err.to_string(), "[line 1] Error at 'c': Unknown token: c");
    }

    #[test]
    fn error_at_end() {
        let err = parse_err("(1 + 2");
        assert_eq!(err.lexeme, "");
        assert!(err.to_string().contains("Error at end"));
    }

    #[test]
    fn logic_operators_produce_logic_nodes() {
        let expr = parse_ok("a && b || c");
        // && binds tighter than ||: (a && b) || c
        let Expr::Logic { left, operator, .. } = expr else { panic!("expected logic") };
        assert_eq!(operator.kind, TokenKind::Or);
        assert!(matches!(*left, Expr::Logic { ref operator, .. } if operator.kind == TokenKind::And));
    }

    #[test]
    fn too_many_call_arguments_fails() {
        let args = vec!["1"; 256].join(",");
        let err = parse_err(&format!("f({})", args));
        assert!(err.message.contains("255"));
    }

    #[test]
    fn assignment_inside_if_branch() {
        let expr = parse_ok("if(1 == 1, x1 = 1, y1 = 2)");
        let Expr::If { then_branch, .. } = expr else { panic!("expected if") };
        assert!(matches!(*then_branch, Expr::Assign { .. }));
    }
}
