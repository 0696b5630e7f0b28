use logos::Logos;

use crate::value::Value;

/// Token kinds for the formula language. Identifiers accept CJK
/// ideographs (URO + Extension A) so field names need not be Latin.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip("//[^\n]*", allow_greedy = true))]
pub enum TokenKind {
    // Single-character tokens
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token(";")]
    Semicolon,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // One or two character tokens
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token("&&")]
    And,
    #[token("||")]
    Or,

    // Literals
    #[regex(r#""[^"]*""#)]
    Str,
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,
    #[regex(r"[A-Za-z_\u{4E00}-\u{9FFF}\u{3400}-\u{4DBF}][A-Za-z0-9_\u{4E00}-\u{9FFF}\u{3400}-\u{4DBF}]*")]
    Identifier,

    // Keywords (most are reserved; only if/true/false/null parse today)
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("fun")]
    Fun,
    #[token("if")]
    If,
    #[token("null")]
    Null,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,

    // Newlines only advance the line counter; scan() filters them out.
    #[token("\n")]
    Newline,

    // Appended by scan(); NUL never occurs in real sources.
    #[token("\0")]
    Eof,
}

/// One scanned token. The lexeme keeps the original source text for
/// error reporting; literals carry their decoded [`Value`].
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub literal: Option<Value>,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, literal: Option<Value>, line: u32) -> Self {
        Token { kind, lexeme: lexeme.into(), literal, line }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("[line {line}] Error: {message}")]
pub struct LexError {
    pub line: u32,
    pub message: String,
}

/// Scan a source string into tokens, always terminated by an EOF token.
pub fn scan(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();
    let mut line: u32 = 1;

    while let Some(result) = lexer.next() {
        match result {
            Ok(TokenKind::Newline) => line += 1,
            Ok(kind) => {
                let lexeme = lexer.slice();
                let literal = match kind {
                    TokenKind::Number => Some(number_literal(lexeme, line)?),
                    TokenKind::Str => Some(Value::Str(lexeme[1..lexeme.len() - 1].to_string())),
                    _ => None,
                };
                tokens.push(Token::new(kind, lexeme, literal, line));
                // A string literal may span newlines; keep the counter honest.
                if kind == TokenKind::Str {
                    line += lexeme.matches('\n').count() as u32;
                }
            }
            Err(()) => {
                let slice = lexer.slice();
                let message = if slice.starts_with('"') {
                    "Unterminated string.".to_string()
                } else {
                    format!("Unknown character: {}", slice)
                };
                return Err(LexError { line, message });
            }
        }
    }

    tokens.push(Token::new(TokenKind::Eof, "", None, line));
    Ok(tokens)
}

/// Decode a numeric lexeme. The presence of a decimal point decides
/// Int vs Double; `7` and `7.0` are different values for good.
fn number_literal(lexeme: &str, line: u32) -> Result<Value, LexError> {
    if lexeme.contains('.') {
        lexeme
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| LexError { line, message: format!("Invalid numeric literal: {}", lexeme) })
    } else {
        lexeme
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| LexError { line, message: format!("Numeric literal out of range: {}", lexeme) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        scan(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_operators() {
        assert_eq!(
            kinds("a + b * c ** 2"),
            vec![
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Identifier,
                TokenKind::Star,
                TokenKind::Identifier,
                TokenKind::StarStar,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_two_char_operators() {
        assert_eq!(
            kinds("a >= b != c && d || !e"),
            vec![
                TokenKind::Identifier,
                TokenKind::GreaterEqual,
                TokenKind::Identifier,
                TokenKind::BangEqual,
                TokenKind::Identifier,
                TokenKind::And,
                TokenKind::Identifier,
                TokenKind::Or,
                TokenKind::Bang,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_and_decimal_literals_stay_distinct() {
        let tokens = scan("7 7.0 3.14").unwrap();
        assert_eq!(tokens[0].literal, Some(Value::Int(7)));
        assert_eq!(tokens[1].literal, Some(Value::Double(7.0)));
        assert_eq!(tokens[2].literal, Some(Value::Double(3.14)));
    }

    #[test]
    fn trailing_dot_is_not_part_of_a_number() {
        assert_eq!(
            kinds("7.x"),
            vec![TokenKind::Number, TokenKind::Dot, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn string_literal_content() {
        let tokens = scan(r#""hello world""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].literal, Some(Value::Str("hello world".into())));
    }

    #[test]
    fn unterminated_string_fails() {
        let err = scan(r#"1 + "abc"#).unwrap_err();
        assert_eq!(err.message, "Unterminated string.");
    }

    #[test]
    fn unknown_character_fails_with_line() {
        let err = scan("1 +\n2 @ 3").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains('@'));
    }

    #[test]
    fn lone_ampersand_fails() {
        assert!(scan("a & b").is_err());
        assert!(scan("a | b").is_err());
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        assert_eq!(
            kinds("a // trailing comment\n+ b"),
            vec![TokenKind::Identifier, TokenKind::Plus, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn newlines_advance_line_counter() {
        let tokens = scan("a\nb\n\nc").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 4);
    }

    #[test]
    fn keywords_are_recognized() {
        assert_eq!(kinds("if"), vec![TokenKind::If, TokenKind::Eof]);
        assert_eq!(kinds("iffy"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(
            kinds("true false null var"),
            vec![TokenKind::True, TokenKind::False, TokenKind::Null, TokenKind::Var, TokenKind::Eof]
        );
    }

    #[test]
    fn cjk_identifiers() {
        let tokens = scan("单价 * 数量").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].lexeme, "单价");
        assert_eq!(tokens[2].lexeme, "数量");
    }

    #[test]
    fn mixed_ascii_cjk_identifier() {
        let tokens = scan("row1_金额").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].lexeme, "row1_金额");
    }
}
