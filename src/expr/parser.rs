use super::{BinaryOp, Expr, ExprError, ExprResult, Func, UnaryOp};
use crate::types::Value;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    BracketIdentifier(String),
    Int(i64),
    Float(f64),
    String(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    EqualsEquals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut buf = String::new();
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            buf.push(ch);
            self.bump();
        }
        buf
    }

    fn next_token(&mut self) -> ExprResult<Token> {
        self.consume_while(char::is_whitespace);
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '(' => {
                self.bump();
                Token::LParen
            }
            ')' => {
                self.bump();
                Token::RParen
            }
            ',' => {
                self.bump();
                Token::Comma
            }
            '+' => {
                self.bump();
                Token::Plus
            }
            '-' => {
                self.bump();
                Token::Minus
            }
            '%' => {
                self.bump();
                Token::Percent
            }
            '*' => {
                self.bump();
                if self.eat('*') {
                    Token::StarStar
                } else {
                    Token::Star
                }
            }
            '/' => {
                self.bump();
                if self.eat('/') {
                    Token::SlashSlash
                } else {
                    Token::Slash
                }
            }
            '=' => {
                self.bump();
                if self.eat('=') {
                    Token::EqualsEquals
                } else {
                    return Err(ExprError::Parse(format!(
                        "assignment is not allowed in {:?}",
                        self.input
                    )));
                }
            }
            '!' => {
                self.bump();
                if self.eat('=') {
                    Token::NotEquals
                } else {
                    Token::Not
                }
            }
            '<' => {
                self.bump();
                if self.eat('=') {
                    Token::LessEquals
                } else if self.eat('>') {
                    Token::NotEquals
                } else {
                    Token::Less
                }
            }
            '>' => {
                self.bump();
                if self.eat('=') {
                    Token::GreaterEquals
                } else {
                    Token::Greater
                }
            }
            '&' => {
                self.bump();
                if self.eat('&') {
                    Token::And
                } else {
                    return Err(ExprError::Parse("unexpected character '&'".into()));
                }
            }
            '|' => {
                self.bump();
                if self.eat('|') {
                    Token::Or
                } else {
                    return Err(ExprError::Parse("unexpected character '|'".into()));
                }
            }
            '"' | '\'' => {
                self.bump();
                Token::String(self.lex_string(ch)?)
            }
            '[' => {
                self.bump();
                let name = self.consume_while(|c| c != ']');
                if !self.eat(']') {
                    return Err(ExprError::Parse("unterminated bracket identifier".into()));
                }
                Token::BracketIdentifier(name.trim().to_string())
            }
            c if c.is_ascii_digit() || c == '.' => self.lex_number()?,
            c if is_ident_start(c) => {
                let ident = self.consume_while(is_ident_part);
                match ident.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    "null" | "None" => Token::Null,
                    _ => Token::Identifier(ident),
                }
            }
            other => {
                return Err(ExprError::Parse(format!(
                    "unexpected character {other:?} in {:?}",
                    self.input
                )))
            }
        };
        Ok(token)
    }

    fn lex_string(&mut self, quote: char) -> ExprResult<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ExprError::Parse("unterminated string".into())),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err(ExprError::Parse("unterminated string".into())),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn lex_number(&mut self) -> ExprResult<Token> {
        let mut text = self.consume_while(|c| c.is_ascii_digit() || c == '.');
        let mut is_float = text.contains('.');
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            text.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.bump();
            }
            let digits = self.consume_while(|c| c.is_ascii_digit());
            if digits.is_empty() {
                return Err(ExprError::Parse(format!(
                    "invalid number {text:?} (expected exponent digits)"
                )));
            }
            text.push_str(&digits);
        }
        // A name straight after a number (`1x`) or a second dot is malformed.
        if self.peek().is_some_and(is_ident_start) {
            return Err(ExprError::Parse(format!("invalid number {text:?}")));
        }

        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| ExprError::Parse(format!("invalid number {text:?}")))
        } else {
            match text.parse::<i64>() {
                Ok(i) => Ok(Token::Int(i)),
                Err(_) => text
                    .parse::<f64>()
                    .map(Token::Float)
                    .map_err(|_| ExprError::Parse(format!("invalid number {text:?}"))),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> ExprResult<Self> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn bump(&mut self) -> ExprResult<Token> {
        let current = std::mem::replace(&mut self.lookahead, Token::Eof);
        self.lookahead = self.lexer.next_token()?;
        Ok(current)
    }

    fn expect(&mut self, token: Token) -> ExprResult<()> {
        if self.lookahead == token {
            self.bump()?;
            Ok(())
        } else {
            Err(ExprError::Parse(format!(
                "expected {token:?}, found {:?}",
                self.lookahead
            )))
        }
    }

    fn parse(&mut self) -> ExprResult<Expr> {
        if self.lookahead == Token::Eof {
            return Err(ExprError::Parse("empty expression".into()));
        }
        let expr = self.parse_expr(0)?;
        if self.lookahead != Token::Eof {
            return Err(ExprError::Parse(format!(
                "unexpected token {:?}",
                self.lookahead
            )));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self, min_prec: u8) -> ExprResult<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some((op, prec)) = self.infix_binding_power() {
            if prec < min_prec {
                break;
            }
            self.bump()?;
            // `**` is right-associative; everything else associates left.
            let next_prec = if op == BinaryOp::Power { prec } else { prec + 1 };
            let right = self.parse_expr(next_prec)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> ExprResult<Expr> {
        match self.bump()? {
            Token::Not => {
                let expr = self.parse_expr(3)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            Token::Minus => {
                let expr = self.parse_expr(7)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Negate,
                    expr: Box::new(expr),
                })
            }
            Token::Plus => self.parse_expr(7),
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::String(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::BracketIdentifier(name) => Ok(Expr::Name(name)),
            Token::Identifier(name) => {
                if self.lookahead == Token::LParen {
                    self.parse_call(name)
                } else {
                    Ok(Expr::Name(name))
                }
            }
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError::Parse(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }

    fn parse_call(&mut self, name: String) -> ExprResult<Expr> {
        let func = Func::from_name(&name).ok_or(ExprError::DisallowedFunction(name.clone()))?;
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.lookahead != Token::RParen {
            loop {
                args.push(self.parse_expr(0)?);
                if self.lookahead == Token::Comma {
                    self.bump()?;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen)?;

        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(ExprError::Parse(format!(
                "{name}() takes {} argument(s), got {}",
                match max {
                    Some(max) if max == min => min.to_string(),
                    Some(max) => format!("{min} to {max}"),
                    None => format!("at least {min}"),
                },
                args.len()
            )));
        }
        Ok(Expr::Call { func, args })
    }

    fn infix_binding_power(&self) -> Option<(BinaryOp, u8)> {
        // Higher binds tighter:
        //   **  >  unary -  >  * / // %  >  + -  >  comparisons, in  >  not  >  and  >  or
        match self.lookahead {
            Token::Or => Some((BinaryOp::Or, 1)),
            Token::And => Some((BinaryOp::And, 2)),
            Token::EqualsEquals => Some((BinaryOp::Equals, 4)),
            Token::NotEquals => Some((BinaryOp::NotEquals, 4)),
            Token::Less => Some((BinaryOp::Less, 4)),
            Token::LessEquals => Some((BinaryOp::LessEquals, 4)),
            Token::Greater => Some((BinaryOp::Greater, 4)),
            Token::GreaterEquals => Some((BinaryOp::GreaterEquals, 4)),
            Token::In => Some((BinaryOp::In, 4)),
            Token::Plus => Some((BinaryOp::Add, 5)),
            Token::Minus => Some((BinaryOp::Subtract, 5)),
            Token::Star => Some((BinaryOp::Multiply, 6)),
            Token::Slash => Some((BinaryOp::Divide, 6)),
            Token::SlashSlash => Some((BinaryOp::FloorDivide, 6)),
            Token::Percent => Some((BinaryOp::Modulo, 6)),
            Token::StarStar => Some((BinaryOp::Power, 8)),
            _ => None,
        }
    }
}

/// Parse an expression into its AST
pub fn parse(input: &str) -> ExprResult<Expr> {
    Parser::new(input)?.parse()
}
