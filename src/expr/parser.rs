//! Lexer and recursive-descent parser for the jq-style query subset.

use serde_json::Value;

use super::eval;
use super::ExpressionError;

/// A parsed, ready-to-run query. Parsing and execution are separated so a
/// different backend could replace the interpreter without touching the
/// task builders.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) ast: Expr,
    source: String,
}

impl Query {
    /// Parse a sanitized expression body (no `${ … }` wrapper).
    pub fn parse(src: &str) -> Result<Self, ExpressionError> {
        let tokens = lex(src).map_err(|detail| ExpressionError::Parse {
            expr: src.to_string(),
            detail,
        })?;

        let mut parser = Parser { tokens, pos: 0 };
        let ast = parser.expression().map_err(|detail| ExpressionError::Parse {
            expr: src.to_string(),
            detail,
        })?;

        if !parser.at_end() {
            return Err(ExpressionError::Parse {
                expr: src.to_string(),
                detail: format!("unexpected trailing input at token {}", parser.pos),
            });
        }

        Ok(Query {
            ast,
            source: src.to_string(),
        })
    }

    /// Execute against the input document, producing the first value.
    pub fn run(&self, doc: &Value) -> Result<Value, ExpressionError> {
        eval::eval(&self.ast, doc)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// `.a.b[0]` rooted at the input document, or `$slot.a` rooted at a
    /// top-level slot.
    Path {
        root: PathRoot,
        segments: Vec<Segment>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathRoot {
    Identity,
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Field(String),
    Index(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Ident(String),
    Str(String),
    Num(f64),
    Dollar,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Op(BinOp),
    Minus,
    True,
    False,
    Null,
}

fn lex(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '$' => {
                chars.next();
                tokens.push(Token::Dollar);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Add));
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Mul));
            }
            '/' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Div));
            }
            '%' => {
                chars.next();
                tokens.push(Token::Op(BinOp::Rem));
            }
            '=' => {
                chars.next();
                match chars.peek() {
                    Some((_, '=')) => {
                        chars.next();
                        tokens.push(Token::Op(BinOp::Eq));
                    }
                    _ => return Err("unexpected '=' (did you mean '==')".to_string()),
                }
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some((_, '=')) => {
                        chars.next();
                        tokens.push(Token::Op(BinOp::Ne));
                    }
                    _ => return Err("unexpected '!' (did you mean '!=')".to_string()),
                }
            }
            '<' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    tokens.push(Token::Op(BinOp::Le));
                } else {
                    tokens.push(Token::Op(BinOp::Lt));
                }
            }
            '>' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    tokens.push(Token::Op(BinOp::Ge));
                } else {
                    tokens.push(Token::Op(BinOp::Gt));
                }
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, '"')) => value.push('"'),
                            Some((_, '\\')) => value.push('\\'),
                            Some((_, '/')) => value.push('/'),
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, 'r')) => value.push('\r'),
                            Some((_, other)) => {
                                return Err(format!("unsupported escape '\\{other}'"))
                            }
                            None => return Err("unterminated string literal".to_string()),
                        },
                        Some((_, c)) => value.push(c),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut end = i;
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &src[start..end];
                let num: f64 = text
                    .parse()
                    .map_err(|_| format!("invalid number literal: {text}"))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &src[start..end];
                tokens.push(match word {
                    "and" => Token::Op(BinOp::And),
                    "or" => Token::Op(BinOp::Or),
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word.to_string()),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            Some(t) => Err(format!("expected {token:?}, found {t:?}")),
            None => Err(format!("expected {token:?}, found end of input")),
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Op(BinOp::Or)) {
            self.next();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.cmp_expr()?;
        while self.peek() == Some(&Token::Op(BinOp::And)) {
            self.next();
            let rhs = self.cmp_expr()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn cmp_expr(&mut self) -> Result<Expr, String> {
        let lhs = self.add_expr()?;
        let op = match self.peek() {
            Some(Token::Op(op @ (BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge))) => *op,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.add_expr()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn add_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(BinOp::Add)) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.mul_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn mul_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::Rem))) => *op,
                _ => break,
            };
            self.next();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            let inner = self.unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Dot) => {
                let segments = self.path_segments(true)?;
                Ok(Expr::Path {
                    root: PathRoot::Identity,
                    segments,
                })
            }
            Some(Token::Dollar) => {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name,
                    other => return Err(format!("expected variable name after '$', found {other:?}")),
                };
                let segments = self.path_segments(false)?;
                Ok(Expr::Path {
                    root: PathRoot::Variable(name),
                    segments,
                })
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let mut args = Vec::new();
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.next();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                }
                Ok(Expr::Call { name, args })
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    /// Parse `.field`, `[index]` chains. `leading_dot_consumed` covers the
    /// identity form where the first `.` is already eaten.
    fn path_segments(&mut self, leading_dot_consumed: bool) -> Result<Vec<Segment>, String> {
        let mut segments = Vec::new();
        let mut expect_field = leading_dot_consumed;

        loop {
            if expect_field {
                expect_field = false;
                match self.peek() {
                    Some(Token::Ident(_)) => {
                        let Some(Token::Ident(name)) = self.next() else {
                            unreachable!()
                        };
                        segments.push(Segment::Field(name));
                    }
                    // A bare `.` is the identity
                    _ if segments.is_empty() => return Ok(segments),
                    other => return Err(format!("expected field name after '.', found {other:?}")),
                }
                continue;
            }

            match self.peek() {
                Some(Token::Dot) => {
                    self.next();
                    expect_field = true;
                }
                Some(Token::LBracket) => {
                    self.next();
                    let index = match self.next() {
                        Some(Token::Num(n)) if n.fract() == 0.0 => n as i64,
                        Some(Token::Minus) => match self.next() {
                            Some(Token::Num(n)) if n.fract() == 0.0 => -(n as i64),
                            other => {
                                return Err(format!("expected array index, found {other:?}"))
                            }
                        },
                        other => return Err(format!("expected array index, found {other:?}")),
                    };
                    self.expect(Token::RBracket)?;
                    segments.push(Segment::Index(index));
                }
                _ => break,
            }
        }

        Ok(segments)
    }
}

pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
