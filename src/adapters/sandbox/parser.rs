//! Parser for listener scripts.
//!
//! Statements are `let` bindings, assignments (optionally into a nested
//! path) and `if`/`else if`/`else` chains. Expressions use precedence
//! climbing for binary operators, with a ternary `?:` on top.

use serde_json::{Number, Value};

use super::lexer::{tokenize, Spanned, Token};
use super::ScriptError;

/// Nesting limit for expressions and blocks.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Member { target: Box<Expr>, name: String },
    Index { target: Box<Expr>, index: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    Conditional { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Coalesce,
    Or,
    And,
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
}

impl BinaryOp {
    fn from_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::Coalesce => Self::Coalesce,
            Token::Or => Self::Or,
            Token::And => Self::And,
            Token::Eq => Self::Eq,
            Token::Ne => Self::Ne,
            Token::Lt => Self::Lt,
            Token::Le => Self::Le,
            Token::Gt => Self::Gt,
            Token::Ge => Self::Ge,
            Token::Plus => Self::Add,
            Token::Minus => Self::Sub,
            Token::Star => Self::Mul,
            Token::Slash => Self::Div,
            Token::Percent => Self::Rem,
            _ => return None,
        })
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Coalesce => 1,
            Self::Or => 2,
            Self::And => 3,
            Self::Eq | Self::Ne => 4,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 5,
            Self::Add | Self::Sub => 6,
            Self::Mul | Self::Div | Self::Rem => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Field(String),
    Index(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
    },
    Assign {
        name: String,
        path: Vec<PathSegment>,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut statements = Vec::new();
    while parser.current() != &Token::Eof {
        statements.push(parser.parse_statement()?);
    }
    Ok(Program { statements })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |s| s.position)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Parse {
            position: self.position(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ScriptError> {
        if self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("Expected {what}, found {:?}", self.current())))
        }
    }

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ScriptError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn skip_semicolons(&mut self) {
        while self.current() == &Token::Semicolon {
            self.advance();
        }
    }

    // -- statements ---------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt, ScriptError> {
        let stmt = match self.current().clone() {
            Token::Let => {
                self.advance();
                let name = self.parse_ident("variable name")?;
                self.expect(&Token::Assign, "'='")?;
                let value = self.parse_expression()?;
                Stmt::Let { name, value }
            }
            Token::If => self.parse_if()?,
            Token::Ident(name) => {
                self.advance();
                let mut path = Vec::new();
                loop {
                    match self.current() {
                        Token::Dot => {
                            self.advance();
                            path.push(PathSegment::Field(self.parse_ident("field name")?));
                        }
                        Token::LBracket => {
                            self.advance();
                            let index = self.parse_expression()?;
                            self.expect(&Token::RBracket, "']'")?;
                            path.push(PathSegment::Index(index));
                        }
                        _ => break,
                    }
                }
                self.expect(&Token::Assign, "'=' in assignment")?;
                let value = self.parse_expression()?;
                Stmt::Assign { name, path, value }
            }
            other => return Err(self.error(format!("Expected statement, found {other:?}"))),
        };
        self.skip_semicolons();
        Ok(stmt)
    }

    fn parse_if(&mut self) -> Result<Stmt, ScriptError> {
        let mut branches = Vec::new();
        let mut otherwise = None;

        self.expect(&Token::If, "'if'")?;
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        branches.push((cond, body));

        while self.current() == &Token::Else {
            self.advance();
            if self.current() == &Token::If {
                self.advance();
                let cond = self.parse_expression()?;
                let body = self.parse_block()?;
                branches.push((cond, body));
            } else {
                otherwise = Some(self.parse_block()?);
                break;
            }
        }

        Ok(Stmt::If { branches, otherwise })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.enter()?;
        self.expect(&Token::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while self.current() != &Token::RBrace {
            if self.current() == &Token::Eof {
                return Err(self.error("Unterminated block"));
            }
            statements.push(self.parse_statement()?);
        }
        self.advance();
        self.leave();
        Ok(statements)
    }

    fn parse_ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(self.error(format!("Expected {what}, found {other:?}"))),
        }
    }

    // -- expressions --------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let cond = self.parse_binary(0)?;
        let expr = if self.current() == &Token::Question {
            self.advance();
            let then = self.parse_expression()?;
            self.expect(&Token::Colon, "':' in conditional")?;
            let otherwise = self.parse_expression()?;
            Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            cond
        };
        self.leave();
        Ok(expr)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ScriptError> {
        let mut left = self.parse_unary()?;

        while let Some(op) = BinaryOp::from_token(self.current()) {
            if op.precedence() < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(op.precedence() + 1)?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.current() {
            Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let expr = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current() {
                Token::Dot => {
                    self.advance();
                    let name = self.parse_ident("member name")?;
                    expr = Expr::Member {
                        target: Box::new(expr),
                        name,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let expr = match self.advance() {
            Token::Int(n) => Expr::Literal(Value::Number(n.into())),
            Token::Float(f) => Expr::Literal(Number::from_f64(f).map_or(Value::Null, Value::Number)),
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Null => Expr::Literal(Value::Null),
            Token::Ident(name) => {
                if self.current() == &Token::LParen {
                    self.advance();
                    let args = self.parse_list(&Token::RParen)?;
                    Expr::Call { name, args }
                } else {
                    Expr::Var(name)
                }
            }
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen, "')'")?;
                inner
            }
            Token::LBracket => Expr::Array(self.parse_list(&Token::RBracket)?),
            Token::LBrace => self.parse_object()?,
            other => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.error(format!("Unexpected token: {other:?}")));
            }
        };
        Ok(expr)
    }

    /// Comma-separated expressions up to `close`; trailing comma allowed.
    fn parse_list(&mut self, close: &Token) -> Result<Vec<Expr>, ScriptError> {
        self.enter()?;
        let mut items = Vec::new();
        while self.current() != close {
            items.push(self.parse_expression()?);
            if self.current() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(close, &format!("{close:?}"))?;
        self.leave();
        Ok(items)
    }

    fn parse_object(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let mut entries = Vec::new();
        while self.current() != &Token::RBrace {
            let key = match self.advance() {
                Token::Ident(k) | Token::Str(k) => k,
                Token::Int(n) => n.to_string(),
                other => return Err(self.error(format!("Expected object key, found {other:?}"))),
            };
            self.expect(&Token::Colon, "':' after object key")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if self.current() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RBrace, "'}'")?;
        self.leave();
        Ok(Expr::Object(entries))
    }
}
