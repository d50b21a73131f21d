//! Trigger conditions for listeners.
//!
//! A condition is one of:
//! - a wildcard (`Any` or empty), matching every status
//! - a bare status (`Done`), matching when the triggering task reaches it
//! - a boolean expression over `<task>.status == <Status>` clauses, joined
//!   with `&&`, `||`, `!` and parentheses. The alias `task` names the
//!   triggering task.

use std::collections::HashMap;
use thiserror::Error;

use super::task_instance::TaskStatus;

/// Alias for the task whose transition is being matched.
pub const TRIGGERING_TASK_ALIAS: &str = "task";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Expected {expected} but found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Trailing input after condition: {0}")]
    TrailingInput(String),
}

/// Parsed trigger condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCondition {
    Any,
    Status(TaskStatus),
    Expr(ConditionExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionExpr {
    Clause {
        subject: String,
        status: TaskStatus,
        negated: bool,
    },
    Not(Box<ConditionExpr>),
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
}

impl TriggerCondition {
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("any") || trimmed == "*" {
            return Ok(Self::Any);
        }

        let tokens = tokenize(trimmed)?;
        if let [Token::Ident(status)] | [Token::Str(status)] = tokens.as_slice() {
            return Ok(Self::Status(TaskStatus::parse(status)));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(ConditionError::TrailingInput(
                parser.tokens[parser.pos..]
                    .iter()
                    .map(Token::describe)
                    .collect::<Vec<_>>()
                    .join(" "),
            ));
        }
        Ok(Self::Expr(expr))
    }

    /// Whether a transition of `task_id` to `new_status` satisfies this
    /// condition. `statuses` is a snapshot of every task's current status.
    pub fn is_satisfied(
        &self,
        task_id: &str,
        new_status: &TaskStatus,
        statuses: &HashMap<String, TaskStatus>,
    ) -> bool {
        match self {
            Self::Any => true,
            Self::Status(expected) => expected == new_status,
            Self::Expr(expr) => expr.references(task_id) && expr.evaluate(task_id, new_status, statuses),
        }
    }
}

impl ConditionExpr {
    /// Whether any clause names `task_id` (or the triggering-task alias).
    pub fn references(&self, task_id: &str) -> bool {
        match self {
            Self::Clause { subject, .. } => subject == task_id || subject == TRIGGERING_TASK_ALIAS,
            Self::Not(inner) => inner.references(task_id),
            Self::And(a, b) | Self::Or(a, b) => a.references(task_id) || b.references(task_id),
        }
    }

    /// Task ids named by clauses, aliases excluded.
    pub fn subjects(&self) -> Vec<&str> {
        match self {
            Self::Clause { subject, .. } if subject != TRIGGERING_TASK_ALIAS => vec![subject.as_str()],
            Self::Clause { .. } => vec![],
            Self::Not(inner) => inner.subjects(),
            Self::And(a, b) | Self::Or(a, b) => {
                let mut out = a.subjects();
                out.extend(b.subjects());
                out
            }
        }
    }

    fn evaluate(&self, task_id: &str, new_status: &TaskStatus, statuses: &HashMap<String, TaskStatus>) -> bool {
        match self {
            Self::Clause {
                subject,
                status,
                negated,
            } => {
                let actual = if subject == task_id || subject == TRIGGERING_TASK_ALIAS {
                    Some(new_status)
                } else {
                    statuses.get(subject)
                };
                let equal = actual == Some(status);
                equal != *negated
            }
            Self::Not(inner) => !inner.evaluate(task_id, new_status, statuses),
            Self::And(a, b) => {
                a.evaluate(task_id, new_status, statuses) && b.evaluate(task_id, new_status, statuses)
            }
            Self::Or(a, b) => {
                a.evaluate(task_id, new_status, statuses) || b.evaluate(task_id, new_status, statuses)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Dot,
    Eq,
    Ne,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(s) => s.clone(),
            Self::Str(s) => format!("'{s}'"),
            Self::Dot => ".".to_string(),
            Self::Eq => "==".to_string(),
            Self::Ne => "!=".to_string(),
            Self::And => "&&".to_string(),
            Self::Or => "||".to_string(),
            Self::Not => "!".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '.' => tokens.push(Token::Dot),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '=' => {
                // Accept both `=` and `==`.
                if chars.peek().map(|(_, c)| *c) == Some('=') {
                    chars.next();
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                if chars.peek().map(|(_, c)| *c) == Some('=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '&' | '|' => {
                if chars.peek().map(|(_, c)| *c) == Some(ch) {
                    chars.next();
                    tokens.push(if ch == '&' { Token::And } else { Token::Or });
                } else {
                    return Err(ConditionError::UnexpectedChar { ch, position: pos });
                }
            }
            '"' | '\'' => {
                let mut s = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        closed = true;
                        break;
                    }
                    s.push(c);
                }
                if !closed {
                    return Err(ConditionError::UnterminatedString);
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_alphanumeric() || c == '_' || c == '-' => {
                let mut s = String::from(c);
                while let Some((_, next)) = chars.peek() {
                    if next.is_alphanumeric() || *next == '_' || *next == '-' {
                        s.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            _ => return Err(ConditionError::UnexpectedChar { ch, position: pos }),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ConditionError> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(ConditionError::UnexpectedToken {
                expected: expected.describe(),
                found: other.map_or_else(|| "end of input".to_string(), |t| t.describe()),
            }),
        }
    }

    fn parse_or(&mut self) -> Result<ConditionExpr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = ConditionExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ConditionExpr, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = ConditionExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ConditionExpr, ConditionError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(ConditionExpr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => self.parse_clause(),
        }
    }

    fn parse_clause(&mut self) -> Result<ConditionExpr, ConditionError> {
        let subject = match self.next() {
            Some(Token::Ident(s) | Token::Str(s)) => s,
            other => {
                return Err(ConditionError::UnexpectedToken {
                    expected: "task id".to_string(),
                    found: other.map_or_else(|| "end of input".to_string(), |t| t.describe()),
                })
            }
        };
        self.expect(&Token::Dot)?;
        self.expect(&Token::Ident("status".to_string()))?;

        let negated = match self.next() {
            Some(Token::Eq) => false,
            Some(Token::Ne) => true,
            other => {
                return Err(ConditionError::UnexpectedToken {
                    expected: "== or !=".to_string(),
                    found: other.map_or_else(|| "end of input".to_string(), |t| t.describe()),
                })
            }
        };

        let status = match self.next() {
            Some(Token::Ident(s) | Token::Str(s)) => TaskStatus::parse(&s),
            other => {
                return Err(ConditionError::UnexpectedToken {
                    expected: "status".to_string(),
                    found: other.map_or_else(|| "end of input".to_string(), |t| t.describe()),
                })
            }
        };

        Ok(ConditionExpr::Clause {
            subject,
            status,
            negated,
        })
    }
}
