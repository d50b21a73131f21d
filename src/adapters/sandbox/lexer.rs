//! Tokenizer for listener scripts.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,

    Ident(String),

    // Keywords
    Let,
    If,
    Else,

    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Question,

    // Operators
    Assign,   // =
    Eq,       // ==
    Ne,       // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    And,      // &&
    Or,       // ||
    Not,      // !
    Coalesce, // ??
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    Eof,
}

/// A token and the byte offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while i < chars.len() {
        let (position, ch) = chars[i];

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments: `#` or `//` to end of line.
        if ch == '#' || (ch == '/' && peek(i + 1) == Some('/')) {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }

        let after_dot = tokens.last().is_some_and(|t| t.token == Token::Dot);

        // Member names after `.` may be numeric, e.g. `tasks.002`.
        if after_dot && (ch.is_alphanumeric() || ch == '_') {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push(Spanned {
                token: Token::Ident(name),
                position,
            });
            continue;
        }

        let (token, width) = match ch {
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            ':' => (Token::Colon, 1),
            ';' => (Token::Semicolon, 1),
            '.' => (Token::Dot, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '?' if peek(i + 1) == Some('?') => (Token::Coalesce, 2),
            '?' => (Token::Question, 1),
            '=' if peek(i + 1) == Some('=') => (Token::Eq, 2),
            '=' => (Token::Assign, 1),
            '!' if peek(i + 1) == Some('=') => (Token::Ne, 2),
            '!' => (Token::Not, 1),
            '<' if peek(i + 1) == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if peek(i + 1) == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '&' if peek(i + 1) == Some('&') => (Token::And, 2),
            '|' if peek(i + 1) == Some('|') => (Token::Or, 2),
            '"' | '\'' => {
                let (s, consumed) = read_string(&chars, i, ch)?;
                (Token::Str(s), consumed)
            }
            c if c.is_ascii_digit() => {
                let (token, consumed) = read_number(&chars, i)?;
                (token, consumed)
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].1.is_alphanumeric() || chars[end].1 == '_') {
                    end += 1;
                }
                let word: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                let token = match word.as_str() {
                    "let" => Token::Let,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    "null" | "None" => Token::Null,
                    _ => Token::Ident(word),
                };
                (token, end - start)
            }
            other => {
                return Err(ScriptError::Lex {
                    position,
                    message: format!("Unexpected character: '{other}'"),
                })
            }
        };

        tokens.push(Spanned { token, position });
        i += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: source.len(),
    });
    Ok(tokens)
}

fn read_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize), ScriptError> {
    let mut s = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let (position, ch) = chars[i];
        match ch {
            c if c == quote => return Ok((s, i - start + 1)),
            '\\' => {
                i += 1;
                match chars.get(i).map(|(_, c)| *c) {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some('\'') => s.push('\''),
                    Some(c) => {
                        return Err(ScriptError::Lex {
                            position,
                            message: format!("Unknown escape sequence: \\{c}"),
                        })
                    }
                    None => break,
                }
            }
            c => s.push(c),
        }
        i += 1;
    }

    Err(ScriptError::Lex {
        position: chars[start].0,
        message: "Unterminated string".to_string(),
    })
}

fn read_number(chars: &[(usize, char)], start: usize) -> Result<(Token, usize), ScriptError> {
    let mut i = start;
    let mut is_float = false;

    while i < chars.len() && chars[i].1.is_ascii_digit() {
        i += 1;
    }
    // A fraction needs a digit after the dot, so `1.foo` stays member access.
    if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].1.is_ascii_digit() {
            i += 1;
        }
    }

    let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
    let position = chars[start].0;
    let token = if is_float {
        text.parse::<f64>().map(Token::Float).map_err(|_| ScriptError::Lex {
            position,
            message: format!("Invalid number: {text}"),
        })?
    } else {
        text.parse::<i64>().map(Token::Int).map_err(|_| ScriptError::Lex {
            position,
            message: format!("Invalid number: {text}"),
        })?
    };
    Ok((token, i - start))
}
