use std::fmt;

use crate::common::{DbError, Result};

use super::ast::CmpOp;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Keyword or identifier; keywords are matched case-insensitively
    Word(String),
    Number(String),
    /// Contents of a `"..."` or `'...'` literal
    Str(String),
    Op(CmpOp),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Star,
    Minus,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w),
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Op(op) => write!(f, "{}", op),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Star => write!(f, "*"),
            Token::Minus => write!(f, "-"),
        }
    }
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub struct Tokenizer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Tokenizer<'a> {
        Tokenizer {
            input,
            bytes: input.as_bytes(),
            cursor: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();
        while self.skip_whitespace() {
            let offset = self.cursor;
            let Some(c) = self.peek() else {
                break;
            };
            let token = match c {
                b'"' | b'\'' => self.quoted(c)?,
                b'0'..=b'9' => self.number(),
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b',' => self.single(Token::Comma),
                b';' => self.single(Token::Semicolon),
                b'*' => self.single(Token::Star),
                b'-' => self.single(Token::Minus),
                b'=' | b'<' | b'>' | b'!' => self.operator()?,
                _ if c.is_ascii_alphabetic() || c == b'_' => self.word(),
                _ => {
                    return Err(DbError::syntax(format!(
                        "unexpected character '{}' at {}",
                        self.input[offset..].chars().next().unwrap_or('?'),
                        offset
                    )))
                }
            };
            tokens.push(Spanned { token, offset });
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.cursor).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.cursor += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) -> bool {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.cursor += 1;
        }
        self.cursor < self.bytes.len()
    }

    fn single(&mut self, token: Token) -> Token {
        self.cursor += 1;
        token
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.cursor;
        while self.peek().is_some_and(&pred) {
            self.cursor += 1;
        }
        &self.input[start..self.cursor]
    }

    fn word(&mut self) -> Token {
        let w = self.take_while(|c| c.is_ascii_alphanumeric() || c == b'_');
        Token::Word(w.to_string())
    }

    fn number(&mut self) -> Token {
        let n = self.take_while(|c| c.is_ascii_digit() || c == b'.');
        Token::Number(n.to_string())
    }

    fn quoted(&mut self, quote: u8) -> Result<Token> {
        let start = self.cursor;
        self.bump();
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => {
                    return Err(DbError::syntax(format!(
                        "unterminated string starting at {}",
                        start
                    )))
                }
                // A doubled quote stands for itself.
                Some(c) if c == quote && self.peek() == Some(quote) => {
                    self.bump();
                    out.push(quote);
                }
                Some(c) if c == quote => break,
                Some(c) => out.push(c),
            }
        }
        String::from_utf8(out)
            .map(Token::Str)
            .map_err(|_| DbError::syntax("string literal is not valid UTF-8"))
    }

    fn operator(&mut self) -> Result<Token> {
        let start = self.cursor;
        let first = self.bump();
        let second = self.peek();
        let op = match (first, second) {
            (Some(b'<'), Some(b'=')) => CmpOp::Le,
            (Some(b'>'), Some(b'=')) => CmpOp::Ge,
            (Some(b'!'), Some(b'=')) | (Some(b'<'), Some(b'>')) => CmpOp::Ne,
            (Some(b'='), Some(b'=')) => CmpOp::Eq,
            (Some(b'<'), _) => return Ok(Token::Op(CmpOp::Lt)),
            (Some(b'>'), _) => return Ok(Token::Op(CmpOp::Gt)),
            (Some(b'='), _) => return Ok(Token::Op(CmpOp::Eq)),
            _ => return Err(DbError::syntax(format!("unexpected '!' at {}", start))),
        };
        self.bump();
        Ok(Token::Op(op))
    }
}
