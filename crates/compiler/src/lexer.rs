//! Streaming lexer with automatic statement terminators
//!
//! Pull-based: each `scan_token` call produces the next token, and once the
//! source is exhausted every further call returns `Eof`. Line breaks are not
//! plain whitespace here — after a token whose kind ends a statement (see
//! [`TokenKind::ends_statement`]), the next `\n` is handed back as a
//! synthetic `Semicolon` token whose lexeme is the newline itself and whose
//! line is the line just ended.

use ell_core::Value;

use crate::token::{Token, TokenKind};

fn is_digit(byte: u8) -> bool {
    byte.is_ascii_digit()
}

fn is_alpha(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

pub struct Lexer<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: u32,
    insert_semicolon: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            source,
            start: 0,
            current: 0,
            line: 1,
            insert_semicolon: false,
        }
    }

    /// Scan and return the next token.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let ch = self.advance();

        if is_alpha(ch) {
            return self.identifier();
        }
        if is_digit(ch) {
            return self.number();
        }

        match ch {
            // Only reachable when skip_whitespace stopped on a newline
            // because the previous token ended a statement.
            b'\n' => {
                let token = Token::new(
                    TokenKind::Semicolon,
                    &self.source[self.start..self.current],
                    None,
                    self.line,
                );
                self.line += 1;
                self.insert_semicolon = false;
                token
            }
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b';' => self.make_token(TokenKind::Semicolon),
            b':' => self.make_token(TokenKind::Colon),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::BangEqual)
                } else {
                    self.make_token(TokenKind::Bang)
                }
            }
            b'=' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::EqualEqual)
                } else {
                    self.make_token(TokenKind::Equal)
                }
            }
            b'<' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::LessEqual)
                } else {
                    self.make_token(TokenKind::Less)
                }
            }
            b'>' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::GreaterEqual)
                } else {
                    self.make_token(TokenKind::Greater)
                }
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.current += 1;
                }
                b'\n' => {
                    if self.insert_semicolon {
                        // Leave the newline for scan_token, which turns it
                        // into a synthetic semicolon.
                        return;
                    }
                    self.line += 1;
                    self.current += 1;
                }
                b'/' => match self.peek_next() {
                    b'/' => {
                        while self.peek() != b'\n' && !self.is_at_end() {
                            self.current += 1;
                        }
                    }
                    b'*' => self.block_comment(),
                    _ => return,
                },
                _ => return,
            }
        }
    }

    fn block_comment(&mut self) {
        self.current += 2;
        while !self.is_at_end() {
            if self.peek() == b'*' && self.peek_next() == b'/' {
                self.current += 2;
                return;
            }
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.current += 1;
        }
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || is_digit(self.peek()) {
            self.current += 1;
        }
        let lexeme = &self.source[self.start..self.current];
        match TokenKind::keyword(lexeme) {
            Some(TokenKind::True) => self.literal_token(TokenKind::True, Value::Bool(true)),
            Some(TokenKind::False) => self.literal_token(TokenKind::False, Value::Bool(false)),
            Some(kind) => self.make_token(kind),
            None => self.make_token(TokenKind::Identifier),
        }
    }

    fn number(&mut self) -> Token<'src> {
        while is_digit(self.peek()) {
            self.current += 1;
        }

        let mut is_double = false;
        if self.peek() == b'.' && is_digit(self.peek_next()) {
            is_double = true;
            self.current += 1;
            while is_digit(self.peek()) {
                self.current += 1;
            }
        }

        let lexeme = &self.source[self.start..self.current];
        if is_double {
            match lexeme.parse::<f64>() {
                Ok(value) => self.literal_token(TokenKind::Double, Value::Double(value)),
                Err(_) => self.error_token("Invalid numeric value."),
            }
        } else {
            match lexeme.parse::<i32>() {
                Ok(value) => self.literal_token(TokenKind::Integer, Value::Int(value)),
                Err(_) => self.error_token("Numeric value is out of range."),
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.current += 1;
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        self.current += 1; // closing quote
        let content = &self.source[self.start + 1..self.current - 1];
        self.literal_token(TokenKind::String, Value::string(content))
    }

    fn make_token(&mut self, kind: TokenKind) -> Token<'src> {
        self.insert_semicolon = kind.ends_statement();
        Token::new(kind, &self.source[self.start..self.current], None, self.line)
    }

    fn literal_token(&mut self, kind: TokenKind, literal: Value) -> Token<'src> {
        self.insert_semicolon = kind.ends_statement();
        Token::new(
            kind,
            &self.source[self.start..self.current],
            Some(literal),
            self.line,
        )
    }

    fn error_token(&mut self, message: &'static str) -> Token<'src> {
        self.insert_semicolon = false;
        Token::new(TokenKind::Error, message, None, self.line)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> u8 {
        let byte = self.source.as_bytes()[self.current];
        self.current += 1;
        byte
    }

    fn peek(&self) -> u8 {
        *self.source.as_bytes().get(self.current).unwrap_or(&0)
    }

    fn peek_next(&self) -> u8 {
        *self.source.as_bytes().get(self.current + 1).unwrap_or(&0)
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }
        self.current += 1;
        true
    }
}
