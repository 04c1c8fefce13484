// Hand-written scanner for the layout language
//
// Single pass over an in-memory source (CRLF already normalized to LF by
// the caller). Newlines and comments are tokens: the grammar is
// line-oriented, so the parser wants to see them. Malformed forms become
// Illegal tokens carrying the offending fragment; the parser turns those
// into syntax errors.

pub mod token;

use crate::name::StringInterner;
use crate::span::{SourceId, Span};
use token::{Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    source: SourceId,
    interner: &'a mut StringInterner,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, source: SourceId, interner: &'a mut StringInterner) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            source,
            interner,
        }
    }

    /// Scan the whole source. The last token is always Eof.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_blank();
            if self.pos >= self.bytes.len() {
                tokens.push(Token::new(TokenKind::Eof, self.span_from(self.pos)));
                return tokens;
            }
            tokens.push(self.next_token());
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start as u32, self.pos as u32, self.source)
    }

    fn skip_blank(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Token {
        let start = self.pos;
        let b = self.bytes[self.pos];

        if b == b'\n' {
            self.pos += 1;
            return Token::new(TokenKind::Newline, self.span_from(start));
        }
        if b == b'#' {
            return self.scan_comment(start);
        }
        if b == b'"' {
            return self.scan_text(start);
        }
        if b == b'$' {
            return self.scan_internal(start);
        }
        if b.is_ascii_digit() {
            return self.scan_number(start);
        }
        if is_letter(b) {
            return self.scan_ident(start);
        }
        if b == b'_' {
            if self.peek_at(1).is_some_and(is_letter) {
                return self.scan_ident(start);
            }
            self.pos += 1;
            return Token::new(TokenKind::Underscore, self.span_from(start));
        }
        self.scan_operator(start)
    }

    fn scan_comment(&mut self, start: usize) -> Token {
        self.pos += 1;
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
        let text_start = self.pos;
        while self.peek().is_some_and(|b| b != b'\n') {
            self.pos += 1;
        }
        let text = self.src[text_start..self.pos].to_string();
        Token::new(TokenKind::Comment(text), self.span_from(start))
    }

    fn scan_text(&mut self, start: usize) -> Token {
        self.pos += 1;
        let text_start = self.pos;
        loop {
            match self.peek() {
                Some(b'"') => {
                    let text = self.src[text_start..self.pos].to_string();
                    self.pos += 1;
                    return Token::new(TokenKind::Str(text), self.span_from(start));
                }
                // No escape processing: bytes are stored as-is.
                Some(_) => self.pos += 1,
                None => {
                    let frag = self.src[start..self.pos].to_string();
                    return Token::new(TokenKind::Illegal(frag), self.span_from(start));
                }
            }
        }
    }

    fn scan_internal(&mut self, start: usize) -> Token {
        self.pos += 1;
        let follows_ident = self.peek().is_some_and(is_letter)
            || (self.peek() == Some(b'_') && self.peek_at(1).is_some_and(is_letter));
        if !follows_ident {
            return Token::new(TokenKind::Illegal("$".into()), self.span_from(start));
        }
        let name_start = self.pos;
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        let name = self.interner.intern(&self.src[name_start..self.pos]);
        Token::new(TokenKind::Internal(name), self.span_from(start))
    }

    fn scan_ident(&mut self, start: usize) -> Token {
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        let kind = TokenKind::keyword_from_str(text)
            .unwrap_or_else(|| TokenKind::Ident(self.interner.intern(text)));
        Token::new(kind, self.span_from(start))
    }

    fn scan_number(&mut self, start: usize) -> Token {
        if self.bytes[self.pos] == b'0' {
            match self.peek_at(1) {
                Some(b'x') | Some(b'X') => return self.scan_hex(start),
                // A lone zero may only be followed by a fraction or a
                // terminator; "05" and "0abc" are illegal.
                Some(b'.') | Some(b',') | Some(b']') | Some(b')') | Some(b':') | Some(b'=')
                | Some(b'\n') | Some(b' ') | Some(b'\t') | None => {}
                Some(_) => return self.illegal_run(start),
            }
        }
        self.scan_decimal(start)
    }

    fn scan_hex(&mut self, start: usize) -> Token {
        self.pos += 2;
        let digit_start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        if self.pos == digit_start || self.peek() == Some(b'.') {
            return self.illegal_run(start);
        }
        match i64::from_str_radix(&self.src[digit_start..self.pos], 16) {
            Ok(v) => Token::new(TokenKind::Int(v), self.span_from(start)),
            Err(_) => Token::new(
                TokenKind::Illegal(self.src[start..self.pos].to_string()),
                self.span_from(start),
            ),
        }
    }

    fn scan_decimal(&mut self, start: usize) -> Token {
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.src[start..self.pos];
        let kind = if is_float {
            match text.parse::<f64>() {
                Ok(v) => TokenKind::Float(v),
                Err(_) => TokenKind::Illegal(text.to_string()),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Int(v),
                Err(_) => TokenKind::Illegal(text.to_string()),
            }
        };
        Token::new(kind, self.span_from(start))
    }

    /// Consume the rest of an alphanumeric run and emit it as illegal.
    fn illegal_run(&mut self, start: usize) -> Token {
        while self.peek().is_some_and(|b| is_ident_byte(b) || b == b'.') {
            self.pos += 1;
        }
        Token::new(
            TokenKind::Illegal(self.src[start..self.pos].to_string()),
            self.span_from(start),
        )
    }

    fn scan_operator(&mut self, start: usize) -> Token {
        let b = self.bytes[self.pos];
        self.pos += 1;
        let kind = match b {
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    TokenKind::NotEq
                } else {
                    TokenKind::Not
                }
            }
            b'<' => match self.peek() {
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::LessEq
                }
                Some(b'<') => {
                    self.pos += 1;
                    TokenKind::Shl
                }
                _ => TokenKind::Less,
            },
            b'>' => match self.peek() {
                Some(b'=') => {
                    self.pos += 1;
                    TokenKind::GreaterEq
                }
                Some(b'>') => {
                    self.pos += 1;
                    TokenKind::Shr
                }
                _ => TokenKind::Greater,
            },
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.pos += 1;
                    TokenKind::AndAnd
                } else {
                    TokenKind::BitAnd
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.pos += 1;
                    TokenKind::OrOr
                } else {
                    TokenKind::BitOr
                }
            }
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'?' => TokenKind::Question,
            b':' => TokenKind::Colon,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            other => TokenKind::Illegal((other as char).to_string()),
        };
        Token::new(kind, self.span_from(start))
    }
}

fn is_letter(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
