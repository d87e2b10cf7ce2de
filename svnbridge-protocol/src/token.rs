//! `ra_svn` tokens and their wire encoding.
//!
//! ```text
//! list    := '(' ws item* ')' ws
//! word    := [A-Za-z][A-Za-z0-9-]* ws
//! number  := [0-9]+ ws
//! string  := [0-9]+ ':' <that many raw bytes> ws
//! ws      := ' ' | '\n'
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// One lexical unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    ListBegin,
    ListEnd,
    Word(String),
    Number(u64),
    /// Raw bytes; not necessarily valid UTF-8.
    String(Bytes),
}

/// Token discriminant, used when a specific kind is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    ListBegin,
    ListEnd,
    Word,
    Number,
    String,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::ListBegin => "list begin",
            TokenKind::ListEnd => "list end",
            TokenKind::Word => "word",
            TokenKind::Number => "number",
            TokenKind::String => "string",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::ListBegin => TokenKind::ListBegin,
            Token::ListEnd => TokenKind::ListEnd,
            Token::Word(_) => TokenKind::Word,
            Token::Number(_) => TokenKind::Number,
            Token::String(_) => TokenKind::String,
        }
    }

    /// Convenience constructor for string tokens.
    pub fn string(value: impl Into<Bytes>) -> Self {
        Token::String(value.into())
    }

    /// Convenience constructor for word tokens.
    pub fn word(value: impl Into<String>) -> Self {
        Token::Word(value.into())
    }

    /// Appends the wire encoding of this token, including the trailing space.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Token::ListBegin => out.put_slice(b"( "),
            Token::ListEnd => out.put_slice(b") "),
            Token::Word(word) => {
                out.put_slice(word.as_bytes());
                out.put_u8(b' ');
            }
            Token::Number(n) => {
                encode_decimal(*n, out);
                out.put_u8(b' ');
            }
            Token::String(bytes) => {
                encode_decimal(bytes.len() as u64, out);
                out.put_u8(b':');
                out.put_slice(bytes);
                out.put_u8(b' ');
            }
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::ListBegin => f.write_str("("),
            Token::ListEnd => f.write_str(")"),
            Token::Word(w) => write!(f, "{w}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::String(s) => write!(f, "<{} bytes>", s.len()),
        }
    }
}

/// Returns whether `byte` separates tokens.
pub fn is_whitespace(byte: u8) -> bool {
    byte == b' ' || byte == b'\n'
}

/// Returns whether `byte` may continue a word.
pub fn is_word_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-'
}

/// Returns whether `word` is a valid protocol word.
pub fn is_valid_word(word: &str) -> bool {
    let bytes = word.as_bytes();
    match bytes.first() {
        Some(first) if first.is_ascii_alphabetic() => bytes[1..].iter().all(|b| is_word_char(*b)),
        _ => false,
    }
}

pub(crate) fn encode_decimal(mut n: u64, out: &mut BytesMut) {
    if n == 0 {
        out.put_u8(b'0');
        return;
    }
    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }
    out.put_slice(&buf[i..]);
}
