//! Buffered token reader.
//!
//! The reader owns a single growable buffer. Refills append whatever the
//! transport yields in one read call; the buffer only grows (geometrically,
//! up to [`MAX_BUFFER_SIZE`]) while a single word or number spans all of it.
//! String payloads are copied out chunk by chunk, so reading a large string
//! costs O(bytes transferred) no matter how many refills it straddles.

use crate::error::ProtocolError;
use crate::token::{is_whitespace, is_word_char, Token, TokenKind};
use crate::{MAX_BUFFER_SIZE, MAX_LIST_DEPTH};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

const INITIAL_CAPACITY: usize = 32 * 1024;

/// Refills never hand the transport less spare room than this.
const MIN_READ: usize = 4 * 1024;

type DynRead = Box<dyn AsyncRead + Unpin + Send>;

/// Reads `ra_svn` tokens from a byte stream, tracking list depth.
pub struct SvnReader {
    stream: DynRead,
    buf: BytesMut,
    depth: usize,
}

impl SvnReader {
    pub fn new(stream: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self {
            stream: Box::new(stream),
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            depth: 0,
        }
    }

    /// Number of currently open lists.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of bytes read from the transport but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Reads the next token.
    pub async fn read_token(&mut self) -> Result<Token, ProtocolError> {
        match self.peek_token_start().await? {
            b'(' => {
                if self.depth >= MAX_LIST_DEPTH {
                    return Err(ProtocolError::Malformed(format!(
                        "list nesting exceeds {MAX_LIST_DEPTH}"
                    )));
                }
                self.buf.advance(1);
                self.depth += 1;
                Ok(Token::ListBegin)
            }
            b')' => {
                if self.depth == 0 {
                    return Err(ProtocolError::UnbalancedList);
                }
                self.buf.advance(1);
                self.depth -= 1;
                Ok(Token::ListEnd)
            }
            b'0'..=b'9' => self.read_number_or_string().await,
            b if b.is_ascii_alphabetic() => self.read_word_token().await,
            other => Err(ProtocolError::Malformed(format!(
                "unexpected byte 0x{other:02x}"
            ))),
        }
    }

    /// Reads a token that must be of the given kind.
    pub async fn read_token_of(&mut self, kind: TokenKind) -> Result<Token, ProtocolError> {
        let token = self.read_token().await?;
        if token.kind() != kind {
            return Err(unexpected(kind.name(), &token));
        }
        Ok(token)
    }

    /// Reads the next element of the currently open list.
    ///
    /// Returns `None` when the list ends (the `ListEnd` is consumed), the token
    /// otherwise. Fails if the token is of a different kind.
    pub async fn read_item(&mut self, kind: TokenKind) -> Result<Option<Token>, ProtocolError> {
        match self.read_token().await? {
            Token::ListEnd => Ok(None),
            token if token.kind() == kind => Ok(Some(token)),
            token => Err(unexpected(kind.name(), &token)),
        }
    }

    /// Like [`read_item`](Self::read_item), but accepts either a word or a
    /// string and returns its raw bytes.
    pub async fn read_text_item(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.read_token().await? {
            Token::ListEnd => Ok(None),
            Token::Word(word) => Ok(Some(Bytes::from(word))),
            Token::String(bytes) => Ok(Some(bytes)),
            token => Err(unexpected("word or string", &token)),
        }
    }

    /// Reads a word at a fixed protocol position.
    pub async fn read_word(&mut self) -> Result<String, ProtocolError> {
        match self.read_token().await? {
            Token::Word(word) => Ok(word),
            token => Err(unexpected(TokenKind::Word.name(), &token)),
        }
    }

    /// Reads a string at a fixed protocol position.
    pub async fn read_string(&mut self) -> Result<Bytes, ProtocolError> {
        match self.read_token().await? {
            Token::String(bytes) => Ok(bytes),
            token => Err(unexpected(TokenKind::String.name(), &token)),
        }
    }

    /// Discards tokens until the currently open list (including any lists
    /// nested inside it) is closed.
    pub async fn skip_remaining_items(&mut self) -> Result<(), ProtocolError> {
        if self.depth == 0 {
            return Err(ProtocolError::IllegalState("not inside a list"));
        }
        let target = self.depth - 1;
        while self.depth > target {
            self.read_token().await?;
        }
        Ok(())
    }

    /// Skips whitespace and returns the first byte of the next token without
    /// consuming it.
    async fn peek_token_start(&mut self) -> Result<u8, ProtocolError> {
        loop {
            match self.buf.iter().position(|b| !is_whitespace(*b)) {
                Some(pos) => {
                    self.buf.advance(pos);
                    return Ok(self.buf[0]);
                }
                None => {
                    self.buf.clear();
                    self.fill().await?;
                }
            }
        }
    }

    async fn read_number_or_string(&mut self) -> Result<Token, ProtocolError> {
        let end = self.scan(1, |b| b.is_ascii_digit()).await?;
        let mut value: u64 = 0;
        for digit in &self.buf[..end] {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(digit - b'0')))
                .ok_or_else(|| ProtocolError::Malformed("number out of range".to_string()))?;
        }
        let terminator = self.buf[end];
        self.buf.advance(end + 1);

        match terminator {
            b':' => Ok(Token::String(self.read_string_body(value).await?)),
            t if is_whitespace(t) => Ok(Token::Number(value)),
            t => Err(ProtocolError::Malformed(format!(
                "unexpected byte 0x{t:02x} after number"
            ))),
        }
    }

    async fn read_string_body(&mut self, len: u64) -> Result<Bytes, ProtocolError> {
        let len = match usize::try_from(len) {
            Ok(len) if len <= MAX_BUFFER_SIZE => len,
            _ => {
                return Err(ProtocolError::BufferOverflow {
                    size: usize::try_from(len).unwrap_or(usize::MAX),
                    max: MAX_BUFFER_SIZE,
                })
            }
        };

        if self.buf.len() >= len {
            return Ok(self.buf.split_to(len).freeze());
        }

        let mut out = BytesMut::with_capacity(len);
        loop {
            let take = (len - out.len()).min(self.buf.len());
            out.extend_from_slice(&self.buf[..take]);
            self.buf.advance(take);
            if out.len() == len {
                return Ok(out.freeze());
            }
            self.fill().await?;
        }
    }

    async fn read_word_token(&mut self) -> Result<Token, ProtocolError> {
        let end = self.scan(1, is_word_char).await?;
        let terminator = self.buf[end];
        if !is_whitespace(terminator) {
            return Err(ProtocolError::Malformed(format!(
                "unexpected byte 0x{terminator:02x} after word"
            )));
        }
        // Only ASCII word characters were accepted by the scan.
        let word: String = self.buf[..end].iter().map(|b| char::from(*b)).collect();
        self.buf.advance(end + 1);
        Ok(Token::Word(word))
    }

    /// Returns the index of the first byte at or after `from` rejected by
    /// `accept`. Scanned bytes stay in the buffer.
    async fn scan(&mut self, from: usize, accept: fn(u8) -> bool) -> Result<usize, ProtocolError> {
        let mut pos = from;
        loop {
            if let Some(offset) = self.buf[pos..].iter().position(|b| !accept(*b)) {
                return Ok(pos + offset);
            }
            pos = self.buf.len();
            self.fill().await?;
        }
    }

    /// Appends one transport read to the buffer.
    async fn fill(&mut self) -> Result<(), ProtocolError> {
        let len = self.buf.len();
        if len >= MAX_BUFFER_SIZE {
            return Err(ProtocolError::BufferOverflow {
                size: len + 1,
                max: MAX_BUFFER_SIZE,
            });
        }
        if self.buf.capacity() - len < MIN_READ {
            let additional = len.max(INITIAL_CAPACITY).min(MAX_BUFFER_SIZE - len);
            self.buf.reserve(additional);
        }
        let n = self.stream.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }
        Ok(())
    }
}

pub(crate) fn unexpected(expected: &'static str, found: &Token) -> ProtocolError {
    ProtocolError::UnexpectedToken {
        expected,
        found: found.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(data: &'static [u8]) -> SvnReader {
        SvnReader::new(Cursor::new(data))
    }

    async fn read_all(reader: &mut SvnReader, count: usize) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(count);
        for _ in 0..count {
            tokens.push(reader.read_token().await.unwrap());
        }
        tokens
    }

    fn expected_sample() -> Vec<Token> {
        vec![
            Token::ListBegin,
            Token::word("word"),
            Token::Number(22),
            Token::string("string 1:x"),
            Token::string(" "),
            Token::String(Bytes::from("Тест".as_bytes())),
            Token::ListBegin,
            Token::word("sublist"),
            Token::ListEnd,
            Token::ListEnd,
        ]
    }

    #[tokio::test]
    async fn test_tokenize_sample() {
        // String lengths count bytes, so the Cyrillic word is 8 long.
        let mut reader = reader("( word 22 10:string 1:x 1:  8:Тест ( sublist ) ) ".as_bytes());

        let tokens = read_all(&mut reader, 10).await;
        assert_eq!(tokens, expected_sample());
        assert_eq!(reader.depth(), 0);

        let err = reader.read_token().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_tokenize_across_refills() {
        // Every read boundary falls inside a token.
        let stream = tokio_test::io::Builder::new()
            .read(b"( wo")
            .read(b"rd 2")
            .read(b"2 1")
            .read(b"0:str")
            .read(b"ing 1:x")
            .read(b" 1: ")
            .read(" 8:Те".as_bytes())
            .read("ст ( sublist ) ) ".as_bytes())
            .build();
        let mut reader = SvnReader::new(stream);

        let tokens = read_all(&mut reader, 10).await;
        assert_eq!(tokens, expected_sample());
        assert!(matches!(
            reader.read_token().await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_large_string_straddles_many_reads() {
        let payload = vec![b'x'; 100_000];
        let mut builder = tokio_test::io::Builder::new();
        builder.read(b"100000:");
        for chunk in payload.chunks(7_000) {
            builder.read(chunk);
        }
        builder.read(b" 5 ");
        let mut reader = SvnReader::new(builder.build());

        let token = reader.read_token().await.unwrap();
        assert_eq!(token, Token::String(Bytes::from(payload)));
        assert_eq!(reader.read_token().await.unwrap(), Token::Number(5));
    }

    #[tokio::test]
    async fn test_empty_and_delimiter_strings() {
        let mut reader = reader(b"0: 1:( 1:) 3:a b ");
        assert_eq!(reader.read_token().await.unwrap(), Token::string(""));
        assert_eq!(reader.read_token().await.unwrap(), Token::string("("));
        assert_eq!(reader.read_token().await.unwrap(), Token::string(")"));
        assert_eq!(reader.read_token().await.unwrap(), Token::string("a b"));
        assert_eq!(reader.depth(), 0);
    }

    #[tokio::test]
    async fn test_newline_is_whitespace() {
        let mut reader = reader(b"(\nsuccess\n( ) )\n");
        let tokens = read_all(&mut reader, 5).await;
        assert_eq!(
            tokens,
            vec![
                Token::ListBegin,
                Token::word("success"),
                Token::ListBegin,
                Token::ListEnd,
                Token::ListEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_unmatched_list_end_fails() {
        let mut reader = reader(b"( ) ) ");
        reader.read_token().await.unwrap();
        reader.read_token().await.unwrap();
        let err = reader.read_token().await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnbalancedList));
    }

    #[tokio::test]
    async fn test_depth_tracking() {
        let mut reader = reader(b"( a ( b ) c ) ");
        assert_eq!(reader.depth(), 0);
        reader.read_token().await.unwrap();
        assert_eq!(reader.depth(), 1);
        reader.read_token().await.unwrap();
        reader.read_token().await.unwrap();
        assert_eq!(reader.depth(), 2);
        reader.read_token().await.unwrap();
        reader.read_token().await.unwrap();
        assert_eq!(reader.depth(), 1);
        reader.read_token().await.unwrap();
        reader.read_token().await.unwrap();
        assert_eq!(reader.depth(), 0);
    }

    #[tokio::test]
    async fn test_malformed_inputs() {
        let mut r = reader(b"#abc ");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::Malformed(_))
        ));

        // Items need a separator before the closing paren.
        let mut r = reader(b"word) ");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::Malformed(_))
        ));

        let mut r = reader(b"12x ");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::Malformed(_))
        ));

        // Does not fit in a u64.
        let mut r = reader(b"99999999999999999999999 ");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_tokens() {
        let mut r = reader(b"10:abc");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::UnexpectedEof)
        ));

        let mut r = reader(b"word");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::UnexpectedEof)
        ));

        let mut r = reader(b"42");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_oversized_string_rejected() {
        // Rejected from the length prefix alone, before any payload arrives.
        let mut r = reader(b"10485761:abc ");
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::BufferOverflow { size: 10485761, .. })
        ));
    }

    #[tokio::test]
    async fn test_nesting_ceiling() {
        let data: &'static [u8] = Box::leak("( ".repeat(MAX_LIST_DEPTH + 1).into_bytes().into_boxed_slice());
        let mut r = reader(data);
        for _ in 0..MAX_LIST_DEPTH {
            assert_eq!(r.read_token().await.unwrap(), Token::ListBegin);
        }
        assert!(matches!(
            r.read_token().await,
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_read_item() {
        let mut r = reader(b"( 1 2 ) ( foo ) ");
        r.read_token().await.unwrap();
        assert_eq!(
            r.read_item(TokenKind::Number).await.unwrap(),
            Some(Token::Number(1))
        );
        assert_eq!(
            r.read_item(TokenKind::Number).await.unwrap(),
            Some(Token::Number(2))
        );
        assert_eq!(r.read_item(TokenKind::Number).await.unwrap(), None);
        assert_eq!(r.depth(), 0);

        r.read_token().await.unwrap();
        let err = r.read_item(TokenKind::Number).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedToken {
                expected: "number",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_read_text_item_accepts_words_and_strings() {
        let mut r = reader(b"( depth 6:mergei ) ");
        r.read_token().await.unwrap();
        assert_eq!(
            r.read_text_item().await.unwrap(),
            Some(Bytes::from_static(b"depth"))
        );
        assert_eq!(
            r.read_text_item().await.unwrap(),
            Some(Bytes::from_static(b"mergei"))
        );
        assert_eq!(r.read_text_item().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_skip_remaining_items() {
        let mut r = reader(b"( bogus ( 1 ( 2 3 ) ) ) ( get-latest-rev ( ) ) ");
        r.read_token().await.unwrap();
        assert_eq!(r.read_word().await.unwrap(), "bogus");
        r.skip_remaining_items().await.unwrap();
        assert_eq!(r.depth(), 0);

        assert_eq!(r.read_token().await.unwrap(), Token::ListBegin);
        assert_eq!(r.read_word().await.unwrap(), "get-latest-rev");
    }

    #[tokio::test]
    async fn test_skip_outside_list_is_illegal() {
        let mut r = reader(b"word ");
        assert!(matches!(
            r.skip_remaining_items().await,
            Err(ProtocolError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_read_token_of() {
        let mut r = reader(b"( 5 ");
        assert!(matches!(
            r.read_token_of(TokenKind::ListBegin).await.unwrap(),
            Token::ListBegin
        ));
        assert!(r.read_token_of(TokenKind::Word).await.is_err());
    }
}
