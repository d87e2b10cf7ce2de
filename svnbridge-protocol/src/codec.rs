//! Schema-driven decoding of token streams into typed values.
//!
//! Every request type lists its fields in wire order and decodes them one by
//! one through a [`Record`]. A field is only read while the record's list is
//! still open; once an earlier field has consumed the closing token, all
//! remaining fields take their [`Default`] value without touching the
//! stream. Trailing elements the schema does not know about are drained by
//! [`Record::finish`], so newer clients sending extra fields stay compatible.
//!
//! ```ignore
//! impl Decode for CheckPathArgs {
//!     async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
//!         let mut record = Record::open(reader, in_list).await?;
//!         let args = CheckPathArgs {
//!             path: record.field().await?,
//!             rev: record.field().await?,
//!         };
//!         record.finish().await?;
//!         Ok(args)
//!     }
//! }
//! ```

use crate::error::ProtocolError;
use crate::reader::{unexpected, SvnReader};
use crate::token::{Token, TokenKind};
use bytes::Bytes;
use std::future::Future;

/// A value with a fixed wire shape.
///
/// `in_list` is true when the value is an element of an enclosing list. In
/// that position the enclosing list may already end, in which case the
/// value is absent and decodes to its default. Outside a list the value is
/// mandatory and a `ListEnd` is a type mismatch.
pub trait Decode: Default + Send + Sized {
    fn decode(
        reader: &mut SvnReader,
        in_list: bool,
    ) -> impl Future<Output = Result<Self, ProtocolError>> + Send;
}

/// Cursor over the fields of one list-shaped value.
pub struct Record<'a> {
    reader: &'a mut SvnReader,
    base_depth: usize,
    present: bool,
}

impl<'a> Record<'a> {
    /// Consumes the `ListBegin` of the record.
    ///
    /// Inside an enclosing list a missing record (the enclosing list ends
    /// instead) is not an error; every field of it decodes to its default.
    pub async fn open(reader: &'a mut SvnReader, in_list: bool) -> Result<Record<'a>, ProtocolError> {
        let present = if in_list {
            reader.read_item(TokenKind::ListBegin).await?.is_some()
        } else {
            reader.read_token_of(TokenKind::ListBegin).await?;
            true
        };
        let base_depth = reader.depth();
        Ok(Record {
            reader,
            base_depth,
            present,
        })
    }

    /// Returns whether the record's list has been closed (or was never
    /// there), so that no further fields will be read.
    pub fn is_exhausted(&self) -> bool {
        // A reader shallower than the record means an earlier field consumed
        // the closing token. Malformed streams with surplus closers land here
        // too and are treated as missing fields.
        !self.present || self.reader.depth() != self.base_depth
    }

    /// Decodes the next field, or returns its default when the record has
    /// already ended.
    pub async fn field<T: Decode>(&mut self) -> Result<T, ProtocolError> {
        if self.is_exhausted() {
            return Ok(T::default());
        }
        T::decode(self.reader, true).await
    }

    /// Decodes a trailing optional field (`? value`), returning `None` if the
    /// record ends before it.
    pub async fn optional<T: Decode>(&mut self) -> Result<Option<T>, ProtocolError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let value = T::decode(self.reader, true).await?;
        if self.reader.depth() < self.base_depth {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Direct access to the reader for fields with an irregular shape.
    pub fn reader(&mut self) -> &mut SvnReader {
        self.reader
    }

    /// Drains unknown trailing fields and the record's closing token.
    pub async fn finish(self) -> Result<(), ProtocolError> {
        if !self.present {
            return Ok(());
        }
        while self.reader.depth() >= self.base_depth {
            self.reader.read_token().await?;
        }
        Ok(())
    }
}

async fn scalar(
    reader: &mut SvnReader,
    in_list: bool,
    kind: TokenKind,
) -> Result<Option<Token>, ProtocolError> {
    if in_list {
        reader.read_item(kind).await
    } else {
        reader.read_token_of(kind).await.map(Some)
    }
}

impl Decode for u64 {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        match scalar(reader, in_list, TokenKind::Number).await? {
            Some(Token::Number(n)) => Ok(n),
            _ => Ok(0),
        }
    }
}

impl Decode for u32 {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let n = u64::decode(reader, in_list).await?;
        u32::try_from(n).map_err(|_| ProtocolError::Malformed(format!("number {n} out of range")))
    }
}

impl Decode for usize {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let n = u64::decode(reader, in_list).await?;
        usize::try_from(n).map_err(|_| ProtocolError::Malformed(format!("number {n} out of range")))
    }
}

impl Decode for bool {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        match scalar(reader, in_list, TokenKind::Word).await? {
            Some(Token::Word(word)) => match word.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(ProtocolError::Malformed(format!("invalid boolean: {other}"))),
            },
            _ => Ok(false),
        }
    }
}

impl Decode for Bytes {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        match scalar(reader, in_list, TokenKind::String).await? {
            Some(Token::String(bytes)) => Ok(bytes),
            _ => Ok(Bytes::new()),
        }
    }
}

/// Text may arrive as a word or as a string.
impl Decode for String {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let bytes = if in_list {
            match reader.read_text_item().await? {
                Some(bytes) => bytes,
                None => return Ok(String::new()),
            }
        } else {
            match reader.read_token().await? {
                Token::Word(word) => return Ok(word),
                Token::String(bytes) => bytes,
                token => return Err(unexpected("word or string", &token)),
            }
        };
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::Malformed("string is not valid UTF-8".to_string()))
    }
}

/// An empty record, for commands without parameters. Any elements sent
/// anyway are ignored.
impl Decode for () {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        Record::open(reader, in_list).await?.finish().await
    }
}

/// A homogeneous list; an absent list is empty.
impl<T: Decode> Decode for Vec<T> {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let mut items = Vec::new();
        while let Some(item) = record.optional::<T>().await? {
            items.push(item);
        }
        Ok(items)
    }
}

/// A list of zero or one element, the protocol's `( value ? )` tuple.
impl<T: Decode> Decode for Option<T> {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let value = record.optional::<T>().await?;
        record.finish().await?;
        Ok(value)
    }
}
