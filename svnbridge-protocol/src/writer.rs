//! Fluent token writer.
//!
//! Tokens are encoded into the message being built as soon as they are
//! written. A message is complete when the list depth returns to zero, or
//! when a bare item (such as the `done` word or a file content chunk) is
//! written at depth zero; complete messages are handed straight to a
//! background task that pushes them to the transport. A half-written message
//! never leaves the writer. [`SvnWriter::flush`] waits until everything
//! handed off so far has reached the transport and reports write failures.
//!
//! ```ignore
//! writer
//!     .list_begin()
//!     .word("success")
//!     .list_begin()
//!     .number(42)
//!     .list_end()
//!     .list_end();
//! writer.flush().await?;
//! ```

use crate::error::{ErrorCode, ProtocolError};
use crate::token::{encode_decimal, is_valid_word, Token};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};

/// Work for the transport task.
enum Outgoing {
    Message(Bytes),
    Flush(oneshot::Sender<io::Result<()>>),
    Shutdown(oneshot::Sender<io::Result<()>>),
}

/// Writes `ra_svn` tokens to a byte stream, tracking list depth.
pub struct SvnWriter {
    tx: mpsc::UnboundedSender<Outgoing>,
    /// The message being built. Empty at depth zero.
    buf: BytesMut,
    depth: usize,
    /// First misuse detected by the builder.
    error: Option<&'static str>,
}

impl SvnWriter {
    /// Wraps `stream`, spawning the task that owns it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(stream: impl AsyncWrite + Unpin + Send + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(transmit(BufWriter::new(stream), rx));
        Self {
            tx,
            buf: BytesMut::with_capacity(8192),
            depth: 0,
            error: None,
        }
    }

    /// Number of currently open lists.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of bytes in the message currently being built.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn list_begin(&mut self) -> &mut Self {
        self.buf.put_slice(b"( ");
        self.depth += 1;
        self
    }

    pub fn list_end(&mut self) -> &mut Self {
        if self.depth == 0 {
            self.error.get_or_insert("list end without matching list begin");
            return self;
        }
        self.buf.put_slice(b") ");
        self.depth -= 1;
        self.end_item()
    }

    pub fn word(&mut self, word: &str) -> &mut Self {
        if !is_valid_word(word) {
            self.error.get_or_insert("invalid word");
            return self;
        }
        self.buf.put_slice(word.as_bytes());
        self.buf.put_u8(b' ');
        self.end_item()
    }

    pub fn number(&mut self, n: u64) -> &mut Self {
        encode_decimal(n, &mut self.buf);
        self.buf.put_u8(b' ');
        self.end_item()
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.binary(s.as_bytes())
    }

    pub fn binary(&mut self, bytes: &[u8]) -> &mut Self {
        encode_decimal(bytes.len() as u64, &mut self.buf);
        self.buf.put_u8(b':');
        self.buf.put_slice(bytes);
        self.buf.put_u8(b' ');
        self.end_item()
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.word(if value { "true" } else { "false" })
    }

    /// Writes an arbitrary token.
    pub fn token(&mut self, token: &Token) -> &mut Self {
        match token {
            Token::ListBegin => self.list_begin(),
            Token::ListEnd => self.list_end(),
            Token::Word(word) => self.word(word),
            Token::Number(n) => self.number(*n),
            Token::String(bytes) => self.binary(bytes),
        }
    }

    /// Writes a property list: `( ( name value ) ... )`. A missing map is
    /// written as an empty list.
    pub fn write_map(&mut self, map: Option<&BTreeMap<String, Bytes>>) -> &mut Self {
        self.list_begin();
        for (name, value) in map.into_iter().flatten() {
            self.list_begin().string(name).binary(value).list_end();
        }
        self.list_end()
    }

    /// Writes `( success ( ) )`.
    pub fn success(&mut self) -> &mut Self {
        self.list_begin()
            .word("success")
            .list_begin()
            .list_end()
            .list_end()
    }

    /// Writes a command failure:
    /// `( failure ( ( code message file line ) ) )`.
    pub fn failure(&mut self, code: ErrorCode, message: &str) -> &mut Self {
        self.list_begin()
            .word("failure")
            .list_begin()
            .list_begin()
            .number(code.code())
            .string(message)
            .string("")
            .number(0)
            .list_end()
            .list_end()
            .list_end()
    }

    /// Returns the first builder misuse since it was last taken, as
    /// [`ProtocolError::IllegalState`].
    pub fn take_error(&mut self) -> Option<ProtocolError> {
        self.error.take().map(ProtocolError::IllegalState)
    }

    /// Waits until every complete message has been written to the transport.
    ///
    /// Fails with [`ProtocolError::IllegalState`] if the builder was misused,
    /// or with the I/O error that stopped the transport.
    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        if let Some(err) = self.take_error() {
            return Err(err);
        }
        let (ack, done) = oneshot::channel();
        self.tx.send(Outgoing::Flush(ack)).map_err(|_| closed())?;
        done.await.map_err(|_| closed())??;
        Ok(())
    }

    /// Drops the partially written message. Complete messages and any
    /// recorded misuse are kept.
    ///
    /// Used when a handler fails halfway through a response and a failure
    /// has to be sent in its place.
    pub fn discard_pending(&mut self) {
        self.buf.clear();
        self.depth = 0;
    }

    /// Writes out complete messages and shuts down the write half of the
    /// transport. A partial message is dropped.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.discard_pending();
        let (ack, done) = oneshot::channel();
        self.tx.send(Outgoing::Shutdown(ack)).map_err(|_| closed())?;
        done.await.map_err(|_| closed())??;
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn end_item(&mut self) -> &mut Self {
        if self.depth == 0 && !self.buf.is_empty() {
            let message = self.buf.split().freeze();
            // A stopped transport task is reported by the next flush.
            let _ = self.tx.send(Outgoing::Message(message));
        }
        self
    }
}

fn closed() -> ProtocolError {
    io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped").into()
}

/// Owns the transport: writes messages in order and flushes whenever the
/// queue runs empty. After a write error, every later request reports it.
async fn transmit<W: AsyncWrite + Unpin>(
    mut stream: BufWriter<W>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    let mut failed: Option<(io::ErrorKind, String)> = None;
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(item) = next {
            match item {
                Outgoing::Message(message) => {
                    if failed.is_none() {
                        tracing::trace!(bytes = message.len(), "sending");
                        if let Err(e) = stream.write_all(&message).await {
                            tracing::debug!(error = %e, "transport write failed");
                            failed = Some((e.kind(), e.to_string()));
                        }
                    }
                }
                Outgoing::Flush(ack) => {
                    let _ = ack.send(push(&mut stream, &mut failed).await);
                }
                Outgoing::Shutdown(ack) => {
                    let mut result = push(&mut stream, &mut failed).await;
                    if result.is_ok() {
                        result = stream.shutdown().await;
                    }
                    let _ = ack.send(result);
                    return;
                }
            }
            next = rx.try_recv().ok();
        }
        let _ = push(&mut stream, &mut failed).await;
    }
}

/// Flushes the buffered stream, remembering the first failure.
async fn push<W: AsyncWrite + Unpin>(
    stream: &mut BufWriter<W>,
    failed: &mut Option<(io::ErrorKind, String)>,
) -> io::Result<()> {
    if failed.is_none() {
        if let Err(e) = stream.flush().await {
            *failed = Some((e.kind(), e.to_string()));
        }
    }
    match failed {
        Some((kind, message)) => Err(io::Error::new(*kind, message.clone())),
        None => Ok(()),
    }
}
