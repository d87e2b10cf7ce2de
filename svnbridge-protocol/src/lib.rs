//! # svnbridge-protocol
//!
//! Implementation of the Subversion `ra_svn` wire protocol.
//!
//! This crate provides:
//! - The token model (lists, words, numbers, length-prefixed strings)
//! - A buffered, depth-tracking token reader
//! - A fluent token writer that frames messages at depth zero
//! - Schema-driven decoding of token streams into typed records
//! - Error types and stable Subversion error codes

pub mod codec;
pub mod error;
pub mod reader;
pub mod token;
pub mod writer;

pub use codec::{Decode, Record};
pub use error::{ErrorCode, ProtocolError};
pub use reader::SvnReader;
pub use token::{Token, TokenKind};
pub use writer::SvnWriter;

/// The only `ra_svn` protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u64 = 2;

/// Default port for `svn://` servers.
pub const DEFAULT_PORT: u16 = 3690;

/// Upper bound for the reader buffer and for any single string or word (10 MiB).
pub const MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Maximum list nesting accepted from a peer.
pub const MAX_LIST_DEPTH: usize = 64;
