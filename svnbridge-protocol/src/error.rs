//! Protocol error types and error codes.

use std::fmt;
use thiserror::Error;

/// Errors raised while reading, writing or decoding `ra_svn` tokens.
///
/// Every variant is fatal for the connection it occurred on. Application
/// level failures are modelled by the server crate and travel to the peer as
/// `failure` responses instead.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("buffer overflow: {size} bytes (max {max})")]
    BufferOverflow { size: usize, max: usize },

    #[error("unexpected token: {found} (expected: {expected})")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },

    #[error("unexpected end of list")]
    UnbalancedList,

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("unsupported protocol version: {got} (expected: {expected})")]
    VersionMismatch { got: u64, expected: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the error is caused by the peer going away rather than
    /// by bad input.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::UnexpectedEof => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Subversion error codes sent in `failure` responses.
///
/// The numeric values are defined by Subversion (`svn_error_codes.h`) and are
/// part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadDate,
    FsNoSuchRevision,
    FsNotFound,
    FsNotDirectory,
    FsNotFile,
    FsAlreadyExists,
    FsPropBasevalueMismatch,
    RaIllegalUrl,
    RaNotAuthorized,
    UnsupportedFeature,
    ChecksumMismatch,
    RaSvnCmdErr,
    RaSvnUnknownCmd,
    RaSvnMalformedData,
    RaSvnBadVersion,
}

impl ErrorCode {
    /// Returns the numeric Subversion error code.
    pub fn code(&self) -> u64 {
        match self {
            ErrorCode::BadDate => 125003,
            ErrorCode::FsNoSuchRevision => 160006,
            ErrorCode::FsNotFound => 160013,
            ErrorCode::FsNotDirectory => 160016,
            ErrorCode::FsNotFile => 160017,
            ErrorCode::FsAlreadyExists => 160020,
            ErrorCode::FsPropBasevalueMismatch => 160024,
            ErrorCode::RaIllegalUrl => 170000,
            ErrorCode::RaNotAuthorized => 170001,
            ErrorCode::UnsupportedFeature => 200007,
            ErrorCode::ChecksumMismatch => 200014,
            ErrorCode::RaSvnCmdErr => 210000,
            ErrorCode::RaSvnUnknownCmd => 210001,
            ErrorCode::RaSvnMalformedData => 210004,
            ErrorCode::RaSvnBadVersion => 210006,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::BadDate => "SVN_ERR_BAD_DATE",
            ErrorCode::FsNoSuchRevision => "SVN_ERR_FS_NO_SUCH_REVISION",
            ErrorCode::FsNotFound => "SVN_ERR_FS_NOT_FOUND",
            ErrorCode::FsNotDirectory => "SVN_ERR_FS_NOT_DIRECTORY",
            ErrorCode::FsNotFile => "SVN_ERR_FS_NOT_FILE",
            ErrorCode::FsAlreadyExists => "SVN_ERR_FS_ALREADY_EXISTS",
            ErrorCode::FsPropBasevalueMismatch => "SVN_ERR_FS_PROP_BASEVALUE_MISMATCH",
            ErrorCode::RaIllegalUrl => "SVN_ERR_RA_ILLEGAL_URL",
            ErrorCode::RaNotAuthorized => "SVN_ERR_RA_NOT_AUTHORIZED",
            ErrorCode::UnsupportedFeature => "SVN_ERR_UNSUPPORTED_FEATURE",
            ErrorCode::ChecksumMismatch => "SVN_ERR_CHECKSUM_MISMATCH",
            ErrorCode::RaSvnCmdErr => "SVN_ERR_RA_SVN_CMD_ERR",
            ErrorCode::RaSvnUnknownCmd => "SVN_ERR_RA_SVN_UNKNOWN_CMD",
            ErrorCode::RaSvnMalformedData => "SVN_ERR_RA_SVN_MALFORMED_DATA",
            ErrorCode::RaSvnBadVersion => "SVN_ERR_RA_SVN_BAD_VERSION",
        };
        write!(f, "{name} ({})", self.code())
    }
}
