//! Server error types.

use svnbridge_core::RepositoryError;
use svnbridge_protocol::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// An application failure reported to the peer with a specific code.
    #[error("{message}")]
    Svn { code: ErrorCode, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    pub fn svn(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerError::Svn {
            code,
            message: message.into(),
        }
    }

    /// Returns whether the error ends the connection.
    ///
    /// Transport and framing failures are fatal. Everything else is written
    /// back to the peer as a `failure` response and the session continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::Io(_)
                | ServerError::Protocol(_)
                | ServerError::Config(_)
                | ServerError::ShuttingDown
        )
    }

    /// Returns whether the error is the peer going away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ServerError::Protocol(e) => e.is_disconnect(),
            ServerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Converts to the Subversion error code sent in `failure` responses.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::Svn { code, .. } => *code,
            ServerError::Repository(e) => match e {
                RepositoryError::NoSuchRevision { .. } => ErrorCode::FsNoSuchRevision,
                RepositoryError::NotFound { .. } => ErrorCode::FsNotFound,
                RepositoryError::NotFile { .. } => ErrorCode::FsNotFile,
                RepositoryError::NotDirectory { .. } => ErrorCode::FsNotDirectory,
                RepositoryError::AlreadyExists { .. } => ErrorCode::FsAlreadyExists,
                RepositoryError::PropertyChanged { .. } => ErrorCode::FsPropBasevalueMismatch,
                RepositoryError::BadDate(_) => ErrorCode::BadDate,
            },
            ServerError::Protocol(e) => match e {
                ProtocolError::Malformed(_)
                | ProtocolError::UnexpectedToken { .. }
                | ProtocolError::UnbalancedList
                | ProtocolError::BufferOverflow { .. } => ErrorCode::RaSvnMalformedData,
                ProtocolError::VersionMismatch { .. } => ErrorCode::RaSvnBadVersion,
                _ => ErrorCode::RaSvnCmdErr,
            },
            ServerError::Io(_) | ServerError::Config(_) | ServerError::ShuttingDown => {
                ErrorCode::RaSvnCmdErr
            }
        }
    }
}
