//! Repository error types.

use thiserror::Error;

/// Errors reported by a [`Repository`](crate::Repository).
///
/// The messages are shown to Subversion clients, so they never carry
/// internal detail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("No such revision {rev}")]
    NoSuchRevision { rev: u64 },

    #[error("Path '/{path}' not found in revision {rev}")]
    NotFound { path: String, rev: u64 },

    #[error("'/{path}' is not a file")]
    NotFile { path: String },

    #[error("'/{path}' is not a directory")]
    NotDirectory { path: String },

    #[error("'/{path}' already exists")]
    AlreadyExists { path: String },

    #[error("Revision property '{name}' has changed unexpectedly")]
    PropertyChanged { name: String },

    #[error("Invalid date: {0}")]
    BadDate(String),
}

impl RepositoryError {
    /// Returns whether the error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepositoryError::NoSuchRevision { .. } | RepositoryError::NotFound { .. }
        )
    }
}
