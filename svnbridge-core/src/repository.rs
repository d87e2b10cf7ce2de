//! The repository contract consumed by the command handlers.

use crate::error::RepositoryError;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// A revision number.
pub type Revnum = u64;

pub const PROP_AUTHOR: &str = "svn:author";
pub const PROP_DATE: &str = "svn:date";
pub const PROP_LOG: &str = "svn:log";

/// Node kind as reported by `check-path` and `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    None,
    File,
    Dir,
}

impl NodeKind {
    /// Wire word for this kind.
    pub fn as_word(&self) -> &'static str {
        match self {
            NodeKind::None => "none",
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
        }
    }
}

/// How a revision touched a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Added,
    Modified,
    Deleted,
    Replaced,
}

impl Action {
    /// Single letter used in log output (`A`, `M`, `D`, `R`).
    pub fn as_letter(&self) -> &'static str {
        match self {
            Action::Added => "A",
            Action::Modified => "M",
            Action::Deleted => "D",
            Action::Replaced => "R",
        }
    }
}

/// One entry of a revision's changed path list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    pub action: Action,
    pub kind: NodeKind,
}

/// An immutable revision, with its (mutable upstream) properties captured at
/// the time of the call.
#[derive(Debug, Clone)]
pub struct RevisionInfo {
    pub id: Revnum,
    pub properties: BTreeMap<String, Bytes>,
    /// Changed paths keyed by repository path.
    pub changes: BTreeMap<String, ChangedPath>,
}

impl RevisionInfo {
    pub fn author(&self) -> Option<&str> {
        self.text_property(PROP_AUTHOR)
    }

    pub fn message(&self) -> Option<&str> {
        self.text_property(PROP_LOG)
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.text_property(PROP_DATE).and_then(|d| parse_date(d).ok())
    }

    fn text_property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// A file or directory in a specific revision.
#[derive(Debug, Clone)]
pub struct Node {
    pub path: String,
    pub kind: NodeKind,
    /// Content length for files, 0 for directories.
    pub size: u64,
    pub last_changed_rev: Revnum,
    pub properties: BTreeMap<String, Bytes>,
}

/// Read access to a versioned tree plus revision property mutation.
///
/// Implementations are shared by all sessions and must be safe to call
/// concurrently.
pub trait Repository: Send + Sync {
    /// Repository UUID announced to clients.
    fn uuid(&self) -> &str;

    fn latest_revision(&self) -> Revnum;

    fn revision(&self, rev: Revnum) -> Result<RevisionInfo, RepositoryError>;

    /// Returns the youngest revision committed at or before `date`
    /// (revision 0 if none is).
    fn revision_by_date(&self, date: DateTime<Utc>) -> Revnum;

    /// Sets (`Some`) or deletes (`None`) a revision property.
    ///
    /// When `expected` is given the change is applied only if the current
    /// value equals it (`Some(None)` meaning "currently unset").
    fn set_revision_property(
        &self,
        rev: Revnum,
        name: &str,
        value: Option<Bytes>,
        expected: Option<Option<Bytes>>,
    ) -> Result<(), RepositoryError>;

    /// Looks up a node. `Ok(None)` means the path does not exist in `rev`.
    fn node(&self, rev: Revnum, path: &str) -> Result<Option<Node>, RepositoryError>;

    /// Reads a file's contents.
    fn file_contents(&self, rev: Revnum, path: &str) -> Result<Bytes, RepositoryError>;
}

/// Formats a timestamp the way Subversion stores `svn:date`
/// (`2024-01-31T12:00:00.000000Z`).
pub fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a Subversion date string.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| RepositoryError::BadDate(value.to_string()))
}
