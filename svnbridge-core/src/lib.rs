//! # svnbridge-core
//!
//! Collaborator contracts for the svnbridge protocol engine.
//!
//! This crate provides:
//! - The `Repository` trait the command handlers read revisions and files from
//! - Revision, node and user value types
//! - Repository path helpers
//! - `MemoryRepository`, a thread-safe in-memory repository

pub mod error;
pub mod memory;
pub mod path;
pub mod repository;
pub mod user;

pub use error::RepositoryError;
pub use memory::{Edit, MemoryRepository};
pub use repository::{
    format_date, parse_date, Action, ChangedPath, Node, NodeKind, Repository, RevisionInfo, Revnum,
    PROP_AUTHOR, PROP_DATE, PROP_LOG,
};
pub use user::User;
