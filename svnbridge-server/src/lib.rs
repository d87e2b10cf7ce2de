//! # svnbridge-server
//!
//! `svn://` server for svnbridge.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - The per-connection session state machine (handshake, authentication,
//!   command loop, continuation steps)
//! - A command dispatch table with typed argument records
//! - ANONYMOUS, PLAIN and CRAM-MD5 authentication
//! - `svn://` URL parsing and YAML configuration

pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;
pub mod step;
pub mod url;

pub use auth::{
    AnonymousAuthenticator, Authenticator, CramMd5Authenticator, LocalUserDatabase,
    PlainAuthenticator, UserDatabase,
};
pub use config::{AuthConfig, Config, NetworkConfig, RepositoryConfig, UserConfig};
pub use error::ServerError;
pub use handler::{Command, CommandTable};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{ClientInfo, Session, SessionContext, SessionState};
pub use step::Step;
pub use url::SvnUrl;
