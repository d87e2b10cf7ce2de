//! `svn://` URL handling.

use crate::error::ServerError;
use std::fmt;
use svnbridge_core::path;
use svnbridge_protocol::{ErrorCode, DEFAULT_PORT};

const SCHEME: &str = "svn://";

/// A parsed, normalized `svn://` URL.
///
/// The path is kept decoded and normalized (no leading or trailing slash),
/// so it can be compared against repository paths directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvnUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl SvnUrl {
    /// Parses a client supplied URL. Any user name is dropped.
    pub fn parse(input: &str) -> Result<Self, ServerError> {
        let input = input.trim();
        let illegal = || {
            ServerError::svn(
                ErrorCode::RaIllegalUrl,
                format!("Illegal svn repository URL '{input}'"),
            )
        };

        let rest = match input.get(..SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => &input[SCHEME.len()..],
            _ => return Err(illegal()),
        };
        let (authority, raw_path) = rest.split_once('/').unwrap_or((rest, ""));
        let hostport = authority.rsplit_once('@').map_or(authority, |(_, h)| h);

        let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(illegal)?;
            let port = match after {
                "" => DEFAULT_PORT,
                p => p
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(illegal)?,
            };
            (host, port)
        } else {
            match hostport.split_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| illegal())?),
                None => (hostport, DEFAULT_PORT),
            }
        };
        if host.is_empty() {
            return Err(illegal());
        }

        let decoded = percent_decode(raw_path).ok_or_else(illegal)?;
        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
            path: path::normalize(&decoded),
        })
    }

    /// Returns the same server with a different path.
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            path: path::normalize(path),
        }
    }
}

impl fmt::Display for SvnUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{SCHEME}[{}]:{}", self.host, self.port)?;
        } else {
            write!(f, "{SCHEME}{}:{}", self.host, self.port)?;
        }
        if !self.path.is_empty() {
            write!(f, "/{}", percent_encode(&self.path))?;
        }
        Ok(())
    }
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn percent_encode(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        if b.is_ascii_alphanumeric() || b"/-_.~!$&'()*+,;=:@".contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
