//! Authentication mechanisms and the local user database.
//!
//! A [`UserDatabase`] hands the session an ordered list of
//! [`Authenticator`]s. The session advertises their method names, picks the
//! first one matching the client's choice and lets it run whatever exchange
//! the mechanism needs over the connection.

use crate::config::AuthConfig;
use crate::error::ServerError;
use bytes::Bytes;
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use svnbridge_core::User;
use svnbridge_protocol::{SvnReader, SvnWriter};

/// One SASL-style authentication mechanism.
pub trait Authenticator: Send + Sync {
    /// Mechanism name advertised to clients (`ANONYMOUS`, `PLAIN`, ...).
    fn method_name(&self) -> &str;

    /// Runs the mechanism. `token` is the initial response the client sent
    /// along with its choice, if any. Complete messages written to `writer`
    /// reach the client without an explicit flush.
    ///
    /// Returns `Ok(None)` when the credentials are rejected; the session then
    /// reports the failure and lets the client try again.
    fn authenticate<'a>(
        &'a self,
        reader: &'a mut SvnReader,
        writer: &'a mut SvnWriter,
        token: Option<Bytes>,
    ) -> BoxFuture<'a, Result<Option<User>, ServerError>>;
}

/// Source of the authenticators offered for the served realm.
pub trait UserDatabase: Send + Sync {
    fn authenticators(&self) -> &[Arc<dyn Authenticator>];
}

/// Accepts everybody as the anonymous user.
#[derive(Debug, Default)]
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn method_name(&self) -> &str {
        "ANONYMOUS"
    }

    fn authenticate<'a>(
        &'a self,
        _reader: &'a mut SvnReader,
        _writer: &'a mut SvnWriter,
        _token: Option<Bytes>,
    ) -> BoxFuture<'a, Result<Option<User>, ServerError>> {
        Box::pin(async { Ok(Some(User::anonymous())) })
    }
}

struct Account {
    user: User,
    password: Option<String>,
    password_sha256: Option<String>,
}

/// Configured user accounts, shared by the password based mechanisms.
pub struct Accounts {
    accounts: HashMap<String, Account>,
}

impl Accounts {
    pub fn from_config(config: &AuthConfig) -> Self {
        let accounts = config
            .users
            .iter()
            .map(|u| {
                let user = User {
                    username: u.username.clone(),
                    real_name: u.real_name.clone(),
                    email: u.email.clone(),
                };
                let account = Account {
                    user,
                    password: u.password.clone(),
                    password_sha256: u.password_sha256.as_ref().map(|h| h.to_ascii_lowercase()),
                };
                (u.username.clone(), account)
            })
            .collect();
        Self { accounts }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Returns whether some account can take part in a challenge-response
    /// exchange, which needs the plaintext password.
    pub fn has_plaintext(&self) -> bool {
        self.accounts.values().any(|a| a.password.is_some())
    }

    /// Checks a username and password pair.
    pub fn verify(&self, username: &str, password: &[u8]) -> Option<User> {
        let account = self.accounts.get(username)?;
        let matches = match (&account.password, &account.password_sha256) {
            (Some(plain), _) => plain.as_bytes() == password,
            (None, Some(hash)) => *hash == hash_password(password),
            (None, None) => false,
        };
        matches.then(|| account.user.clone())
    }

    fn plaintext(&self, username: &str) -> Option<(&User, &str)> {
        let account = self.accounts.get(username)?;
        let password = account.password.as_deref()?;
        Some((&account.user, password))
    }
}

/// Hashes a password using SHA-256, returning a lowercase hex string.
pub fn hash_password(password: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hex::encode(hasher.finalize())
}

/// `PLAIN`: the initial token is `\0<user>\0<password>`.
pub struct PlainAuthenticator {
    accounts: Arc<Accounts>,
}

impl PlainAuthenticator {
    pub fn new(accounts: Arc<Accounts>) -> Self {
        Self { accounts }
    }

    fn check(&self, token: &[u8]) -> Option<User> {
        let mut parts = token.splitn(3, |b| *b == 0);
        let _authzid = parts.next()?;
        let username = std::str::from_utf8(parts.next()?).ok()?;
        let password = parts.next()?;
        self.accounts.verify(username, password)
    }
}

impl Authenticator for PlainAuthenticator {
    fn method_name(&self) -> &str {
        "PLAIN"
    }

    fn authenticate<'a>(
        &'a self,
        _reader: &'a mut SvnReader,
        _writer: &'a mut SvnWriter,
        token: Option<Bytes>,
    ) -> BoxFuture<'a, Result<Option<User>, ServerError>> {
        Box::pin(async move {
            let user = token.and_then(|token| self.check(&token));
            if user.is_none() {
                tracing::debug!("PLAIN credentials rejected");
            }
            Ok(user)
        })
    }
}

/// `CRAM-MD5`: the server sends a challenge in a `step` response and the
/// client answers with `<user> <hex hmac-md5(password, challenge)>`.
pub struct CramMd5Authenticator {
    accounts: Arc<Accounts>,
}

impl CramMd5Authenticator {
    pub fn new(accounts: Arc<Accounts>) -> Self {
        Self { accounts }
    }

    fn challenge() -> String {
        format!(
            "<{}.{}@svnbridge>",
            uuid::Uuid::new_v4().simple(),
            chrono::Utc::now().timestamp_micros()
        )
    }

    fn verify(&self, challenge: &[u8], response: &[u8]) -> Option<User> {
        let response = std::str::from_utf8(response).ok()?;
        let (username, digest) = response.rsplit_once(' ')?;
        let digest = hex::decode(digest).ok()?;
        let (user, password) = self.accounts.plaintext(username)?;
        let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes()).ok()?;
        mac.update(challenge);
        mac.verify_slice(&digest).ok()?;
        Some(user.clone())
    }
}

impl Authenticator for CramMd5Authenticator {
    fn method_name(&self) -> &str {
        "CRAM-MD5"
    }

    fn authenticate<'a>(
        &'a self,
        reader: &'a mut SvnReader,
        writer: &'a mut SvnWriter,
        _token: Option<Bytes>,
    ) -> BoxFuture<'a, Result<Option<User>, ServerError>> {
        Box::pin(async move {
            let challenge = Self::challenge();
            writer
                .list_begin()
                .word("step")
                .list_begin()
                .string(&challenge)
                .list_end()
                .list_end();

            let response = reader.read_string().await?;
            let user = self.verify(challenge.as_bytes(), &response);
            if user.is_none() {
                tracing::debug!("CRAM-MD5 response rejected");
            }
            Ok(user)
        })
    }
}

/// User database backed by the accounts in the configuration file.
pub struct LocalUserDatabase {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl LocalUserDatabase {
    /// Offers `CRAM-MD5` and `PLAIN` when accounts exist (strongest first)
    /// and `ANONYMOUS` when enabled.
    pub fn new(config: &AuthConfig) -> Self {
        let accounts = Arc::new(Accounts::from_config(config));
        let mut authenticators: Vec<Arc<dyn Authenticator>> = Vec::new();
        if accounts.has_plaintext() {
            authenticators.push(Arc::new(CramMd5Authenticator::new(accounts.clone())));
        }
        if !accounts.is_empty() {
            authenticators.push(Arc::new(PlainAuthenticator::new(accounts)));
        }
        if config.anonymous {
            authenticators.push(Arc::new(AnonymousAuthenticator));
        }
        Self { authenticators }
    }

    /// A database with explicitly chosen mechanisms.
    pub fn with_authenticators(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }
}

impl UserDatabase for LocalUserDatabase {
    fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }
}
