//! Per-connection session state machine.
//!
//! A session walks through the `ra_svn` handshake (greeting, capability
//! exchange, authentication, repository announcement) and then serves
//! commands until the client disconnects. Commands that answer in several
//! parts leave [`Step`]s behind; the main loop drains the step stack before
//! it reads the next command frame.

use crate::auth::UserDatabase;
use crate::error::ServerError;
use crate::handler::CommandTable;
use crate::server::ServerStats;
use crate::step::Step;
use crate::url::SvnUrl;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use svnbridge_core::{path, Repository, User};
use svnbridge_protocol::{
    Decode, ErrorCode, ProtocolError, Record, SvnReader, SvnWriter, Token, TokenKind,
    PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{Instrument, Span};

/// Capabilities announced in the greeting.
pub const SERVER_CAPABILITIES: &[&str] = &[
    "edit-pipeline",
    "svndiff1",
    "absent-entries",
    "depth",
    "log-revprops",
    "atomic-revprops",
];

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting sent, waiting for the client's version and capabilities.
    AwaitingCapabilities,
    /// Mechanisms advertised, waiting for the client's choice.
    AwaitingAuthMethod,
    /// An authenticator is exchanging messages with the client.
    Authenticating,
    /// Authenticated, repository not yet announced.
    Ready,
    /// Reading and running commands.
    Dispatching,
    /// Running a continuation step.
    Stepping,
    /// The session is over.
    Closed,
}

/// Handles shared by every session of a server.
#[derive(Clone)]
pub struct SessionContext {
    pub repository: Arc<dyn Repository>,
    pub users: Arc<dyn UserDatabase>,
    pub commands: Arc<CommandTable>,
    /// URL path the repository is mounted under.
    pub repository_path: String,
    pub realm: String,
    pub stats: Arc<ServerStats>,
}

/// What the client announced in its handshake response.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub version: u64,
    pub capabilities: Vec<String>,
    pub url: String,
    pub user_agent: String,
}

/// `( mechanism ( token ? ) )`. Some clients send the token unwrapped.
#[derive(Debug, Default)]
struct AuthResponse {
    mechanism: String,
    token: Option<Bytes>,
}

impl Decode for AuthResponse {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let mechanism: String = record.field().await?;
        let token = if record.is_exhausted() {
            None
        } else {
            let reader = record.reader();
            match reader.read_token().await? {
                Token::String(token) => Some(token),
                Token::ListBegin => match reader.read_item(TokenKind::String).await? {
                    Some(Token::String(token)) => {
                        reader.skip_remaining_items().await?;
                        Some(token)
                    }
                    _ => None,
                },
                Token::ListEnd => None,
                token => {
                    return Err(ProtocolError::UnexpectedToken {
                        expected: "string or list",
                        found: token.to_string(),
                    })
                }
            }
        };
        record.finish().await?;
        Ok(AuthResponse { mechanism, token })
    }
}

/// One client connection.
pub struct Session {
    reader: SvnReader,
    writer: SvnWriter,
    state: SessionState,
    ctx: Arc<SessionContext>,
    client: Option<ClientInfo>,
    capabilities: HashSet<String>,
    user: Option<User>,
    /// Repository URL as announced to the client.
    base_url: Option<SvnUrl>,
    /// Repository path that relative command paths are resolved against.
    root: String,
    steps: Vec<Step>,
    span: Span,
}

impl Session {
    pub fn new(
        read: impl AsyncRead + Unpin + Send + 'static,
        write: impl AsyncWrite + Unpin + Send + 'static,
        ctx: Arc<SessionContext>,
        span: Span,
    ) -> Self {
        Self {
            reader: SvnReader::new(read),
            writer: SvnWriter::new(write),
            state: SessionState::AwaitingCapabilities,
            ctx,
            client: None,
            capabilities: HashSet::new(),
            user: None,
            base_url: None,
            root: String::new(),
            steps: Vec::new(),
            span,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client(&self) -> Option<&ClientInfo> {
        self.client.as_ref()
    }

    /// Returns whether both sides announced capability `name`.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.ctx.repository
    }

    pub fn writer(&mut self) -> &mut SvnWriter {
        &mut self.writer
    }

    pub(crate) fn reader(&mut self) -> &mut SvnReader {
        &mut self.reader
    }

    /// Current session root, relative to the repository root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolves a client path against the session root.
    pub fn resolve_path(&self, relative: &str) -> String {
        path::join(&self.root, relative)
    }

    /// Schedules `step` to run before the next command is read.
    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Points the session root at `url`, which must lie inside the
    /// repository.
    pub fn reparent(&mut self, url: &str) -> Result<(), ServerError> {
        let url = SvnUrl::parse(url)?;
        let root = path::relative_to(&url.path, &self.ctx.repository_path).ok_or_else(|| {
            ServerError::svn(
                ErrorCode::RaIllegalUrl,
                format!("URL '{url}' is not a child of the repository root"),
            )
        })?;
        self.root = root.to_string();
        tracing::debug!(root = %self.root, "session root changed");
        Ok(())
    }

    /// Writes the auth request every command response starts with. The
    /// session is already authenticated, so it carries no mechanisms.
    pub(crate) fn write_auth_request(&mut self) {
        self.writer
            .list_begin()
            .word("success")
            .list_begin()
            .list_begin()
            .list_end()
            .string("")
            .list_end()
            .list_end();
    }

    /// Drives the session to completion.
    ///
    /// Returns `Ok` when the client went away; other errors have already
    /// been logged.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let span = self.span.clone();
        async move {
            let result = self.drive().await;
            self.state = SessionState::Closed;
            // Best effort: the peer may already be gone.
            let _ = self.writer.shutdown().await;
            match result {
                Ok(()) => Ok(()),
                Err(e) if e.is_disconnect() => {
                    tracing::debug!("client disconnected");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session terminated");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<(), ServerError> {
        self.exchange_capabilities().await?;
        self.authenticate().await?;
        self.announce().await?;
        self.serve().await
    }

    /// Sends the greeting and reads the client's reply.
    pub async fn exchange_capabilities(&mut self) -> Result<(), ServerError> {
        self.state = SessionState::AwaitingCapabilities;
        self.writer
            .list_begin()
            .word("success")
            .list_begin()
            .number(PROTOCOL_VERSION)
            .number(PROTOCOL_VERSION)
            .list_begin()
            .list_end()
            .list_begin();
        for capability in SERVER_CAPABILITIES {
            self.writer.word(capability);
        }
        self.writer.list_end().list_end().list_end();
        self.writer.flush().await?;

        let mut record = Record::open(&mut self.reader, false).await?;
        let version: u64 = record.field().await?;
        if version != PROTOCOL_VERSION {
            self.writer.failure(
                ErrorCode::RaSvnBadVersion,
                &format!("Unsupported ra_svn protocol version {version}"),
            );
            self.writer.flush().await?;
            return Err(ProtocolError::VersionMismatch {
                got: version,
                expected: PROTOCOL_VERSION,
            }
            .into());
        }
        let client = ClientInfo {
            version,
            capabilities: record.field().await?,
            url: record.field().await?,
            user_agent: record.field().await?,
        };
        record.finish().await?;

        tracing::debug!(
            url = %client.url,
            user_agent = %client.user_agent,
            capabilities = ?client.capabilities,
            "client greeting"
        );
        self.capabilities = client
            .capabilities
            .iter()
            .filter(|c| SERVER_CAPABILITIES.contains(&c.as_str()))
            .cloned()
            .collect();
        self.client = Some(client);
        self.state = SessionState::AwaitingAuthMethod;
        Ok(())
    }

    /// Advertises the mechanisms and runs attempts until one succeeds.
    pub async fn authenticate(&mut self) -> Result<(), ServerError> {
        let users = self.ctx.users.clone();
        self.writer
            .list_begin()
            .word("success")
            .list_begin()
            .list_begin();
        for authenticator in users.authenticators() {
            self.writer.word(authenticator.method_name());
        }
        self.writer
            .list_end()
            .string(&self.ctx.realm)
            .list_end()
            .list_end();

        while !self.authenticate_once().await? {}
        Ok(())
    }

    /// Handles a single `( mechanism token )` attempt and answers it.
    /// Returns whether the client is now authenticated.
    pub async fn authenticate_once(&mut self) -> Result<bool, ServerError> {
        self.state = SessionState::AwaitingAuthMethod;
        self.writer.flush().await?;
        let response = AuthResponse::decode(&mut self.reader, false).await?;

        let users = self.ctx.users.clone();
        let Some(authenticator) = users
            .authenticators()
            .iter()
            .find(|a| a.method_name() == response.mechanism)
        else {
            tracing::debug!(mechanism = %response.mechanism, "unsupported mechanism");
            self.write_auth_failure("Unsupported authentication mechanism");
            self.writer.flush().await?;
            return Ok(false);
        };

        self.state = SessionState::Authenticating;
        let user = authenticator
            .authenticate(&mut self.reader, &mut self.writer, response.token)
            .await?;
        match user {
            Some(user) => {
                tracing::info!(user = %user.username, mechanism = %response.mechanism, "authenticated");
                self.span.record("user", user.username.as_str());
                self.user = Some(user);
                self.writer.success();
                self.state = SessionState::Ready;
                Ok(true)
            }
            None => {
                self.write_auth_failure("Authentication failed");
                self.writer.flush().await?;
                self.state = SessionState::AwaitingAuthMethod;
                Ok(false)
            }
        }
    }

    fn write_auth_failure(&mut self, message: &str) {
        self.writer
            .list_begin()
            .word("failure")
            .list_begin()
            .string(message)
            .list_end()
            .list_end();
    }

    /// Resolves the client's URL against the repository and announces the
    /// repository identity.
    pub async fn announce(&mut self) -> Result<(), ServerError> {
        let url = self.client.as_ref().map(|c| c.url.clone()).unwrap_or_default();
        if let Err(e) = self.reparent(&url) {
            self.writer.failure(e.error_code(), &e.to_string());
            self.writer.flush().await?;
            return Err(e);
        }
        let base_url = SvnUrl::parse(&url)?.with_path(&self.ctx.repository_path);

        self.writer
            .list_begin()
            .word("success")
            .list_begin()
            .string(self.ctx.repository.uuid())
            .string(&base_url.to_string())
            .list_begin()
            .list_end()
            .list_end()
            .list_end();
        self.writer.flush().await?;
        self.base_url = Some(base_url);
        self.state = SessionState::Dispatching;
        Ok(())
    }

    /// Repository URL announced to the client.
    pub fn base_url(&self) -> Option<&SvnUrl> {
        self.base_url.as_ref()
    }

    /// The main loop: drain pending steps, otherwise read and run a command.
    pub async fn serve(&mut self) -> Result<(), ServerError> {
        loop {
            if let Some(step) = self.steps.pop() {
                self.state = SessionState::Stepping;
                if let Err(e) = step.execute(self) {
                    self.recover(e)?;
                }
                self.writer.flush().await?;
                continue;
            }
            self.state = SessionState::Dispatching;
            self.writer.flush().await?;
            self.dispatch_next().await?;
        }
    }

    async fn dispatch_next(&mut self) -> Result<(), ServerError> {
        let token = self.reader.read_token().await?;
        if token != Token::ListBegin {
            return Err(ProtocolError::UnexpectedToken {
                expected: "command",
                found: token.to_string(),
            }
            .into());
        }
        let name = self.reader.read_word().await?;
        self.ctx.stats.commands_total.fetch_add(1, Ordering::Relaxed);

        let commands = self.ctx.commands.clone();
        match commands.dispatch(&name, self).await {
            Some(Ok(())) => tracing::debug!(command = %name, "command processed"),
            Some(Err(e)) => self.recover(e)?,
            None => {
                tracing::warn!(command = %name, "unknown command");
                self.ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                self.writer.failure(
                    ErrorCode::RaSvnUnknownCmd,
                    &format!("Unknown command '{name}'"),
                );
                self.reader.skip_remaining_items().await?;
            }
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Reports a recoverable error to the client in place of whatever the
    /// failed command had started to write. Fatal errors are passed on, and
    /// so is writer misuse left behind by the failed command.
    fn recover(&mut self, err: ServerError) -> Result<(), ServerError> {
        if err.is_fatal() {
            return Err(err);
        }
        if let Some(misuse) = self.writer.take_error() {
            tracing::warn!(error = %err, "command failed after corrupting its response");
            return Err(misuse.into());
        }
        tracing::warn!(code = %err.error_code(), error = %err, "command failed");
        self.ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
        self.steps.clear();
        self.writer.discard_pending();
        self.writer.failure(err.error_code(), &err.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, LocalUserDatabase};
    use crate::config::{AuthConfig, UserConfig};
    use crate::handler::Command;
    use futures::future::BoxFuture;
    use std::time::Duration;
    use svnbridge_core::{Edit, MemoryRepository};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    const GREETING: &str = "( success ( 2 2 ( ) ( edit-pipeline svndiff1 absent-entries depth log-revprops atomic-revprops ) ) ) ";
    const MECHANISMS: &str = "( success ( ( CRAM-MD5 PLAIN ANONYMOUS ) 10:test-realm ) ) ";
    const ANNOUNCEMENT: &str =
        "( success ( 36:c0ffee00-0000-0000-0000-000000000000 25:svn://localhost:3690/repo ( ) ) ) ";
    const AUTH_REQUEST: &str = "( success ( ( ) 0: ) ) ";

    fn context(repository: MemoryRepository) -> Arc<SessionContext> {
        let auth = AuthConfig {
            anonymous: true,
            users: vec![UserConfig {
                username: "alice".to_string(),
                password: Some("secret".to_string()),
                ..Default::default()
            }],
        };
        Arc::new(SessionContext {
            repository: Arc::new(repository),
            users: Arc::new(LocalUserDatabase::new(&auth)),
            commands: Arc::new(CommandTable::standard()),
            repository_path: "repo".to_string(),
            realm: "test-realm".to_string(),
            stats: Arc::new(ServerStats::default()),
        })
    }

    /// r1 adds trunk/a.txt, r2 edits it, r3 adds README.
    fn seeded() -> MemoryRepository {
        let repo = MemoryRepository::with_uuid("c0ffee00-0000-0000-0000-000000000000");
        repo.commit(
            "alice",
            "layout",
            vec![
                Edit::Mkdir("trunk".to_string()),
                Edit::Write("trunk/a.txt".to_string(), Bytes::from_static(b"hello")),
            ],
        )
        .unwrap();
        repo.commit(
            "bob",
            "edit",
            vec![Edit::Write(
                "trunk/a.txt".to_string(),
                Bytes::from_static(b"hello world"),
            )],
        )
        .unwrap();
        repo.commit(
            "alice",
            "docs",
            vec![Edit::Write("README".to_string(), Bytes::from_static(b"docs"))],
        )
        .unwrap();
        repo
    }

    /// Test peer that speaks raw protocol text.
    struct Client {
        stream: DuplexStream,
    }

    impl Client {
        async fn send(&mut self, data: &str) {
            self.stream.write_all(data.as_bytes()).await.unwrap();
        }

        /// Reads exactly `expected.len()` bytes and compares them.
        async fn expect(&mut self, expected: &str) {
            let mut buf = vec![0u8; expected.len()];
            self.stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(String::from_utf8_lossy(&buf), expected);
        }

        /// Reads one command failure and returns its error code.
        async fn failure_code(&mut self) -> u64 {
            let mut buf = Vec::new();
            while !buf.ends_with(b" 0: 0 ) ) ) ") {
                buf.push(self.stream.read_u8().await.unwrap());
            }
            let text = String::from_utf8_lossy(&buf);
            let rest = text.strip_prefix("( failure ( ( ").unwrap();
            rest.split(' ').next().unwrap().parse().unwrap()
        }

        /// Closes the client's write side and reads everything the server
        /// sends until it hangs up.
        async fn finish(mut self) -> String {
            self.stream.shutdown().await.unwrap();
            let mut out = Vec::new();
            self.stream.read_to_end(&mut out).await.unwrap();
            String::from_utf8_lossy(&out).into_owned()
        }
    }

    /// Sends the challenge `abc` and accepts `abc-ok` as alice. Leaves
    /// flushing to the writer.
    struct ChallengeAuthenticator;

    impl Authenticator for ChallengeAuthenticator {
        fn method_name(&self) -> &str {
            "CHALLENGE"
        }

        fn authenticate<'a>(
            &'a self,
            reader: &'a mut SvnReader,
            writer: &'a mut SvnWriter,
            _token: Option<Bytes>,
        ) -> BoxFuture<'a, Result<Option<User>, ServerError>> {
            Box::pin(async move {
                writer
                    .list_begin()
                    .word("step")
                    .list_begin()
                    .string("abc")
                    .list_end()
                    .list_end();
                let answer = reader.read_string().await?;
                Ok((&answer[..] == b"abc-ok").then(|| User {
                    username: "alice".to_string(),
                    real_name: None,
                    email: None,
                }))
            })
        }
    }

    /// Closes a list it never opened, then fails.
    struct Unbalanced;

    impl Command for Unbalanced {
        const NAME: &'static str = "unbalanced";
        type Args = ();

        fn process(&self, session: &mut Session, _args: ()) -> Result<(), ServerError> {
            session.writer().list_end();
            Err(ServerError::svn(ErrorCode::RaSvnCmdErr, "boom"))
        }
    }

    fn start(ctx: Arc<SessionContext>) -> (Client, JoinHandle<Result<(), ServerError>>) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let (read, write) = tokio::io::split(server);
        let session = Session::new(read, write, ctx, Span::none());
        (Client { stream: client }, tokio::spawn(session.run()))
    }

    /// Runs the handshake anonymously with the session rooted at trunk.
    async fn connect(ctx: Arc<SessionContext>) -> (Client, JoinHandle<Result<(), ServerError>>) {
        let (mut client, handle) = start(ctx);
        client.expect(GREETING).await;
        client
            .send("( 2 ( edit-pipeline ) 26:svn://localhost/repo/trunk 10:test-agent ( ) ) ")
            .await;
        client.expect(MECHANISMS).await;
        client.send("( ANONYMOUS ( 0: ) ) ").await;
        client.expect("( success ( ) ) ").await;
        client.expect(ANNOUNCEMENT).await;
        (client, handle)
    }

    #[tokio::test]
    async fn test_handshake_and_get_latest_rev() {
        let (mut client, handle) = connect(context(seeded())).await;
        client.send("( get-latest-rev ( ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( 3 ) ) ").await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_version_mismatch_closes_connection() {
        let (mut client, handle) = start(context(seeded()));
        client.expect(GREETING).await;
        // Only the version is read before the session gives up.
        client.send("( 3 ( edit-pipeline ) ").await;
        assert_eq!(client.failure_code().await, 210006);
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::VersionMismatch {
                got: 3,
                expected: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_mechanism_keeps_waiting() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (read, write) = tokio::io::split(server);
        let mut session = Session::new(read, write, context(seeded()), Span::none());
        let mut client = Client { stream: client };

        client
            .send("( 2 ( ) 20:svn://localhost/repo 1:x ( ) ) ( KERBEROS ( 0: ) ) ")
            .await;
        session.exchange_capabilities().await.unwrap();
        assert_eq!(session.state(), SessionState::AwaitingAuthMethod);
        assert_eq!(session.client().unwrap().user_agent, "x");

        assert!(!session.authenticate_once().await.unwrap());
        assert_eq!(session.state(), SessionState::AwaitingAuthMethod);
        client.expect(GREETING).await;
        client
            .expect("( failure ( 36:Unsupported authentication mechanism ) ) ")
            .await;

        client.send("( PLAIN ( 13:\0alice\0secret ) ) ").await;
        assert!(session.authenticate_once().await.unwrap());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.user().unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_capabilities_are_negotiated() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (read, write) = tokio::io::split(server);
        let mut session = Session::new(read, write, context(seeded()), Span::none());
        let mut client = Client { stream: client };

        client
            .send("( 2 ( edit-pipeline mergeinfo depth ) 20:svn://localhost/repo 1:x ( ) ) ")
            .await;
        session.exchange_capabilities().await.unwrap();
        client.expect(GREETING).await;

        // The client's full list is kept, but only shared names count.
        assert_eq!(
            session.client().unwrap().capabilities,
            ["edit-pipeline", "mergeinfo", "depth"]
        );
        assert!(session.has_capability("edit-pipeline"));
        assert!(session.has_capability("depth"));
        assert!(!session.has_capability("mergeinfo"));
        assert!(!session.has_capability("svndiff1"));
    }

    #[tokio::test]
    async fn test_mechanism_challenge_is_sent_without_explicit_flush() {
        let mut ctx = (*context(seeded())).clone();
        ctx.users = Arc::new(LocalUserDatabase::with_authenticators(vec![
            Arc::new(ChallengeAuthenticator) as Arc<dyn Authenticator>,
        ]));
        let (mut client, handle) = start(Arc::new(ctx));
        client.expect(GREETING).await;
        client.send("( 2 ( ) 20:svn://localhost/repo 1:x ( ) ) ").await;
        client
            .expect("( success ( ( CHALLENGE ) 10:test-realm ) ) ")
            .await;
        client.send("( CHALLENGE ( 0: ) ) ").await;

        // The authenticator blocks on its reader right after writing the
        // challenge, so the challenge has to reach us on its own.
        tokio::time::timeout(Duration::from_secs(5), client.expect("( step ( 3:abc ) ) "))
            .await
            .unwrap();
        client.send("6:abc-ok ").await;
        client.expect("( success ( ) ) ").await;
        client.expect(ANNOUNCEMENT).await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wrong_password_allows_retry() {
        let (mut client, handle) = start(context(seeded()));
        client.expect(GREETING).await;
        client.send("( 2 ( ) 20:svn://localhost/repo 1:x ( ) ) ").await;
        client.expect(MECHANISMS).await;
        client.send("( PLAIN ( 12:\0alice\0wrong ) ) ").await;
        client.expect("( failure ( 21:Authentication failed ) ) ").await;
        // Second attempt sends the token without the wrapping list.
        client.send("( PLAIN 13:\0alice\0secret ) ").await;
        client.expect("( success ( ) ) ").await;
        client.expect(ANNOUNCEMENT).await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_url_outside_repository_is_rejected() {
        let (mut client, handle) = start(context(seeded()));
        client.expect(GREETING).await;
        client.send("( 2 ( ) 21:svn://localhost/other 1:x ( ) ) ").await;
        client.expect(MECHANISMS).await;
        client.send("( ANONYMOUS ( 0: ) ) ").await;
        client.expect("( success ( ) ) ").await;
        assert_eq!(client.failure_code().await, 170000);
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::RaIllegalUrl);
    }

    #[tokio::test]
    async fn test_unknown_command_is_skipped() {
        let (mut client, handle) = connect(context(seeded())).await;
        client
            .send("( bogus ( 1 ( 2 3 ) ) ) ( get-latest-rev ( ) ) ")
            .await;
        client
            .expect("( failure ( ( 210001 23:Unknown command 'bogus' 0: 0 ) ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( 3 ) ) ").await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        let (mut client, handle) = connect(context(seeded())).await;
        // A bare word where a command list should start.
        client.send("get-latest-rev ").await;
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(client.finish().await, "");
    }

    #[tokio::test]
    async fn test_writer_misuse_in_failed_command_is_fatal() {
        let mut ctx = (*context(seeded())).clone();
        let mut commands = CommandTable::standard();
        commands.register(Unbalanced);
        ctx.commands = Arc::new(commands);
        let (mut client, handle) = connect(Arc::new(ctx)).await;

        client
            .send("( unbalanced ( ) ) ( get-latest-rev ( ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        // No failure is sent for "boom": the misuse ends the session before
        // the second command is read.
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::IllegalState(_))
        ));
        assert_eq!(client.finish().await, "");
    }

    #[tokio::test]
    async fn test_paths_resolve_against_session_root() {
        let (mut client, handle) = connect(context(seeded())).await;
        // Rooted at trunk, so a.txt is trunk/a.txt.
        client.send("( check-path ( 5:a.txt ( ) ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( file ) ) ").await;

        client
            .send("( reparent ( 20:svn://localhost/repo ) ) ( check-path ( 5:trunk ( 1 ) ) ) ( check-path ( 6:README ( 2 ) ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( dir ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( none ) ) ").await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_recoverable_error_keeps_session() {
        let (mut client, handle) = connect(context(seeded())).await;
        client
            .send("( rev-proplist ( 42 ) ) ( get-latest-rev ( ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client
            .expect("( failure ( ( 160006 19:No such revision 42 0: 0 ) ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( 3 ) ) ").await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_get_file_streams_contents() {
        let repo = seeded();
        let big = Bytes::from(vec![b'x'; crate::step::CHUNK_SIZE + 10]);
        repo.commit("alice", "big", vec![Edit::Write("trunk/big".to_string(), big)])
            .unwrap();
        let (mut client, handle) = connect(context(repo)).await;

        client
            .send("( get-file ( 5:a.txt ( 2 ) false true ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client
            .expect("( success ( ( 32:5eb63bbbe01eeed093cb22bb8f5acdc3 ) 2 ( ) ) ) 11:hello world 0: ( success ( ) ) ")
            .await;

        // One full chunk, then the remaining 10 bytes.
        client.send("( get-file ( 3:big ( ) false true ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        let mut header = vec![0u8; "( success ( ( 32:".len() + 32 + " ) 4 ( ) ) ) ".len()];
        client.stream.read_exact(&mut header).await.unwrap();
        client.expect(&format!("{}:", crate::step::CHUNK_SIZE)).await;
        let mut chunk = vec![0u8; crate::step::CHUNK_SIZE];
        client.stream.read_exact(&mut chunk).await.unwrap();
        assert!(chunk.iter().all(|b| *b == b'x'));
        client.expect(" 10:xxxxxxxxxx 0: ( success ( ) ) ").await;

        // The session root itself is a directory.
        client.send("( get-file ( 0: ( ) false false ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        assert_eq!(client.failure_code().await, 160017);

        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_log_entries_in_order() {
        let (mut client, handle) = connect(context(seeded())).await;
        client
            .send("( reparent ( 20:svn://localhost/repo ) ) ( log ( ( 0: ) ( 3 ) ( 1 ) true false 0 false revprops ( 10:svn:author ) ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        client
            .expect("( ( ( 7:/README A ( ) ( file true false ) ) ) 3 ( 5:alice ) ( ) ( ) false false 0 ( ) false ) ")
            .await;
        client
            .expect("( ( ( 12:/trunk/a.txt M ( ) ( file true false ) ) ) 2 ( 3:bob ) ( ) ( ) false false 0 ( ) false ) ")
            .await;
        client
            .expect("( ( ( 6:/trunk A ( ) ( dir false false ) ) ( 12:/trunk/a.txt A ( ) ( file true false ) ) ) 1 ( 5:alice ) ( ) ( ) false false 0 ( ) false ) ")
            .await;
        client.expect("done ( success ( ) ) ").await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_log_limit_and_path_filter() {
        let (mut client, handle) = connect(context(seeded())).await;
        client
            .send("( log ( ( 5:a.txt ) ( 0 ) ( 3 ) false false 1 false all-revprops ( ) ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        // Oldest first, capped at one entry, no changed paths requested.
        client.expect("( ( ) 1 ( 5:alice ) ( ").await;
        let rest = client.finish().await;
        assert!(
            rest.ends_with("( 6:layout ) false false 0 ( ) false ) done ( success ( ) ) "),
            "{rest}"
        );
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_log_of_missing_path_fails() {
        let (mut client, handle) = connect(context(seeded())).await;
        client
            .send("( log ( ( 4:nope ) ( 3 ) ( 1 ) false false 0 false ) ) ( get-latest-rev ( ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        assert_eq!(client.failure_code().await, 160013);
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( 3 ) ) ").await;
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_change_rev_prop() {
        let (mut client, handle) = start(context(seeded()));
        client.expect(GREETING).await;
        client
            .send("( 2 ( ) 20:svn://localhost/repo 1:x ( ) ) ( PLAIN ( 13:\0alice\0secret ) ) ")
            .await;
        client.expect(MECHANISMS).await;
        client.expect("( success ( ) ) ").await;
        client.expect(ANNOUNCEMENT).await;

        client
            // Expected old value does not match "edit".
            .send("( change-rev-prop2 ( 2 7:svn:log ( 5:fixed ) ( false 3:old ) ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        assert_eq!(client.failure_code().await, 160024);

        client
            .send("( change-rev-prop2 ( 2 7:svn:log ( 5:fixed ) ( false 4:edit ) ) ) ( rev-prop ( 2 7:svn:log ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( ( 5:fixed ) ) ) ").await;

        client
            // Without a value the property is deleted.
            .send("( change-rev-prop ( 2 7:svn:log ) ) ( rev-prop ( 2 7:svn:log ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( ) ) ").await;
        client.expect(AUTH_REQUEST).await;
        client.expect("( success ( ( ) ) ) ").await;

        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_anonymous_cannot_change_rev_props() {
        let (mut client, handle) = connect(context(seeded())).await;
        client
            .send("( change-rev-prop ( 1 7:svn:log 1:x ) ) ")
            .await;
        client.expect(AUTH_REQUEST).await;
        assert_eq!(client.failure_code().await, 170001);
        assert_eq!(client.finish().await, "");
        assert!(handle.await.unwrap().is_ok());
    }
}
