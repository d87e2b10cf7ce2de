//! TCP server implementation.

use crate::auth::UserDatabase;
use crate::config::Config;
use crate::error::ServerError;
use crate::handler::CommandTable;
use crate::session::{Session, SessionContext};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use svnbridge_core::Repository;
use svnbridge_protocol::DEFAULT_PORT;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long shutdown waits for sessions before aborting them.
    pub shutdown_timeout: Duration,
    /// URL path the repository is served under.
    pub repository_path: String,
    /// Authentication realm; defaults to the repository UUID.
    pub realm: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            max_connections: 256,
            shutdown_timeout: Duration::from_secs(10),
            repository_path: String::new(),
            realm: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the URL path the repository is served under.
    pub fn with_repository_path(mut self, path: impl Into<String>) -> Self {
        self.repository_path = svnbridge_core::path::normalize(&path.into());
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            shutdown_timeout: config.network.shutdown_timeout(),
            repository_path: svnbridge_core::path::normalize(&config.repository.path),
            realm: config.repository.realm.clone(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub commands_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// `ra_svn` server for one repository.
pub struct Server {
    config: ServerConfig,
    context: Arc<SessionContext>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    stopping: AtomicBool,
    listener: Mutex<Option<TcpListener>>,
    connections: Arc<Semaphore>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
}

impl Server {
    /// Creates a server with the standard command table.
    pub fn new(
        config: ServerConfig,
        repository: Arc<dyn Repository>,
        users: Arc<dyn UserDatabase>,
    ) -> Self {
        Self::with_commands(config, repository, users, CommandTable::standard())
    }

    /// Creates a server with a custom command table.
    pub fn with_commands(
        config: ServerConfig,
        repository: Arc<dyn Repository>,
        users: Arc<dyn UserDatabase>,
        commands: CommandTable,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let stats = Arc::new(ServerStats::default());
        let realm = config
            .realm
            .clone()
            .unwrap_or_else(|| repository.uuid().to_string());
        let context = Arc::new(SessionContext {
            repository,
            users,
            commands: Arc::new(commands),
            repository_path: config.repository_path.clone(),
            realm,
            stats: stats.clone(),
        });
        Self {
            connections: Arc::new(Semaphore::new(config.max_connections)),
            config,
            context,
            stats,
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            listener: Mutex::new(None),
            workers: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Binds the listening socket ahead of [`run`](Self::run) and returns
    /// the bound address, which is useful with port 0.
    pub async fn bind(&self) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        *self.listener.lock() = Some(listener);
        Ok(addr)
    }

    /// Accepts connections until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(ServerError::ShuttingDown);
        }
        // Subscribe before anything can await so a concurrent shutdown is
        // not missed.
        let mut shutdown_rx = self.shutdown.subscribe();
        let bound = self.listener.lock().take();
        let listener = match bound {
            Some(listener) => listener,
            None => TcpListener::bind(self.config.bind_addr).await?,
        };
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            "Server listening on {} (repository path '/{}')",
            listener.local_addr()?,
            self.config.repository_path
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = self.connections.clone().try_acquire_owned() else {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            };

                            let id = self.stats.connections_total.fetch_add(1, Ordering::Relaxed) + 1;
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let span = tracing::info_span!(
                                "session",
                                id,
                                peer = %addr,
                                user = tracing::field::Empty
                            );
                            let ctx = self.context.clone();
                            let stats = self.stats.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            let mut workers = self.workers.lock().await;
                            if self.stopping.load(Ordering::SeqCst) {
                                self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                break;
                            }
                            while workers.try_join_next().is_some() {}
                            workers.spawn(async move {
                                let _permit = permit;
                                tracing::info!(parent: &span, "Client connected");
                                if let Err(e) = stream.set_nodelay(true) {
                                    tracing::debug!(parent: &span, "set_nodelay failed: {}", e);
                                }
                                let (read, write) = stream.into_split();
                                let session = Session::new(read, write, ctx, span.clone());

                                tokio::select! {
                                    result = session.run() => {
                                        if result.is_err() {
                                            stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                        }
                                    }
                                    _ = conn_shutdown.recv() => {
                                        tracing::debug!(parent: &span, "Session cancelled by shutdown");
                                    }
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!(parent: &span, "Client disconnected");
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stops accepting connections and ends all sessions. Sessions that do
    /// not finish within `timeout` are aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        self.stopping.store(true, Ordering::SeqCst);
        // No receivers just means nothing is running.
        let _ = self.shutdown.send(());

        let mut workers = self.workers.lock().await;
        let drained = tokio::time::timeout(timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "{} sessions still running after {:?}, aborting",
                workers.len(),
                timeout
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
