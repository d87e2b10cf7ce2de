//! svnbridge - Subversion ra_svn server
//!
//! Serves an in-memory repository over `svn://`.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use svnbridge_core::MemoryRepository;
use svnbridge_server::{auth, Config, LocalUserDatabase, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "svnbridge")]
#[command(about = "Subversion svn:// protocol server")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "SVNBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the configuration)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve,

    /// Print the password_sha256 value for a password
    HashPassword {
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::HashPassword { password }) = &cli.command {
        println!("{}", auth::hash_password(password.as_bytes()));
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            config
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(bind) = cli.bind {
        config.network.bind_addr = bind;
    }

    let repository = Arc::new(match &config.repository.uuid {
        Some(uuid) => MemoryRepository::with_uuid(uuid.clone()),
        None => MemoryRepository::new(),
    });
    let users = Arc::new(LocalUserDatabase::new(&config.auth));

    tracing::info!("Starting svnbridge server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Repository path: /{}", config.repository.path.trim_matches('/'));
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!(
        "  Authentication: {} user(s), anonymous {}",
        config.auth.users.len(),
        if config.auth.anonymous { "enabled" } else { "disabled" }
    );

    let server_config = ServerConfig::from(&config);
    let shutdown_timeout = server_config.shutdown_timeout;
    let server = Arc::new(Server::new(server_config, repository, users));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let signal_handle = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown(shutdown_timeout).await;
    });

    // Run server (blocks until shutdown)
    server.run().await?;
    let _ = signal_handle.await;

    tracing::info!("Server stopped");
    Ok(())
}
