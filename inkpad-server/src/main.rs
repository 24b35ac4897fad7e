//! Inkpad sync server binary.
//!
//! Serves document sessions and requests over WebSocket. Data lives in
//! RocksDB under `--data-dir`; without it everything stays in memory.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use inkpad_collab::server::{ServerConfig, SyncServer};

/// Server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "inkpad-server")]
#[command(about = "Real-time collaborative document server")]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "INKPAD_BIND", default_value = "127.0.0.1:9090")]
    bind: String,

    /// RocksDB directory (in-memory when omitted)
    #[arg(short, long, env = "INKPAD_DATA_DIR", value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Maximum concurrent sessions per document
    #[arg(long, env = "INKPAD_MAX_SESSIONS", default_value_t = 100)]
    max_sessions: usize,

    /// Events buffered per session before deliveries to it are dropped
    #[arg(long, env = "INKPAD_EVENT_QUEUE", default_value_t = 256)]
    event_queue: usize,

    /// Days an invitation stays acceptable
    #[arg(long, env = "INKPAD_INVITATION_TTL_DAYS", default_value_t = 7)]
    invitation_ttl_days: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            max_sessions_per_document: self.max_sessions,
            invitation_ttl: Duration::from_secs(self.invitation_ttl_days * 24 * 60 * 60),
            storage_path: self.data_dir.clone(),
            event_queue_capacity: self.event_queue,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = args.server_config();
    match &config.storage_path {
        Some(path) => log::info!("Storing documents in {}", path.display()),
        None => log::warn!("No data directory given, documents are kept in memory only"),
    }

    let server = SyncServer::new(config)?;
    server.run().await
}
