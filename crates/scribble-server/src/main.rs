mod connection;
mod directory;
mod handler;
mod player;
mod room;
mod server;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use scribble_common::phase::PhaseTimings;
use scribble_common::words::{WordList, WordSource};

use crate::directory::RoomDirectory;
use crate::server::ServerState;

/// Scribble Server - Multiplayer draw-and-guess game server
#[derive(Parser, Debug)]
#[command(name = "scribble-server", version, about)]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:8082")]
    bind: String,

    /// Maximum simultaneous connections allowed
    #[arg(short, long, default_value_t = 100)]
    max_connections: usize,

    /// Newline-separated word list; lines starting with '#' are skipped
    #[arg(short, long)]
    words: Option<PathBuf>,

    /// Length of a drawing round in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    round_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribble_server=debug,scribble_common=debug".into()),
        )
        .init();

    let args = Args::parse();

    let addr: SocketAddr = args.bind.parse()?;

    let words: Arc<dyn WordSource> = match &args.words {
        Some(path) => {
            let list = WordList::from_file(path)?;
            tracing::info!("Loaded {} words from {}", list.len(), path.display());
            Arc::new(list)
        }
        None => Arc::new(WordList::default()),
    };
    let timings = PhaseTimings {
        game_running: Duration::from_secs(args.round_secs),
        ..PhaseTimings::default()
    };

    tracing::info!(
        "Starting scribble server on {} (max {} connections, {}s rounds)",
        addr,
        args.max_connections,
        args.round_secs
    );
    let state = ServerState::new(RoomDirectory::new(timings, words), args.max_connections);
    server::run(addr, state).await
}
