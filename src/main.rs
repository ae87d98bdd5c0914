//! Mines Fair Server
//!
//! Serves the commit-reveal ledger over WebSocket.
//! Records go to a journal file when `MINES_JOURNAL_PATH` is set.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mines_fair::{
    network::{GameServer, ServerConfig},
    CommitRevealEngine, GameStore, JournalStore, MemoryStore, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Mines Fair Server v{}", VERSION);

    let config = ServerConfig::from_env().context("reading configuration")?;

    match config.journal_path.clone() {
        Some(path) => {
            let store = JournalStore::open(&path)
                .with_context(|| format!("opening journal {}", path.display()))?;
            serve(config, store).await
        }
        None => {
            warn!("MINES_JOURNAL_PATH not set: records are kept in memory only");
            serve(config, MemoryStore::new()).await
        }
    }
}

async fn serve<S: GameStore + 'static>(config: ServerConfig, store: S) -> Result<()> {
    info!("Loaded {} game records", store.len());

    let server = Arc::new(GameServer::new(config, Arc::new(CommitRevealEngine::new(store))));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;

    let engine = server.engine();
    info!(
        "Stopped with {} records, {} events, {} rejected reveals",
        engine.store().len(),
        engine.events().len(),
        engine.seed_mismatch_count()
    );
    Ok(())
}
