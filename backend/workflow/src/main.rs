//! Workflow service entry point.
//!
//! Applies migrations and runs the outbox worker that replays task
//! completions into the workflow until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use workflow::db::{self, SqliteStore};
use workflow::notify::TracingNotifier;
use workflow::worker::{self, WorkerState};
use workflow::{Collaborators, Config, Workflow};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    let store = SqliteStore::new(pool);

    let workflow = Arc::new(Workflow::new(
        Collaborators::sqlite(store.clone(), Arc::new(TracingNotifier)),
        &config,
    ));

    let cancel = CancellationToken::new();
    let worker_state = Arc::new(WorkerState {
        store,
        workflow,
        config: config.clone(),
    });
    let handle = tokio::spawn(worker::run(worker_state, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();
    handle.await?;

    Ok(())
}
