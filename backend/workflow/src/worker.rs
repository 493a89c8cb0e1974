//! Long-running background task that replays the task status outbox.
//!
//! Every status change committed through [`crate::store::TaskStore::update_status`]
//! leaves a row in `task_events`.  The worker walks those rows in id order
//! and re-runs the completion continuation for each `completed` event, so
//! continuations lost to a crash (or written by another process) still
//! happen.  Continuations are idempotent, which makes replaying an event
//! that was already handled inline harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::SqliteStore;
use crate::errors::Result;
use crate::workflow::Workflow;

pub struct WorkerState {
    pub store: SqliteStore,
    pub workflow: Arc<Workflow>,
    pub config: Config,
}

/// Poll until `cancel` fires.
pub async fn run(state: Arc<WorkerState>, cancel: CancellationToken) {
    let cursor = state.store.get_worker_cursor().await.unwrap_or(0);
    info!("Outbox worker starting after event {cursor}");

    let interval = Duration::from_secs(state.config.poll_interval_secs);
    loop {
        match poll_once(&state).await {
            Ok(0) => {}
            Ok(replayed) => info!("Replayed {replayed} task events"),
            Err(e) => error!("Outbox poll error: {e}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Outbox worker stopped");
}

/// Perform a single poll iteration.
///
/// Returns the number of events read.
pub async fn poll_once(state: &WorkerState) -> Result<usize> {
    let cursor = state.store.get_worker_cursor().await?;
    let events = state
        .store
        .task_events_after(cursor, state.config.outbox_batch_size)
        .await?;

    let Some(last) = events.last().map(|e| e.id) else {
        return Ok(0);
    };

    for record in &events {
        let event = match record.decode() {
            Ok(event) => event,
            Err(e) => {
                warn!(event_id = record.id, "Skipping undecodable task event: {e}");
                continue;
            }
        };
        if event.is_completion() {
            state
                .workflow
                .on_task_completed(&event.task_id, &event.actor)
                .await;
        }
    }

    // Persist the cursor so restarts resume after the last replayed event.
    state.store.save_worker_cursor(last).await?;
    Ok(events.len())
}
