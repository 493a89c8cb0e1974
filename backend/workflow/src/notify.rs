//! Outbound notifications.
//!
//! Delivery is best-effort: [`dispatch`] bounds every send with a deadline
//! and only logs failures, so a slow or broken notifier can never undo or
//! delay the work that triggered it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    /// Machine-readable category, e.g. `verification_task_assigned`.
    pub kind: String,
    pub task_id: Option<String>,
    pub project_id: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_to_user(&self, user_id: &str, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log.  Used when no transport is wired in.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_to_user(&self, user_id: &str, notification: &Notification) -> anyhow::Result<()> {
        info!(
            user_id,
            kind = %notification.kind,
            payload = %serde_json::to_string(notification)?,
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Send `notification` to `user_id`, giving up after `limit`.
///
/// Returns `true` when the notifier reported success.
pub async fn dispatch(
    notifier: &dyn Notifier,
    user_id: &str,
    notification: &Notification,
    limit: Duration,
) -> bool {
    match tokio::time::timeout(limit, notifier.send_to_user(user_id, notification)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(user_id, "Notification failed: {e:#}");
            false
        }
        Err(_) => {
            warn!(user_id, "Notification timed out after {limit:?}");
            false
        }
    }
}
