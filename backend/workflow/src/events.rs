//! Task status events recorded in the outbox by the CRUD layer and replayed
//! by the background worker.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::model::{Actor, Role, TaskStatus};

/// A raw outbox row as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskEventRecord {
    pub id: i64,
    pub task_id: String,
    pub project_id: String,
    pub status: String,
    pub actor_id: String,
    pub actor_role: String,
    pub created_at: i64,
}

/// A decoded status change, ready to be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusChanged {
    pub event_id: i64,
    pub task_id: String,
    pub project_id: String,
    pub status: TaskStatus,
    pub actor: Actor,
}

impl TaskEventRecord {
    pub fn decode(&self) -> Result<TaskStatusChanged> {
        Ok(TaskStatusChanged {
            event_id: self.id,
            task_id: self.task_id.clone(),
            project_id: self.project_id.clone(),
            status: TaskStatus::from_db(&self.status)?,
            actor: Actor::new(self.actor_id.clone(), Role::from_db(&self.actor_role)),
        })
    }
}

impl TaskStatusChanged {
    /// Only transitions into `completed` continue into the workflow.
    pub fn is_completion(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
