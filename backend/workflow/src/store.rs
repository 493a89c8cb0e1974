//! Collaborator interfaces consumed by the workflow core.
//!
//! The surrounding CRUD layer owns these records; the core only needs the
//! narrow slice of operations below.  [`crate::db::SqliteStore`] implements
//! all of them.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{Result, WorkflowError};
use crate::model::{
    IncentiveRecord, NewTask, Project, ProjectPatch, Staff, Task, TaskKind, TaskStatus,
};

/// Query over non-deleted tasks.  Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub level_index: Option<usize>,
    pub status: Option<TaskStatus>,
    pub status_not: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
}

impl TaskFilter {
    pub fn project(project_id: &str) -> Self {
        Self {
            project_id: Some(project_id.to_string()),
            ..Self::default()
        }
    }

    /// Ordinary tasks of `project_id` only.
    pub fn work(project_id: &str) -> Self {
        Self {
            kind: Some(TaskKind::Work),
            ..Self::project(project_id)
        }
    }

    /// Ordinary tasks at `level_index` that are not yet completed.
    pub fn open_at_level(project_id: &str, level_index: usize) -> Self {
        Self {
            level_index: Some(level_index),
            status_not: Some(TaskStatus::Completed),
            ..Self::work(project_id)
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_status_not(mut self, status: TaskStatus) -> Self {
        self.status_not = Some(status);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaffFilter {
    /// Maximum rows returned; `None` means unbounded.
    pub limit: Option<u32>,
}

/// The outcome of an idempotent ledger append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// The record was written and the user's monthly bucket credited.
    Credited,
    /// A record for the same task and incentive type already existed.
    AlreadySettled,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    async fn count(&self, filter: &TaskFilter) -> Result<i64>;

    /// Insert `task`.  Returns `None` when a live verification task already
    /// holds the same `verification_for` claim; nothing is written in that
    /// case.  Every other constraint violation is an error.
    async fn create(&self, task: &NewTask) -> Result<Option<Task>>;

    /// Set the status of a task and record the change in the event outbox.
    async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        actor_id: &str,
        actor_role: &str,
    ) -> Result<Option<Task>>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<Option<Project>>;

    /// Apply `patch`.  Returns `false` when the project is missing or the
    /// patch's compare-and-set guard did not match.
    async fn update(&self, project_id: &str, patch: &ProjectPatch) -> Result<bool>;
}

#[async_trait]
pub trait StaffDirectory: Send + Sync {
    /// Active users matching `filter`, in directory order.
    async fn list_active(&self, filter: &StaffFilter) -> Result<Vec<Staff>>;
}

#[async_trait]
pub trait IncentiveLedger: Send + Sync {
    /// Append `record` and credit `record.user_id`'s bucket for `month`
    /// (`YYYY-MM`) in one transaction.  Appending twice for the same task and
    /// incentive type credits once.
    async fn append(&self, record: &IncentiveRecord, month: &str) -> Result<Appended>;

    async fn records_for_project(&self, project_id: &str) -> Result<Vec<IncentiveRecord>>;

    async fn monthly_total(&self, user_id: &str, month: &str) -> Result<f64>;
}

/// Store-owned verifier rotation state.
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Index the cursor for `scope` points at, reduced modulo `pool_len`.
    /// A scope that was never advanced points at 0.
    async fn current_position(&self, scope: &str, pool_len: usize) -> Result<usize>;

    /// Move the cursor for `scope` one past `index`, but only if it still
    /// points at `index`.  Returns `false` when another selection moved it
    /// first.
    async fn advance_past(&self, scope: &str, pool_len: usize, index: usize) -> Result<bool>;

    async fn last_assigned(&self, project_id: &str) -> Result<Option<String>>;

    async fn record_assignment(&self, project_id: &str, user_id: &str) -> Result<()>;
}

/// Run a store call under a deadline.
pub async fn bounded<T, F>(limit: Duration, what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| WorkflowError::Timeout(what))?
}
