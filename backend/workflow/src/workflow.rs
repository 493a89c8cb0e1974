//! Entry points invoked by the surrounding request handlers.
//!
//! Level advancement, invoicing and status updates surface their errors to
//! the caller.  Everything that runs after a task is completed (verification
//! task creation, incentive settlement) is a continuation: its failures are
//! logged and swallowed so they can never fail the status update that
//! triggered them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::config::Config;
use crate::db::SqliteStore;
use crate::errors::{Result, WorkflowError};
use crate::lifecycle::{AdvanceOutcome, LevelAdvancement, ProjectPhase};
use crate::locks::ProjectLocks;
use crate::model::{Actor, Staff, Task, TaskKind, TaskStatus};
use crate::notify::Notifier;
use crate::rotation::StaffRotationSelector;
use crate::settlement::{IncentiveSettlement, SettlementSummary};
use crate::store::{bounded, IncentiveLedger, ProjectStore, RotationStore, StaffDirectory, TaskStore};
use crate::verification::VerificationTaskFactory;

/// The external collaborators the workflow runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub tasks: Arc<dyn TaskStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub staff: Arc<dyn StaffDirectory>,
    pub ledger: Arc<dyn IncentiveLedger>,
    pub rotation: Arc<dyn RotationStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Back every store interface with one SQLite store.
    pub fn sqlite(store: SqliteStore, notifier: Arc<dyn Notifier>) -> Self {
        let store = Arc::new(store);
        Self {
            tasks: store.clone(),
            projects: store.clone(),
            staff: store.clone(),
            ledger: store.clone(),
            rotation: store,
            notifier,
        }
    }
}

/// What a completion continuation ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    /// A verification task was created and assigned.
    VerificationCreated(Task),
    /// Verification incentives were settled.
    Settled(SettlementSummary),
    /// Nothing to do, or the continuation failed (see logs).
    Nothing,
}

pub struct Workflow {
    tasks: Arc<dyn TaskStore>,
    projects: Arc<dyn ProjectStore>,
    levels: LevelAdvancement,
    selector: Arc<StaffRotationSelector>,
    verification: VerificationTaskFactory,
    settlement: IncentiveSettlement,
    store_timeout: Duration,
}

impl Workflow {
    pub fn new(collaborators: Collaborators, config: &Config) -> Self {
        let Collaborators {
            tasks,
            projects,
            staff,
            ledger,
            rotation,
            notifier,
        } = collaborators;
        let locks = Arc::new(ProjectLocks::new());

        let selector = Arc::new(StaffRotationSelector::new(
            projects.clone(),
            tasks.clone(),
            staff,
            rotation,
            config.rotation_scope,
            config.staff_fetch_limit,
            config.store_timeout,
        ));

        Self {
            levels: LevelAdvancement::new(projects.clone(), tasks.clone(), config.store_timeout),
            verification: VerificationTaskFactory::new(
                tasks.clone(),
                projects.clone(),
                selector.clone(),
                notifier,
                locks.clone(),
                config.verification_due_days,
                config.notify_timeout,
                config.store_timeout,
            ),
            settlement: IncentiveSettlement::new(
                tasks.clone(),
                projects.clone(),
                ledger,
                locks,
                config.store_timeout,
            ),
            selector,
            tasks,
            projects,
            store_timeout: config.store_timeout,
        }
    }

    // ─────────────────────────────────────────────────────────
    // Caller-facing operations
    // ─────────────────────────────────────────────────────────

    pub async fn advance_project_level(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> Result<AdvanceOutcome> {
        self.levels.advance(project_id, actor).await
    }

    pub async fn mark_invoiced(&self, project_id: &str, actor: &Actor) -> Result<ProjectPhase> {
        self.levels.mark_invoiced(project_id, actor).await
    }

    pub async fn project_phase(&self, project_id: &str) -> Result<ProjectPhase> {
        let project = bounded(self.store_timeout, "project lookup", self.projects.get(project_id))
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", project_id))?;
        Ok(ProjectPhase::of(&project))
    }

    /// Persist a status change made by `actor` (the assignee, an admin or a
    /// manager) and run the completion continuation when it completes a task.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        actor: &Actor,
    ) -> Result<(Task, Continuation)> {
        let task = bounded(self.store_timeout, "task lookup", self.tasks.get(task_id))
            .await?
            .filter(|t| !t.deleted)
            .ok_or_else(|| WorkflowError::not_found("task", task_id))?;

        if !actor.role.is_privileged() && task.assigned_to.as_deref() != Some(actor.user_id.as_str()) {
            return Err(WorkflowError::Unauthorized(format!(
                "task {task_id} is not assigned to {}",
                actor.user_id
            )));
        }

        let updated = bounded(
            self.store_timeout,
            "task update",
            self.tasks
                .update_status(task_id, status, &actor.user_id, actor.role.as_str()),
        )
        .await?
        .ok_or_else(|| WorkflowError::not_found("task", task_id))?;

        let continuation = if status == TaskStatus::Completed && task.status != status {
            self.on_task_completed(task_id, actor).await
        } else {
            Continuation::Nothing
        };
        Ok((updated, continuation))
    }

    /// Route a completed task to its continuation.  Never fails.
    pub async fn on_task_completed(&self, task_id: &str, actor: &Actor) -> Continuation {
        match self.try_on_task_completed(task_id, actor).await {
            Ok(continuation) => continuation,
            Err(e) => {
                error!(task_id, "Task completion continuation failed: {e}");
                Continuation::Nothing
            }
        }
    }

    async fn try_on_task_completed(&self, task_id: &str, actor: &Actor) -> Result<Continuation> {
        let task = bounded(self.store_timeout, "task lookup", self.tasks.get(task_id))
            .await?
            .ok_or_else(|| WorkflowError::not_found("task", task_id))?;

        if task.deleted || task.status != TaskStatus::Completed {
            debug!(task_id, "Task is no longer completed; nothing to continue");
            return Ok(Continuation::Nothing);
        }

        match task.kind() {
            TaskKind::Verification => {
                let summary = self
                    .settlement
                    .handle_verification_task_completion(task_id, &actor.user_id)
                    .await?;
                Ok(Continuation::Settled(summary))
            }
            TaskKind::Work => Ok(self
                .verification
                .handle_task_completion(&task.project_id, &actor.user_id)
                .await?
                .map(Continuation::VerificationCreated)
                .unwrap_or(Continuation::Nothing)),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Direct access to the components
    // ─────────────────────────────────────────────────────────

    pub async fn all_tasks_completed(&self, project_id: &str) -> Result<bool> {
        self.verification.all_tasks_completed(project_id).await
    }

    pub async fn handle_task_completion(
        &self,
        project_id: &str,
        created_by: &str,
    ) -> Result<Option<Task>> {
        self.verification
            .handle_task_completion(project_id, created_by)
            .await
    }

    pub async fn create_verification_task(
        &self,
        project_id: &str,
        created_by: &str,
    ) -> Result<Option<Task>> {
        self.verification
            .create_verification_task(project_id, created_by)
            .await
    }

    pub async fn handle_verification_task_completion(
        &self,
        verification_task_id: &str,
        completed_by: &str,
    ) -> Result<SettlementSummary> {
        self.settlement
            .handle_verification_task_completion(verification_task_id, completed_by)
            .await
    }

    /// Settlement with an explicit clock; `now` picks the monthly bucket.
    pub async fn settle_at(
        &self,
        verification_task_id: &str,
        completed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<SettlementSummary> {
        self.settlement
            .settle_at(verification_task_id, completed_by, now)
            .await
    }

    pub async fn select_verifier(&self, project_id: &str) -> Result<Option<Staff>> {
        self.selector.select(project_id).await
    }
}
