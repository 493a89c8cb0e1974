//! Verification task factory.
//!
//! Once every ordinary task of a project is completed, exactly one
//! verification task is created and handed to a verifier picked by the
//! [`StaffRotationSelector`].  Uniqueness rests on the store: the task
//! carries `verification_for = project_id` under a unique index, so the
//! insert itself is the claim.  The per-project lock only keeps this
//! process from racing itself into needless selections.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::{Result, WorkflowError};
use crate::locks::ProjectLocks;
use crate::model::{NewTask, Task, TaskKind, TaskStatus, VERIFICATION_TASK_TITLE};
use crate::notify::{dispatch, Notification, Notifier};
use crate::rotation::StaffRotationSelector;
use crate::store::{bounded, ProjectStore, TaskFilter, TaskStore};

pub struct VerificationTaskFactory {
    tasks: Arc<dyn TaskStore>,
    projects: Arc<dyn ProjectStore>,
    selector: Arc<StaffRotationSelector>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<ProjectLocks>,
    due_days: i64,
    notify_timeout: Duration,
    store_timeout: Duration,
}

impl VerificationTaskFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        projects: Arc<dyn ProjectStore>,
        selector: Arc<StaffRotationSelector>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<ProjectLocks>,
        due_days: i64,
        notify_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            projects,
            selector,
            notifier,
            locks,
            due_days,
            notify_timeout,
            store_timeout,
        }
    }

    /// `true` iff the project has ordinary tasks and all of them are completed.
    pub async fn all_tasks_completed(&self, project_id: &str) -> Result<bool> {
        let total = bounded(
            self.store_timeout,
            "task count",
            self.tasks.count(&TaskFilter::work(project_id)),
        )
        .await?;
        if total == 0 {
            return Ok(false);
        }

        let open = bounded(
            self.store_timeout,
            "task count",
            self.tasks
                .count(&TaskFilter::work(project_id).with_status_not(TaskStatus::Completed)),
        )
        .await?;
        Ok(open == 0)
    }

    pub async fn verification_task_exists(&self, project_id: &str) -> Result<bool> {
        let filter = TaskFilter {
            kind: Some(TaskKind::Verification),
            ..TaskFilter::project(project_id)
        };
        let count = bounded(self.store_timeout, "task count", self.tasks.count(&filter)).await?;
        Ok(count > 0)
    }

    /// Create the verification task for `project_id`.
    ///
    /// Returns `None` when one already exists or when no verifier is
    /// eligible; the latter leaves the project waiting for a re-trigger.
    pub async fn create_verification_task(
        &self,
        project_id: &str,
        created_by: &str,
    ) -> Result<Option<Task>> {
        let _guard = self.locks.lock(project_id).await;
        self.create_locked(project_id, created_by).await
    }

    /// Continuation of a task completion: create the verification task when
    /// the completed task was the last open one.
    pub async fn handle_task_completion(
        &self,
        project_id: &str,
        created_by: &str,
    ) -> Result<Option<Task>> {
        let _guard = self.locks.lock(project_id).await;
        if !self.all_tasks_completed(project_id).await? {
            return Ok(None);
        }
        self.create_locked(project_id, created_by).await
    }

    async fn create_locked(&self, project_id: &str, created_by: &str) -> Result<Option<Task>> {
        if self.verification_task_exists(project_id).await? {
            return Ok(None);
        }

        let project = bounded(self.store_timeout, "project lookup", self.projects.get(project_id))
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", project_id))?;

        let Some(selection) = self.selector.choose(project_id).await? else {
            warn!(
                project_id,
                "No eligible verification staff; verification deferred until re-triggered"
            );
            return Ok(None);
        };

        let verifier = &selection.staff;

        let due = Utc::now() + chrono::Duration::days(self.due_days);
        let new_task = NewTask {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: VERIFICATION_TASK_TITLE.to_string(),
            level_index: None,
            department: verifier.department.clone(),
            assigned_to: Some(verifier.id.clone()),
            status: TaskStatus::Pending,
            priority: "high".to_string(),
            amount: 0.0,
            verification_incentive_percentage: None,
            due_date: Some(due.timestamp()),
            verification_for: Some(project_id.to_string()),
            created_by: Some(created_by.to_string()),
        };

        let Some(task) = bounded(self.store_timeout, "task insert", self.tasks.create(&new_task)).await?
        else {
            info!(project_id, "Verification task already claimed elsewhere");
            return Ok(None);
        };

        info!(
            project_id,
            task_id = %task.id,
            verifier = %verifier.id,
            "Verification task created"
        );

        if let Err(e) = self.selector.commit(project_id, &selection).await {
            warn!(project_id, "Verifier rotation not recorded: {e}");
        }

        let notification = Notification {
            title: "New Verification Task Assigned".to_string(),
            message: format!(
                "You have been assigned to verify project \"{}\". Due in {} days.",
                project.name, self.due_days
            ),
            kind: "verification_task_assigned".to_string(),
            task_id: Some(task.id.clone()),
            project_id: Some(project_id.to_string()),
        };
        dispatch(self.notifier.as_ref(), &verifier.id, &notification, self.notify_timeout).await;

        Ok(Some(task))
    }
}
