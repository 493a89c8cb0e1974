//! Incentive settlement.
//!
//! When a verification task is completed, the verifier is credited a
//! percentage of every completed, paid task of the project.  The ledger is
//! the source of truth for what has been paid: each task can carry at most
//! one `Verification` record, so re-running settlement (a replayed event, a
//! duplicate trigger) only pays tasks that were not settled before.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{Result, WorkflowError};
use crate::lifecycle::ProjectPhase;
use crate::locks::ProjectLocks;
use crate::model::{incentive_for, IncentiveRecord, IncentiveType, ProjectPatch, TaskStatus};
use crate::store::{bounded, Appended, IncentiveLedger, ProjectStore, TaskFilter, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSummary {
    /// Sum credited by this run.
    pub total_verification_incentive: f64,
    /// Tasks credited by this run.
    pub tasks_processed: usize,
    /// Paid tasks skipped because they were settled earlier.
    pub tasks_already_settled: usize,
}

/// Monthly bucket key (`YYYY-MM`) for a settlement at `at`.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

pub struct IncentiveSettlement {
    tasks: Arc<dyn TaskStore>,
    projects: Arc<dyn ProjectStore>,
    ledger: Arc<dyn IncentiveLedger>,
    locks: Arc<ProjectLocks>,
    store_timeout: Duration,
}

impl IncentiveSettlement {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        projects: Arc<dyn ProjectStore>,
        ledger: Arc<dyn IncentiveLedger>,
        locks: Arc<ProjectLocks>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            projects,
            ledger,
            locks,
            store_timeout,
        }
    }

    /// Settle verification incentives for the project of
    /// `verification_task_id`, crediting `completed_by`.
    pub async fn handle_verification_task_completion(
        &self,
        verification_task_id: &str,
        completed_by: &str,
    ) -> Result<SettlementSummary> {
        self.settle_at(verification_task_id, completed_by, Utc::now())
            .await
    }

    pub async fn settle_at(
        &self,
        verification_task_id: &str,
        completed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<SettlementSummary> {
        let verification = bounded(
            self.store_timeout,
            "task lookup",
            self.tasks.get(verification_task_id),
        )
        .await?
        .filter(|t| t.verification_for.is_some() && !t.deleted)
        .ok_or_else(|| WorkflowError::not_found("verification task", verification_task_id))?;

        if verification.status != TaskStatus::Completed {
            return Err(WorkflowError::Conflict(format!(
                "verification task {verification_task_id} is not completed"
            )));
        }

        let project_id = verification.project_id.as_str();
        let _guard = self.locks.lock(project_id).await;

        let completed = bounded(
            self.store_timeout,
            "task lookup",
            self.tasks
                .find(&TaskFilter::work(project_id).with_status(TaskStatus::Completed)),
        )
        .await?;

        let month = month_key(now);
        let mut summary = SettlementSummary {
            total_verification_incentive: 0.0,
            tasks_processed: 0,
            tasks_already_settled: 0,
        };

        for task in completed.iter().filter(|t| t.amount > 0.0) {
            let record = IncentiveRecord {
                user_id: completed_by.to_string(),
                task_id: task.id.clone(),
                project_id: project_id.to_string(),
                verification_task_id: Some(verification.id.clone()),
                task_amount: task.amount,
                incentive_amount: incentive_for(task.amount, task.incentive_percentage()),
                incentive_type: IncentiveType::Verification.as_str().to_string(),
                date: now.timestamp(),
            };

            match bounded(self.store_timeout, "ledger append", self.ledger.append(&record, &month))
                .await?
            {
                Appended::Credited => {
                    summary.total_verification_incentive += record.incentive_amount;
                    summary.tasks_processed += 1;
                }
                Appended::AlreadySettled => summary.tasks_already_settled += 1,
            }
        }

        if summary.tasks_already_settled > 0 {
            warn!(
                project_id,
                skipped = summary.tasks_already_settled,
                "Settlement skipped tasks that were already paid"
            );
        }

        self.stamp_verified(project_id, now).await?;

        info!(
            project_id,
            verifier = completed_by,
            total = summary.total_verification_incentive,
            tasks = summary.tasks_processed,
            "Verification incentives settled"
        );
        Ok(summary)
    }

    async fn stamp_verified(&self, project_id: &str, now: DateTime<Utc>) -> Result<()> {
        let Some(project) =
            bounded(self.store_timeout, "project lookup", self.projects.get(project_id)).await?
        else {
            return Err(WorkflowError::not_found("project", project_id));
        };
        let before = ProjectPhase::of(&project);

        let patch = ProjectPatch {
            verified_at: Some(now.timestamp()),
            ..ProjectPatch::default()
        };
        let applied = bounded(
            self.store_timeout,
            "project update",
            self.projects.update(project_id, &patch),
        )
        .await?;
        if !applied {
            return Err(WorkflowError::Conflict(format!(
                "project {project_id} changed while being verified"
            )));
        }

        if before == ProjectPhase::AwaitingVerification {
            info!(project_id, "Project {before} → {}", ProjectPhase::Verified);
        }
        Ok(())
    }
}
