//! # Lifecycle
//!
//! The single authority for "where is this project".
//!
//! ```text
//! Level(0) ──► Level(1) ──► … ──► Level(N-1) ──► AwaitingVerification ──► Verified ──► Invoiced
//!                                     └───────────────────────────────────►┘
//! ```
//!
//! [`ProjectPhase::of`] derives the phase from the stored record, so the
//! level-advancement path and the verification/settlement path can never
//! disagree about whether a project is done.  A project whose incentives
//! were settled before its last level was advanced jumps from `Level(N-1)`
//! straight to `Verified`.
//!
//! Level advancement is strictly linear: no skipping, no rollback.  The
//! stored index is moved with a compare-and-set so concurrent advances on
//! the same project cannot both win.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::errors::{Result, WorkflowError};
use crate::model::{Actor, Project, ProjectPatch, ProjectStatus};
use crate::store::{bounded, ProjectStore, TaskFilter, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    /// Work is open at this level.
    Level(usize),
    /// Every level has been passed; incentives are not yet settled.
    AwaitingVerification,
    Verified,
    Invoiced,
}

impl ProjectPhase {
    pub fn of(project: &Project) -> Self {
        let levels = project.level_count();
        if project.current_level_index < levels {
            Self::Level(project.current_level_index)
        } else if project.invoiced_at.is_some() {
            Self::Invoiced
        } else if project.verified_at.is_some() {
            Self::Verified
        } else {
            Self::AwaitingVerification
        }
    }

}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(i) => write!(f, "level-{i}"),
            Self::AwaitingVerification => f.write_str("awaiting-verification"),
            Self::Verified => f.write_str("verified"),
            Self::Invoiced => f.write_str("invoiced"),
        }
    }
}

/// Whether `from → to` is an allowed step for a project with `levels` levels.
pub fn is_valid_transition(from: ProjectPhase, to: ProjectPhase, levels: usize) -> bool {
    use ProjectPhase::*;
    match (from, to) {
        (Level(i), Level(j)) => j == i + 1 && j < levels,
        (Level(i), AwaitingVerification) | (Level(i), Verified) => i + 1 == levels,
        (AwaitingVerification, Verified) => true,
        (Verified, Invoiced) => true,
        _ => false,
    }
}

/// Result of a successful [`LevelAdvancement::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum AdvanceOutcome {
    /// Moved to the next level.
    Advanced { level_index: usize },
    /// The last level was passed; the project is completed.
    ReadyForInvoice,
}

pub struct LevelAdvancement {
    projects: Arc<dyn ProjectStore>,
    tasks: Arc<dyn TaskStore>,
    store_timeout: Duration,
}

impl LevelAdvancement {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        tasks: Arc<dyn TaskStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            projects,
            tasks,
            store_timeout,
        }
    }

    async fn load(&self, project_id: &str) -> Result<Project> {
        bounded(self.store_timeout, "project lookup", self.projects.get(project_id))
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", project_id))
    }

    /// Move `project_id` past its current level.
    ///
    /// `actor` must be an admin, a manager, or the user owning the current
    /// level, and every non-deleted task at that level must be completed.
    pub async fn advance(&self, project_id: &str, actor: &Actor) -> Result<AdvanceOutcome> {
        let project = self.load(project_id).await?;
        let from = ProjectPhase::of(&project);

        let Some(owner) = project.current_assignment() else {
            return Err(WorkflowError::InvalidTransition {
                from: from.to_string(),
                to: "next level".to_string(),
            });
        };
        let level = project.current_level_index;

        if !actor.role.is_privileged() && actor.user_id != owner.user_id {
            return Err(WorkflowError::Unauthorized(format!(
                "level {level} of project {project_id} belongs to {}",
                owner.user_id
            )));
        }

        let pending = bounded(
            self.store_timeout,
            "task count",
            self.tasks.count(&TaskFilter::open_at_level(project_id, level)),
        )
        .await?;
        if pending > 0 {
            return Err(WorkflowError::IncompleteLevel { pending });
        }

        let next = level + 1;
        let completes = next >= project.level_count();
        let to = if !completes {
            ProjectPhase::Level(next)
        } else if project.verified_at.is_some() {
            ProjectPhase::Verified
        } else {
            ProjectPhase::AwaitingVerification
        };
        if !is_valid_transition(from, to, project.level_count()) {
            return Err(WorkflowError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let patch = ProjectPatch {
            current_level_index: Some(next),
            status: completes.then_some(ProjectStatus::Completed),
            expected_level_index: Some(level),
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
                "project {project_id} moved past level {level} concurrently"
            )));
        }

        info!(project_id, actor = %actor.user_id, "Project advanced {from} → {to}");
        Ok(if completes {
            AdvanceOutcome::ReadyForInvoice
        } else {
            AdvanceOutcome::Advanced { level_index: next }
        })
    }

    /// Record that a verified project has been invoiced.
    pub async fn mark_invoiced(&self, project_id: &str, actor: &Actor) -> Result<ProjectPhase> {
        if !actor.role.is_privileged() {
            return Err(WorkflowError::Unauthorized(
                "only admins and managers may invoice a project".to_string(),
            ));
        }

        let project = self.load(project_id).await?;
        let from = ProjectPhase::of(&project);
        let to = ProjectPhase::Invoiced;
        if !is_valid_transition(from, to, project.level_count()) {
            return Err(WorkflowError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let patch = ProjectPatch {
            invoiced_at: Some(chrono::Utc::now().timestamp()),
            expected_level_index: Some(project.current_level_index),
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
                "project {project_id} changed while being invoiced"
            )));
        }

        info!(project_id, actor = %actor.user_id, "Project invoiced");
        Ok(to)
    }
}
