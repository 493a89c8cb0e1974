//! # Model
//!
//! Records shared by every part of the workflow core.
//!
//! ## Projects and levels
//!
//! A [`Project`] is split into ordered levels, one [`LevelAssignment`] per
//! level.  `level_index` is dense (`0..N`) and matches the position in
//! [`Project::assigned_to`].  `current_level_index` only ever grows and may
//! equal `N` once the last level has been passed.
//!
//! ## Tasks
//!
//! Ordinary tasks are owned by the surrounding CRUD layer.  The one task the
//! core creates itself is the verification task, which carries
//! `verification_for = Some(project_id)` and no level.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, WorkflowError};

/// Display title of the synthetic verification task.
pub const VERIFICATION_TASK_TITLE: &str = "Project Verification Task";

/// Percentage applied when a task carries no explicit verification incentive.
pub const DEFAULT_VERIFICATION_INCENTIVE_PERCENTAGE: f64 = 1.0;

// ─────────────────────────────────────────────────────────
// Actors
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Staff => "staff",
        }
    }

    /// Unknown role strings degrade to `Staff`, the least privileged role.
    pub fn from_db(raw: &str) -> Self {
        match raw {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            _ => Self::Staff,
        }
    }

    /// Admins and managers may act on any level of any project.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn staff(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Staff)
    }
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn from_db(raw: &str) -> Result<Self> {
        match raw {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(WorkflowError::Corrupt(format!(
                "unknown project status `{other}`"
            ))),
        }
    }
}

/// The department/user pair that owns one level of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelAssignment {
    pub department: String,
    pub user_id: String,
    pub level_index: usize,
}

/// A user involved in a project, with their department (if any).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Owning department; when absent the team's departments are used.
    pub department: Option<String>,
    pub assigned_to: Vec<LevelAssignment>,
    pub current_level_index: usize,
    pub status: ProjectStatus,
    pub team: Vec<TeamMember>,
    /// Unix seconds at which verification incentives were settled.
    pub verified_at: Option<i64>,
    pub invoiced_at: Option<i64>,
}

impl Project {
    pub fn level_count(&self) -> usize {
        self.assigned_to.len()
    }

    /// The assignment that owns the current level, if a level is still open.
    pub fn current_assignment(&self) -> Option<&LevelAssignment> {
        self.assigned_to.get(self.current_level_index)
    }
}

/// Input for registering a project.  Levels are numbered by position.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub id: String,
    pub name: String,
    pub department: Option<String>,
    /// `(department, user_id)` per level, in order.
    pub levels: Vec<(String, String)>,
    pub team: Vec<String>,
}

/// Partial update applied by [`crate::store::ProjectStore::update`].
///
/// `expected_level_index` turns the update into a compare-and-set: it only
/// applies while the stored index still equals the expected value.
/// Timestamps are write-once; an already stamped value is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    pub current_level_index: Option<usize>,
    pub status: Option<ProjectStatus>,
    pub verified_at: Option<i64>,
    pub invoiced_at: Option<i64>,
    pub expected_level_index: Option<usize>,
}

// ─────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
        }
    }

    pub fn from_db(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(WorkflowError::Corrupt(format!(
                "unknown task status `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// A task created by the CRUD layer and bound to a level.
    Work,
    /// The synthetic per-project verification task.
    Verification,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Verification => "verification",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub level_index: Option<usize>,
    pub department: Option<String>,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub priority: String,
    pub amount: f64,
    pub verification_incentive_percentage: Option<f64>,
    pub due_date: Option<i64>,
    /// Set (to the project id) only on the verification task.
    pub verification_for: Option<String>,
    pub created_by: Option<String>,
    pub deleted: bool,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        if self.verification_for.is_some() {
            TaskKind::Verification
        } else {
            TaskKind::Work
        }
    }

    pub fn incentive_percentage(&self) -> f64 {
        self.verification_incentive_percentage
            .unwrap_or(DEFAULT_VERIFICATION_INCENTIVE_PERCENTAGE)
    }
}

/// Input for [`crate::store::TaskStore::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub level_index: Option<usize>,
    pub department: Option<String>,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub priority: String,
    pub amount: f64,
    pub verification_incentive_percentage: Option<f64>,
    pub due_date: Option<i64>,
    pub verification_for: Option<String>,
    pub created_by: Option<String>,
}

impl NewTask {
    /// An ordinary pending task at `level_index` with a fresh id.
    pub fn work(project_id: impl Into<String>, title: impl Into<String>, level_index: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            title: title.into(),
            level_index: Some(level_index),
            department: None,
            assigned_to: None,
            status: TaskStatus::Pending,
            priority: "medium".to_string(),
            amount: 0.0,
            verification_incentive_percentage: None,
            due_date: None,
            verification_for: None,
            created_by: None,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Staff
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub department: Option<String>,
    pub role: Role,
    pub verification_staff: bool,
    pub active: bool,
}

// ─────────────────────────────────────────────────────────
// Incentives
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncentiveType {
    Verification,
}

impl IncentiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "Verification",
        }
    }
}

/// One ledger entry.  `date` is the settlement time in unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IncentiveRecord {
    pub user_id: String,
    pub task_id: String,
    pub project_id: String,
    pub verification_task_id: Option<String>,
    pub task_amount: f64,
    pub incentive_amount: f64,
    pub incentive_type: String,
    pub date: i64,
}

/// `amount * percentage / 100`.  Stored exactly; any rounding is a display
/// concern.
pub fn incentive_for(amount: f64, percentage: f64) -> f64 {
    amount * percentage / 100.0
}
