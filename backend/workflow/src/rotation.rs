//! Verifier selection.
//!
//! Eligibility is hard-scoped to the project's departments and never
//! includes anyone already involved in the project.  Within that scope,
//! flagged verification staff (tier 1) are always preferred over the rest
//! of the department (tier 2); there is no cross-department fallback.
//!
//! Among eligible candidates the selector avoids repeating the project's
//! previous verifier when it can, and otherwise walks a store-owned
//! round-robin cursor.  With [`RotationScope::Global`] that cursor is shared
//! by every project, so the walk is only fair across calls that see the
//! same candidate list; [`RotationScope::Department`] keeps one cursor per
//! department set.
//!
//! Choosing a verifier leaves the rotation state untouched; the cursor and
//! the per-project history only move once the caller commits the choice.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::RotationScope;
use crate::errors::{Result, WorkflowError};
use crate::model::{Project, Staff};
use crate::store::{bounded, ProjectStore, RotationStore, StaffDirectory, StaffFilter, TaskFilter, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// In-department staff flagged for verification.
    VerificationStaff,
    /// Any other in-department staff.
    Department,
}

/// The candidates of the first non-empty tier, in directory order.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePool<'a> {
    pub tier: Tier,
    pub candidates: Vec<&'a Staff>,
}

/// Departments a verifier may come from: the project's own department when
/// set, otherwise the distinct departments of its team.
pub fn project_departments(project: &Project) -> BTreeSet<String> {
    match &project.department {
        Some(department) => BTreeSet::from([department.clone()]),
        None => project
            .team
            .iter()
            .filter_map(|member| member.department.clone())
            .collect(),
    }
}

/// Split `staff` into tiers and return the first non-empty one.
pub fn eligible_candidates<'a>(
    staff: &'a [Staff],
    departments: &BTreeSet<String>,
    excluded: &HashSet<String>,
) -> Option<CandidatePool<'a>> {
    let in_scope: Vec<&Staff> = staff
        .iter()
        .filter(|s| s.active)
        .filter(|s| s.department.as_ref().is_some_and(|d| departments.contains(d)))
        .filter(|s| !excluded.contains(&s.id))
        .collect();

    let flagged: Vec<&Staff> = in_scope
        .iter()
        .copied()
        .filter(|s| s.verification_staff)
        .collect();

    if !flagged.is_empty() {
        Some(CandidatePool {
            tier: Tier::VerificationStaff,
            candidates: flagged,
        })
    } else if !in_scope.is_empty() {
        Some(CandidatePool {
            tier: Tier::Department,
            candidates: in_scope,
        })
    } else {
        None
    }
}

/// Key of the rotation cursor used for a department set.
pub fn scope_key(scope: RotationScope, departments: &BTreeSet<String>) -> String {
    match scope {
        RotationScope::Global => "global".to_string(),
        RotationScope::Department => {
            let joined: Vec<&str> = departments.iter().map(String::as_str).collect();
            format!("dept:{}", joined.join(","))
        }
    }
}

/// A chosen verifier whose rotation bookkeeping is still pending.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub staff: Staff,
    cursor: Option<CursorStep>,
}

#[derive(Debug, Clone, PartialEq)]
struct CursorStep {
    scope: String,
    pool_len: usize,
    index: usize,
}

pub struct StaffRotationSelector {
    projects: Arc<dyn ProjectStore>,
    tasks: Arc<dyn TaskStore>,
    staff: Arc<dyn StaffDirectory>,
    rotation: Arc<dyn RotationStore>,
    scope: RotationScope,
    fetch_limit: u32,
    store_timeout: Duration,
}

impl StaffRotationSelector {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        tasks: Arc<dyn TaskStore>,
        staff: Arc<dyn StaffDirectory>,
        rotation: Arc<dyn RotationStore>,
        scope: RotationScope,
        fetch_limit: u32,
        store_timeout: Duration,
    ) -> Self {
        Self {
            projects,
            tasks,
            staff,
            rotation,
            scope,
            fetch_limit,
            store_timeout,
        }
    }

    /// Users who must not verify `project`: its team and every assignee of
    /// its non-deleted tasks.
    async fn involved_users(&self, project: &Project) -> Result<HashSet<String>> {
        let tasks = bounded(
            self.store_timeout,
            "task lookup",
            self.tasks.find(&TaskFilter::project(&project.id)),
        )
        .await?;

        Ok(tasks
            .into_iter()
            .filter_map(|t| t.assigned_to)
            .chain(project.team.iter().map(|m| m.user_id.clone()))
            .collect())
    }

    /// Pick the verifier for `project_id` and record the pick, or `None`
    /// when nobody is eligible.
    pub async fn select(&self, project_id: &str) -> Result<Option<Staff>> {
        let Some(selection) = self.choose(project_id).await? else {
            return Ok(None);
        };
        self.commit(project_id, &selection).await?;
        Ok(Some(selection.staff))
    }

    /// Pick the verifier for `project_id` without touching the rotation
    /// state.  Call [`Self::commit`] once the assignment has actually been
    /// made.
    pub async fn choose(&self, project_id: &str) -> Result<Option<Selection>> {
        let project = bounded(self.store_timeout, "project lookup", self.projects.get(project_id))
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", project_id))?;

        let departments = project_departments(&project);
        let excluded = self.involved_users(&project).await?;

        let staff = bounded(
            self.store_timeout,
            "staff lookup",
            self.staff.list_active(&StaffFilter {
                limit: Some(self.fetch_limit),
            }),
        )
        .await?;

        let Some(pool) = eligible_candidates(&staff, &departments, &excluded) else {
            debug!(project_id, ?departments, "No eligible verifier in scope");
            return Ok(None);
        };

        let last = bounded(
            self.store_timeout,
            "rotation lookup",
            self.rotation.last_assigned(project_id),
        )
        .await?;
        let selection = self
            .choose_from_pool(&pool, last.as_deref(), scope_key(self.scope, &departments))
            .await?;

        debug!(
            project_id,
            verifier = %selection.staff.id,
            tier = ?pool.tier,
            pool_size = pool.candidates.len(),
            "Verifier selected"
        );
        Ok(Some(selection))
    }

    /// Advance the cursor past `selection` and remember it as the project's
    /// latest verifier.
    pub async fn commit(&self, project_id: &str, selection: &Selection) -> Result<()> {
        if let Some(step) = &selection.cursor {
            let moved = bounded(
                self.store_timeout,
                "rotation update",
                self.rotation
                    .advance_past(&step.scope, step.pool_len, step.index),
            )
            .await?;
            if !moved {
                debug!(scope = %step.scope, "Rotation cursor already moved by another selection");
            }
        }

        bounded(
            self.store_timeout,
            "rotation update",
            self.rotation
                .record_assignment(project_id, &selection.staff.id),
        )
        .await
    }

    async fn choose_from_pool(
        &self,
        pool: &CandidatePool<'_>,
        last: Option<&str>,
        scope: String,
    ) -> Result<Selection> {
        let candidates = &pool.candidates;

        if let Some(last) = last {
            if candidates.len() > 1 {
                if let Some(other) = candidates.iter().find(|c| c.id != last) {
                    return Ok(Selection {
                        staff: (*other).clone(),
                        cursor: None,
                    });
                }
            }
        }

        let index = bounded(
            self.store_timeout,
            "rotation lookup",
            self.rotation.current_position(&scope, candidates.len()),
        )
        .await?;
        Ok(Selection {
            staff: candidates[index].clone(),
            cursor: Some(CursorStep {
                scope,
                pool_len: candidates.len(),
                index,
            }),
        })
    }
}
