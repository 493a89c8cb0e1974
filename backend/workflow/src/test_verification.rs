use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::db::SqliteStore;
use crate::errors::{Result, WorkflowError};
use crate::invariants::assert_not_self_verification;
use crate::model::{Actor, NewTask, Task, TaskKind, TaskStatus, VERIFICATION_TASK_TITLE};
use crate::store::{RotationStore, StaffDirectory, StaffFilter, TaskFilter, TaskStore};
use crate::test_support::{
    add_project, add_task, add_user, memory_store, setup, FailingNotifier,
};
use crate::workflow::{Collaborators, Continuation, Workflow};

async fn verification_tasks(store: &crate::db::SqliteStore, project_id: &str) -> Vec<crate::model::Task> {
    TaskStore::find(
        store,
        &TaskFilter {
            kind: Some(TaskKind::Verification),
            ..TaskFilter::project(project_id)
        },
    )
    .await
    .unwrap()
}

/// Project "P" in Audit with three completed tasks and two eligible verifiers.
async fn seed_audit_project(store: &crate::db::SqliteStore) {
    add_user(store, "S1", Some("Audit"), true).await;
    add_user(store, "S2", Some("Audit"), true).await;
    add_user(store, "W1", Some("Audit"), true).await;
    add_project(store, "P", Some("Audit"), &[("Audit", "lead")], &[]).await;
    for _ in 0..3 {
        add_task(store, "P", 0, TaskStatus::Completed, Some("W1")).await;
    }
}

#[tokio::test]
async fn test_verification_task_created_once() {
    let (store, workflow, notifier) = setup().await;
    seed_audit_project(&store).await;

    let task = workflow
        .create_verification_task("P", "admin")
        .await
        .unwrap()
        .expect("verification task");
    let verifier = task.assigned_to.clone().unwrap();
    assert!(verifier == "S1" || verifier == "S2");

    assert_eq!(task.title, VERIFICATION_TASK_TITLE);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, "high");
    assert_eq!(task.verification_for.as_deref(), Some("P"));
    assert_eq!(task.level_index, None);
    let due_in = task.due_date.unwrap() - chrono::Utc::now().timestamp();
    assert!((7 * 86_400 - 60..=7 * 86_400).contains(&due_in));

    assert_eq!(notifier.recipients(), vec![verifier]);

    assert!(workflow
        .create_verification_task("P", "admin")
        .await
        .unwrap()
        .is_none());
    assert_eq!(verification_tasks(&store, "P").await.len(), 1);
    assert_eq!(notifier.recipients().len(), 1);
}

#[tokio::test]
async fn test_concurrent_creation_yields_one_task() {
    let (store, workflow, _) = setup().await;
    seed_audit_project(&store).await;

    let (a, b) = tokio::join!(
        workflow.handle_task_completion("P", "W1"),
        workflow.handle_task_completion("P", "W1"),
    );
    let created = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(created, 1);
    assert_eq!(verification_tasks(&store, "P").await.len(), 1);
}

#[tokio::test]
async fn test_store_rejects_second_claim_for_same_project() {
    let store = memory_store().await;
    add_project(&store, "P", Some("Audit"), &[], &[]).await;

    let claim = |id: &str| NewTask {
        id: id.to_string(),
        title: VERIFICATION_TASK_TITLE.to_string(),
        level_index: None,
        verification_for: Some("P".to_string()),
        ..NewTask::work("P", "", 0)
    };

    assert!(TaskStore::create(&store, &claim("v1")).await.unwrap().is_some());
    assert!(TaskStore::create(&store, &claim("v2")).await.unwrap().is_none());

    // A soft-deleted claim frees the slot.
    assert!(store.soft_delete_task("v1").await.unwrap());
    assert!(TaskStore::create(&store, &claim("v3")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_nothing_created_while_tasks_remain_open() {
    let (store, workflow, _) = setup().await;
    seed_audit_project(&store).await;
    add_task(&store, "P", 0, TaskStatus::InProgress, Some("W1")).await;

    assert!(!workflow.all_tasks_completed("P").await.unwrap());
    assert!(workflow.handle_task_completion("P", "W1").await.unwrap().is_none());
    assert!(verification_tasks(&store, "P").await.is_empty());
}

#[tokio::test]
async fn test_project_without_tasks_is_not_complete() {
    let (store, workflow, _) = setup().await;
    add_user(&store, "S1", Some("Audit"), true).await;
    add_project(&store, "P", Some("Audit"), &[("Audit", "lead")], &[]).await;

    assert!(workflow.handle_task_completion("P", "lead").await.unwrap().is_none());
    assert!(verification_tasks(&store, "P").await.is_empty());
}

#[tokio::test]
async fn test_no_eligible_staff_defers_silently() {
    let (store, workflow, notifier) = setup().await;
    add_user(&store, "X1", Some("Sales"), true).await;
    add_project(&store, "P", Some("Audit"), &[("Audit", "lead")], &[]).await;
    add_task(&store, "P", 0, TaskStatus::Completed, Some("W1")).await;

    assert!(workflow.handle_task_completion("P", "W1").await.unwrap().is_none());
    assert!(verification_tasks(&store, "P").await.is_empty());
    assert!(notifier.recipients().is_empty());

    // A verifier joining later lets a manual re-trigger succeed.
    add_user(&store, "S1", Some("Audit"), false).await;
    let task = workflow.create_verification_task("P", "admin").await.unwrap().unwrap();
    assert_eq!(task.assigned_to.as_deref(), Some("S1"));
}

#[tokio::test]
async fn test_missing_project_is_not_found() {
    let (_store, workflow, _) = setup().await;
    let err = workflow.create_verification_task("ghost", "admin").await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { .. }));
}

#[tokio::test]
async fn test_failed_notification_keeps_the_task() {
    let store = memory_store().await;
    let workflow = Workflow::new(
        Collaborators::sqlite(store.clone(), Arc::new(FailingNotifier)),
        &Config::default(),
    );
    seed_audit_project(&store).await;

    let task = workflow.create_verification_task("P", "admin").await.unwrap();
    assert!(task.is_some());
    assert_eq!(verification_tasks(&store, "P").await.len(), 1);
}

#[tokio::test]
async fn test_verifier_is_never_a_task_assignee() {
    let (store, workflow, _) = setup().await;
    seed_audit_project(&store).await;

    let task = workflow.create_verification_task("P", "admin").await.unwrap().unwrap();
    let verifier_id = task.assigned_to.unwrap();
    let verifier = StaffDirectory::list_active(&store, &StaffFilter::default())
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.id == verifier_id)
        .unwrap();
    assert_not_self_verification(&verifier, &HashSet::from(["W1".to_string()]));
}

#[tokio::test]
async fn test_invalid_task_insert_is_an_error_not_a_lost_claim() {
    let store = memory_store().await;
    add_project(&store, "P", Some("Audit"), &[], &[]).await;

    let mut negative = NewTask::work("P", "refund", 0);
    negative.amount = -5.0;
    let err = TaskStore::create(&store, &negative).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Database(_)));

    let task = NewTask::work("P", "audit ledger", 0);
    assert!(TaskStore::create(&store, &task).await.unwrap().is_some());
    let err = TaskStore::create(&store, &task).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Database(_)));
}

/// Task store whose view of existing verification tasks is always empty,
/// so the factory only learns about an earlier claim from the insert.
struct StaleVerificationView(SqliteStore);

#[async_trait]
impl TaskStore for StaleVerificationView {
    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        TaskStore::get(&self.0, task_id).await
    }

    async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.0.find(filter).await
    }

    async fn count(&self, filter: &TaskFilter) -> Result<i64> {
        if filter.kind == Some(TaskKind::Verification) {
            return Ok(0);
        }
        self.0.count(filter).await
    }

    async fn create(&self, task: &NewTask) -> Result<Option<Task>> {
        self.0.create(task).await
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        actor_id: &str,
        actor_role: &str,
    ) -> Result<Option<Task>> {
        self.0
            .update_status(task_id, status, actor_id, actor_role)
            .await
    }
}

#[tokio::test]
async fn test_lost_claim_leaves_rotation_untouched() {
    let store = memory_store().await;
    let mut collaborators = Collaborators::sqlite(store.clone(), Arc::new(FailingNotifier));
    collaborators.tasks = Arc::new(StaleVerificationView(store.clone()));
    let workflow = Workflow::new(collaborators, &Config::default());

    add_user(&store, "V1", Some("Audit"), true).await;
    add_user(&store, "V2", Some("Audit"), true).await;
    add_project(&store, "P", Some("Audit"), &[], &[]).await;
    add_project(&store, "Q", Some("Audit"), &[], &[]).await;
    let earlier = NewTask {
        title: VERIFICATION_TASK_TITLE.to_string(),
        level_index: None,
        verification_for: Some("P".to_string()),
        ..NewTask::work("P", "", 0)
    };
    TaskStore::create(&store, &earlier).await.unwrap().unwrap();

    assert!(workflow
        .create_verification_task("P", "admin")
        .await
        .unwrap()
        .is_none());
    assert_eq!(verification_tasks(&store, "P").await.len(), 1);
    assert_eq!(store.last_assigned("P").await.unwrap(), None);
    assert_eq!(store.current_position("global", 2).await.unwrap(), 0);

    // The next project still gets the candidate the cursor pointed at.
    let task = workflow.create_verification_task("Q", "admin").await.unwrap().unwrap();
    assert_eq!(task.assigned_to.as_deref(), Some("V1"));
    assert_eq!(store.last_assigned("Q").await.unwrap().as_deref(), Some("V1"));
    assert_eq!(store.current_position("global", 2).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failing_continuation_does_not_fail_status_update() {
    let (store, workflow, notifier) = setup().await;
    add_user(&store, "S1", Some("Audit"), true).await;
    // No project row behind the task, so creating the verification task fails.
    let task_id = add_task(&store, "GHOST", 0, TaskStatus::InProgress, Some("W")).await;

    let (task, continuation) = workflow
        .update_task_status(&task_id, TaskStatus::Completed, &Actor::staff("W"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(continuation, Continuation::Nothing);
    assert!(verification_tasks(&store, "GHOST").await.is_empty());
    assert!(notifier.recipients().is_empty());
}
