use crate::errors::WorkflowError;
use crate::invariants::{assert_level_in_bounds, assert_level_monotonic};
use crate::lifecycle::{AdvanceOutcome, ProjectPhase};
use crate::model::{Actor, ProjectStatus, Role, TaskStatus};
use crate::store::ProjectStore;
use crate::test_support::{add_project, add_task, setup};

#[tokio::test]
async fn test_level_owner_advances_and_loses_control() {
    let (store, workflow, _) = setup().await;
    add_project(&store, "p1", None, &[("deptA", "userA"), ("deptB", "userB")], &[]).await;
    add_task(&store, "p1", 0, TaskStatus::Completed, Some("worker")).await;

    let outcome = workflow
        .advance_project_level("p1", &Actor::staff("userA"))
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::Advanced { level_index: 1 });

    let project = ProjectStore::get(&store, "p1").await.unwrap().unwrap();
    assert_eq!(project.current_level_index, 1);
    assert_level_in_bounds(&project);

    let err = workflow
        .advance_project_level("p1", &Actor::staff("userA"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Unauthorized(_)));
}

#[tokio::test]
async fn test_incomplete_level_blocks_advance() {
    let (store, workflow, _) = setup().await;
    add_project(&store, "p1", None, &[("deptA", "userA"), ("deptB", "userB")], &[]).await;
    add_task(&store, "p1", 0, TaskStatus::Completed, None).await;
    add_task(&store, "p1", 0, TaskStatus::InProgress, None).await;
    add_task(&store, "p1", 0, TaskStatus::Pending, None).await;

    let err = workflow
        .advance_project_level("p1", &Actor::staff("userA"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::IncompleteLevel { pending: 2 }));
    assert!(err.to_string().starts_with("Complete all tasks first"));

    let project = ProjectStore::get(&store, "p1").await.unwrap().unwrap();
    assert_eq!(project.current_level_index, 0);
}

#[tokio::test]
async fn test_deleted_and_other_level_tasks_do_not_block() {
    let (store, workflow, _) = setup().await;
    add_project(&store, "p1", None, &[("deptA", "userA"), ("deptB", "userB")], &[]).await;
    let stale = add_task(&store, "p1", 0, TaskStatus::Pending, None).await;
    add_task(&store, "p1", 1, TaskStatus::Pending, None).await;
    assert!(store.soft_delete_task(&stale).await.unwrap());

    let outcome = workflow
        .advance_project_level("p1", &Actor::staff("userA"))
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::Advanced { level_index: 1 });
}

#[tokio::test]
async fn test_last_level_completes_project() {
    let (store, workflow, _) = setup().await;
    add_project(&store, "p1", None, &[("deptA", "userA"), ("deptB", "userB")], &[]).await;

    let userb = Actor::staff("userB");
    let manager = Actor::new("boss", Role::Manager);

    workflow.advance_project_level("p1", &manager).await.unwrap();
    let outcome = workflow.advance_project_level("p1", &userb).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::ReadyForInvoice);

    let project = ProjectStore::get(&store, "p1").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);
    assert_eq!(project.current_level_index, 2);
    assert_level_in_bounds(&project);
    assert_eq!(
        workflow.project_phase("p1").await.unwrap(),
        ProjectPhase::AwaitingVerification
    );

    let err = workflow.advance_project_level("p1", &manager).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_privileged_roles_may_advance_any_level() {
    let (store, workflow, _) = setup().await;
    add_project(
        &store,
        "p1",
        None,
        &[("deptA", "userA"), ("deptB", "userB"), ("deptC", "userC")],
        &[],
    )
    .await;

    workflow
        .advance_project_level("p1", &Actor::new("root", Role::Admin))
        .await
        .unwrap();
    workflow
        .advance_project_level("p1", &Actor::new("boss", Role::Manager))
        .await
        .unwrap();

    let project = ProjectStore::get(&store, "p1").await.unwrap().unwrap();
    assert_eq!(project.current_level_index, 2);
}

#[tokio::test]
async fn test_missing_project_is_not_found() {
    let (_store, workflow, _) = setup().await;
    let err = workflow
        .advance_project_level("ghost", &Actor::new("root", Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { entity: "project", .. }));
}

#[tokio::test]
async fn test_level_index_is_monotonic_under_concurrent_advances() {
    let (store, workflow, _) = setup().await;
    add_project(
        &store,
        "p1",
        None,
        &[("d", "u0"), ("d", "u1"), ("d", "u2"), ("d", "u3")],
        &[],
    )
    .await;
    let admin = Actor::new("root", Role::Admin);
    let before = ProjectStore::get(&store, "p1").await.unwrap().unwrap();

    let (a, b) = tokio::join!(
        workflow.advance_project_level("p1", &admin),
        workflow.advance_project_level("p1", &admin),
    );
    let succeeded = [&a, &b].iter().filter(|r| r.is_ok()).count();
    for result in [&a, &b] {
        if let Err(e) = result {
            assert!(matches!(e, WorkflowError::Conflict(_)), "unexpected {e}");
        }
    }

    let after = ProjectStore::get(&store, "p1").await.unwrap().unwrap();
    assert_level_monotonic(&before, &after);
    assert_eq!(after.current_level_index, succeeded);
}

#[tokio::test]
async fn test_store_refuses_to_move_level_backwards() {
    let (store, workflow, _) = setup().await;
    add_project(&store, "p1", None, &[("d", "u0"), ("d", "u1")], &[]).await;
    workflow
        .advance_project_level("p1", &Actor::new("root", Role::Admin))
        .await
        .unwrap();

    let rewind = crate::model::ProjectPatch {
        current_level_index: Some(0),
        ..Default::default()
    };
    assert!(!ProjectStore::update(&store, "p1", &rewind).await.unwrap());
    let project = ProjectStore::get(&store, "p1").await.unwrap().unwrap();
    assert_eq!(project.current_level_index, 1);
}
