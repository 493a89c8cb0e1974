//! Fixtures shared by the `test_*` modules.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::Config;
use crate::db::{init_pool, SqliteStore};
use crate::model::{NewProject, NewTask, Role, Staff, TaskStatus};
use crate::notify::{Notification, Notifier};
use crate::store::TaskStore;
use crate::workflow::{Collaborators, Workflow};

/// Captures every notification instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Notification)>>,
}

impl RecordingNotifier {
    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(user, _)| user.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_to_user(&self, user_id: &str, notification: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), notification.clone()));
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send_to_user(&self, _: &str, _: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("notification transport unavailable")
    }
}

pub async fn memory_store() -> SqliteStore {
    let pool = init_pool("sqlite::memory:", 1).await.unwrap();
    SqliteStore::new(pool)
}

pub async fn setup() -> (SqliteStore, Workflow, Arc<RecordingNotifier>) {
    setup_with(Config::default()).await
}

pub async fn setup_with(config: Config) -> (SqliteStore, Workflow, Arc<RecordingNotifier>) {
    let store = memory_store().await;
    let notifier = Arc::new(RecordingNotifier::default());
    let workflow = Workflow::new(Collaborators::sqlite(store.clone(), notifier.clone()), &config);
    (store, workflow, notifier)
}

pub async fn add_user(store: &SqliteStore, id: &str, department: Option<&str>, verification: bool) {
    store
        .upsert_user(&Staff {
            id: id.to_string(),
            name: format!("User {id}"),
            department: department.map(str::to_string),
            role: Role::Staff,
            verification_staff: verification,
            active: true,
        })
        .await
        .unwrap();
}

pub async fn add_project(
    store: &SqliteStore,
    id: &str,
    department: Option<&str>,
    levels: &[(&str, &str)],
    team: &[&str],
) {
    store
        .insert_project(&NewProject {
            id: id.to_string(),
            name: format!("Project {id}"),
            department: department.map(str::to_string),
            levels: levels
                .iter()
                .map(|(d, u)| (d.to_string(), u.to_string()))
                .collect(),
            team: team.iter().map(|u| u.to_string()).collect(),
        })
        .await
        .unwrap();
}

/// Insert an ordinary task and return its id.
pub async fn add_task(
    store: &SqliteStore,
    project_id: &str,
    level_index: usize,
    status: TaskStatus,
    assigned_to: Option<&str>,
) -> String {
    add_paid_task(store, project_id, level_index, status, assigned_to, 0.0, None).await
}

pub async fn add_paid_task(
    store: &SqliteStore,
    project_id: &str,
    level_index: usize,
    status: TaskStatus,
    assigned_to: Option<&str>,
    amount: f64,
    percentage: Option<f64>,
) -> String {
    let mut task = NewTask::work(project_id, "work item", level_index);
    task.status = status;
    task.assigned_to = assigned_to.map(str::to_string);
    task.amount = amount;
    task.verification_incentive_percentage = percentage;
    let created = TaskStore::create(store, &task).await.unwrap().unwrap();
    created.id
}
