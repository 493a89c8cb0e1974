//! Database layer: migrations, queries, and the SQLite-backed collaborators.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{Result, WorkflowError};
use crate::events::TaskEventRecord;
use crate::model::{
    IncentiveRecord, LevelAssignment, NewProject, NewTask, Project, ProjectPatch, ProjectStatus,
    Role, Staff, Task, TaskStatus, TeamMember,
};
use crate::store::{
    Appended, IncentiveLedger, ProjectStore, RotationStore, StaffDirectory, StaffFilter,
    TaskFilter, TaskStore,
};

/// Establish a SQLite connection pool and run pending migrations.
///
/// In-memory databases live only as long as their connection, so they are
/// pinned to a single connection that is never recycled.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// SQLite implementation of every collaborator interface.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ─────────────────────────────────────────────────────────
    // Registration (normally done by the CRUD layer)
    // ─────────────────────────────────────────────────────────

    /// Register a project with `current_level_index = 0`.
    pub async fn insert_project(&self, project: &NewProject) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO projects (id, name, department) VALUES (?1, ?2, ?3)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(&project.department)
            .execute(&mut *tx)
            .await?;

        for (index, (department, user_id)) in project.levels.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO project_levels (project_id, level_index, department, user_id)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&project.id)
            .bind(index as i64)
            .bind(department)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        for user_id in &project.team {
            sqlx::query("INSERT OR IGNORE INTO project_team (project_id, user_id) VALUES (?1, ?2)")
                .bind(&project.id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_user(&self, staff: &Staff) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, department, role, verification_staff, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                department = excluded.department,
                role = excluded.role,
                verification_staff = excluded.verification_staff,
                active = excluded.active
            "#,
        )
        .bind(&staff.id)
        .bind(&staff.name)
        .bind(&staff.department)
        .bind(staff.role.as_str())
        .bind(staff.verification_staff)
        .bind(staff.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft-delete a task; it stops counting towards every task query.
    pub async fn soft_delete_task(&self, task_id: &str) -> Result<bool> {
        let rows = sqlx::query("UPDATE tasks SET deleted = 1, updated_at = ?2 WHERE id = ?1")
            .bind(task_id)
            .bind(now_unix())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    // ─────────────────────────────────────────────────────────
    // Outbox helpers
    // ─────────────────────────────────────────────────────────

    /// Task events with an id greater than `after_id`, oldest first.
    pub async fn task_events_after(&self, after_id: i64, limit: u32) -> Result<Vec<TaskEventRecord>> {
        let rows = sqlx::query_as::<_, TaskEventRecord>(
            r#"
            SELECT id, task_id, project_id, status, actor_id, actor_role, created_at
            FROM   task_events
            WHERE  id > ?1
            ORDER  BY id ASC
            LIMIT  ?2
            "#,
        )
        .bind(after_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Read the id of the last replayed event.  Returns `0` when none has been.
    pub async fn get_worker_cursor(&self) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_event_id FROM worker_cursor WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    pub async fn save_worker_cursor(&self, last_event_id: i64) -> Result<()> {
        sqlx::query("UPDATE worker_cursor SET last_event_id = ?1 WHERE id = 1")
            .bind(last_event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

const TASK_COLUMNS: &str = r#"
    id, project_id, title, level_index, department, assigned_to, status, priority,
    amount, verification_incentive_percentage, due_date, verification_for,
    created_by, deleted
"#;

const TASK_FILTER: &str = r#"
    deleted = 0
    AND (?1 IS NULL OR project_id = ?1)
    AND (?2 IS NULL OR level_index = ?2)
    AND (?3 IS NULL OR status = ?3)
    AND (?4 IS NULL OR status != ?4)
    AND (?5 IS NULL
         OR (?5 = 'work' AND verification_for IS NULL)
         OR (?5 = 'verification' AND verification_for IS NOT NULL))
"#;

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    project_id: String,
    title: String,
    level_index: Option<i64>,
    department: Option<String>,
    assigned_to: Option<String>,
    status: String,
    priority: String,
    amount: f64,
    verification_incentive_percentage: Option<f64>,
    due_date: Option<i64>,
    verification_for: Option<String>,
    created_by: Option<String>,
    deleted: bool,
}

impl TryFrom<TaskRow> for Task {
    type Error = WorkflowError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            status: TaskStatus::from_db(&row.status)?,
            level_index: row.level_index.map(to_index).transpose()?,
            id: row.id,
            project_id: row.project_id,
            title: row.title,
            department: row.department,
            assigned_to: row.assigned_to,
            priority: row.priority,
            amount: row.amount,
            verification_incentive_percentage: row.verification_incentive_percentage,
            due_date: row.due_date,
            verification_for: row.verification_for,
            created_by: row.created_by,
            deleted: row.deleted,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    department: Option<String>,
    current_level_index: i64,
    status: String,
    verified_at: Option<i64>,
    invoiced_at: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct StaffRow {
    id: String,
    name: String,
    department: Option<String>,
    role: String,
    verification_staff: bool,
    active: bool,
}

impl From<StaffRow> for Staff {
    fn from(row: StaffRow) -> Self {
        Staff {
            role: Role::from_db(&row.role),
            id: row.id,
            name: row.name,
            department: row.department,
            verification_staff: row.verification_staff,
            active: row.active,
        }
    }
}

fn cursor_len(pool_len: usize) -> Result<i64> {
    if pool_len == 0 {
        return Err(WorkflowError::Conflict(
            "rotation over an empty candidate pool".to_string(),
        ));
    }
    Ok(pool_len as i64)
}

fn to_index(raw: i64) -> Result<usize> {
    usize::try_from(raw).map_err(|_| WorkflowError::Corrupt(format!("negative index {raw}")))
}

// ─────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────

#[async_trait]
impl TaskStore for SqliteStore {
    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {TASK_FILTER} ORDER BY created_at ASC, rowid ASC"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(&filter.project_id)
            .bind(filter.level_index.map(|i| i as i64))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.status_not.map(|s| s.as_str()))
            .bind(filter.kind.map(|k| k.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn count(&self, filter: &TaskFilter) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM tasks WHERE {TASK_FILTER}");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(&filter.project_id)
            .bind(filter.level_index.map(|i| i as i64))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.status_not.map(|s| s.as_str()))
            .bind(filter.kind.map(|k| k.as_str()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn create(&self, task: &NewTask) -> Result<Option<Task>> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO tasks
                (id, project_id, title, level_index, department, assigned_to, status,
                 priority, amount, verification_incentive_percentage, due_date,
                 verification_for, created_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (verification_for) WHERE verification_for IS NOT NULL AND deleted = 0
            DO NOTHING
            "#,
        )
        .bind(&task.id)
        .bind(&task.project_id)
        .bind(&task.title)
        .bind(task.level_index.map(|i| i as i64))
        .bind(&task.department)
        .bind(&task.assigned_to)
        .bind(task.status.as_str())
        .bind(&task.priority)
        .bind(task.amount)
        .bind(task.verification_incentive_percentage)
        .bind(task.due_date)
        .bind(&task.verification_for)
        .bind(&task.created_by)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Ok(None);
        }
        TaskStore::get(self, &task.id).await
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        actor_id: &str,
        actor_role: &str,
    ) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let project_id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE tasks SET status = ?2, updated_at = ?3
            WHERE  id = ?1 AND deleted = 0
            RETURNING project_id
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(now_unix())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(project_id) = project_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO task_events (task_id, project_id, status, actor_id, actor_role)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(task_id)
        .bind(&project_id)
        .bind(status.as_str())
        .bind(actor_id)
        .bind(actor_role)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        TaskStore::get(self, task_id).await
    }
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn get(&self, project_id: &str) -> Result<Option<Project>> {
        let Some(row) = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, name, department, current_level_index, status, verified_at, invoiced_at
            FROM   projects
            WHERE  id = ?1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let levels: Vec<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT level_index, department, user_id
            FROM   project_levels
            WHERE  project_id = ?1
            ORDER  BY level_index ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let team: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT t.user_id, u.department
            FROM   project_team t
            LEFT   JOIN users u ON u.id = t.user_id
            WHERE  t.project_id = ?1
            ORDER  BY t.user_id ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let assigned_to = levels
            .into_iter()
            .map(|(level_index, department, user_id)| {
                Ok(LevelAssignment {
                    department,
                    user_id,
                    level_index: to_index(level_index)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Project {
            status: ProjectStatus::from_db(&row.status)?,
            current_level_index: to_index(row.current_level_index)?,
            id: row.id,
            name: row.name,
            department: row.department,
            assigned_to,
            team: team
                .into_iter()
                .map(|(user_id, department)| TeamMember {
                    user_id,
                    department,
                })
                .collect(),
            verified_at: row.verified_at,
            invoiced_at: row.invoiced_at,
        }))
    }

    async fn update(&self, project_id: &str, patch: &ProjectPatch) -> Result<bool> {
        // The level index may only grow, whatever the caller asks for.
        let rows = sqlx::query(
            r#"
            UPDATE projects SET
                current_level_index = COALESCE(?2, current_level_index),
                status              = COALESCE(?3, status),
                verified_at         = COALESCE(verified_at, ?4),
                invoiced_at         = COALESCE(invoiced_at, ?5)
            WHERE id = ?1
              AND (?6 IS NULL OR current_level_index = ?6)
              AND (?2 IS NULL OR ?2 >= current_level_index)
            "#,
        )
        .bind(project_id)
        .bind(patch.current_level_index.map(|i| i as i64))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.verified_at)
        .bind(patch.invoiced_at)
        .bind(patch.expected_level_index.map(|i| i as i64))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }
}

// ─────────────────────────────────────────────────────────
// Staff
// ─────────────────────────────────────────────────────────

#[async_trait]
impl StaffDirectory for SqliteStore {
    async fn list_active(&self, filter: &StaffFilter) -> Result<Vec<Staff>> {
        let rows = sqlx::query_as::<_, StaffRow>(
            r#"
            SELECT id, name, department, role, verification_staff, active
            FROM   users
            WHERE  active = 1
            ORDER  BY created_at ASC, rowid ASC
            LIMIT  ?1
            "#,
        )
        .bind(filter.limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Staff::from).collect())
    }
}

// ─────────────────────────────────────────────────────────
// Incentive ledger
// ─────────────────────────────────────────────────────────

#[async_trait]
impl IncentiveLedger for SqliteStore {
    async fn append(&self, record: &IncentiveRecord, month: &str) -> Result<Appended> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO incentive_records
                (user_id, task_id, project_id, verification_task_id, task_amount,
                 incentive_amount, incentive_type, date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (task_id, incentive_type) DO NOTHING
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.task_id)
        .bind(&record.project_id)
        .bind(&record.verification_task_id)
        .bind(record.task_amount)
        .bind(record.incentive_amount)
        .bind(&record.incentive_type)
        .bind(record.date)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(Appended::AlreadySettled);
        }

        sqlx::query(
            r#"
            INSERT INTO user_incentives (user_id, month, amount)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id, month) DO UPDATE SET amount = amount + excluded.amount
            "#,
        )
        .bind(&record.user_id)
        .bind(month)
        .bind(record.incentive_amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Appended::Credited)
    }

    async fn records_for_project(&self, project_id: &str) -> Result<Vec<IncentiveRecord>> {
        let rows = sqlx::query_as::<_, IncentiveRecord>(
            r#"
            SELECT user_id, task_id, project_id, verification_task_id, task_amount,
                   incentive_amount, incentive_type, date
            FROM   incentive_records
            WHERE  project_id = ?1
            ORDER  BY id ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn monthly_total(&self, user_id: &str, month: &str) -> Result<f64> {
        let amount: Option<f64> =
            sqlx::query_scalar("SELECT amount FROM user_incentives WHERE user_id = ?1 AND month = ?2")
                .bind(user_id)
                .bind(month)
                .fetch_optional(&self.pool)
                .await?;
        Ok(amount.unwrap_or(0.0))
    }
}

// ─────────────────────────────────────────────────────────
// Rotation state
// ─────────────────────────────────────────────────────────

#[async_trait]
impl RotationStore for SqliteStore {
    async fn current_position(&self, scope: &str, pool_len: usize) -> Result<usize> {
        let len = cursor_len(pool_len)?;
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM rotation_cursors WHERE scope = ?1")
                .bind(scope)
                .fetch_optional(&self.pool)
                .await?;
        Ok(position.unwrap_or(0).rem_euclid(len) as usize)
    }

    async fn advance_past(&self, scope: &str, pool_len: usize, index: usize) -> Result<bool> {
        let len = cursor_len(pool_len)?;
        let index = index as i64;

        let rows = sqlx::query(
            r#"
            INSERT INTO rotation_cursors (scope, position) VALUES (?1, ?2)
            ON CONFLICT (scope) DO UPDATE SET position = excluded.position
            WHERE rotation_cursors.position % ?3 = ?4
            "#,
        )
        .bind(scope)
        .bind((index + 1) % len)
        .bind(len)
        .bind(index)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    async fn last_assigned(&self, project_id: &str) -> Result<Option<String>> {
        let user: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM project_verifier_history WHERE project_id = ?1")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    async fn record_assignment(&self, project_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_verifier_history (project_id, user_id, assigned_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (project_id) DO UPDATE SET
                user_id = excluded.user_id,
                assigned_at = excluded.assigned_at
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
