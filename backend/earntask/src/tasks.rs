//! Task catalog: admin-managed list of tasks users can complete.
//!
//! Tasks are never deleted; admins deactivate them instead.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::config::RewardConfig;
use crate::errors::{AppError, Result};
use crate::types::{Task, TaskWithStatus};

const TASK_COLUMNS: &str =
    "id, title, description, instructions, reward, is_active, created_by, created_at, updated_at";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub reward: Option<i64>,
    pub is_active: Option<bool>,
}

/// Partial edit; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub reward: Option<i64>,
    pub is_active: Option<bool>,
}

pub async fn create(
    pool: &SqlitePool,
    rewards: &RewardConfig,
    created_by: Uuid,
    new: NewTask,
) -> Result<Task> {
    let reward = new.reward.unwrap_or(rewards.task_reward);
    check_reward(reward)?;
    let title = new
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "New Task".to_string());

    let now = Utc::now();
    let sql = format!(
        r#"
        INSERT INTO tasks
            (id, title, description, instructions, reward, is_active, created_by, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        RETURNING {TASK_COLUMNS}
        "#
    );
    let task = sqlx::query_as::<_, Task>(&sql)
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(new.description.unwrap_or_default())
        .bind(new.instructions.unwrap_or_default())
        .bind(reward)
        .bind(new.is_active.unwrap_or(true))
        .bind(created_by)
        .bind(now)
        .fetch_one(pool)
        .await?;

    info!(task_id = %task.id, reward, "task created");
    Ok(task)
}

pub async fn update(pool: &SqlitePool, id: Uuid, update: TaskUpdate) -> Result<Task> {
    if let Some(reward) = update.reward {
        check_reward(reward)?;
    }
    let title = update
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let sql = format!(
        r#"
        UPDATE tasks
        SET    title        = COALESCE(?1, title),
               description  = COALESCE(?2, description),
               instructions = COALESCE(?3, instructions),
               reward       = COALESCE(?4, reward),
               is_active    = COALESCE(?5, is_active),
               updated_at   = ?6
        WHERE  id = ?7
        RETURNING {TASK_COLUMNS}
        "#
    );
    let task = sqlx::query_as::<_, Task>(&sql)
        .bind(title)
        .bind(update.description)
        .bind(update.instructions)
        .bind(update.reward)
        .bind(update.is_active)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::TaskNotFound(id))?;

    info!(task_id = %id, active = task.is_active, "task updated");
    Ok(task)
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: Uuid) -> Result<Task> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    sqlx::query_as::<_, Task>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::TaskNotFound(id))
}

/// Every task, newest first.
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC");
    let rows = sqlx::query_as::<_, Task>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

/// Active tasks, each annotated with `account_id`'s submission status.
pub async fn list_active_for(pool: &SqlitePool, account_id: Uuid) -> Result<Vec<TaskWithStatus>> {
    let rows = sqlx::query_as::<_, TaskWithStatus>(
        r#"
        SELECT t.id, t.title, t.description, t.instructions, t.reward, t.is_active,
               t.created_by, t.created_at, t.updated_at,
               s.status AS my_status
        FROM   tasks t
        LEFT   JOIN task_submissions s
               ON s.task_id = t.id AND s.account_id = ?1
        WHERE  t.is_active = 1
        ORDER  BY t.created_at DESC
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

fn check_reward(reward: i64) -> Result<()> {
    if reward <= 0 {
        return Err(AppError::Validation(format!(
            "task reward must be positive, got {reward}"
        )));
    }
    Ok(())
}
