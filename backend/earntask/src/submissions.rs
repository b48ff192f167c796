//! # Task submissions
//!
//! Review lifecycle for proof-of-completion:
//!
//! ```text
//! Pending ──► Approved   (credits task.reward)
//!    └──────► Rejected   (user may resubmit; the record returns to Pending)
//! ```
//!
//! At most one submission exists per (account, task), enforced by a UNIQUE
//! constraint. `submit` decides what a conflict means: a rejected record is
//! reopened with the new proof, a pending or approved one is a duplicate.
//!
//! Review transitions are conditional updates (`… WHERE status = 'pending'`)
//! so two concurrent approvals cannot both succeed. Approval and the reward
//! credit share one transaction.

use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts;
use crate::db;
use crate::errors::{AppError, Result};
use crate::tasks;
use crate::types::{LedgerEntry, SubmissionDetail, SubmissionStatus, TaskSubmission};
use crate::wallet;

const SUBMISSION_COLUMNS: &str = "id, account_id, task_id, proof, status, reviewed_by, \
     reviewed_at, rejection_reason, created_at, updated_at";

/// File proof for `task_id` on behalf of `account_id`.
pub async fn submit(
    pool: &SqlitePool,
    account_id: Uuid,
    task_id: Uuid,
    proof: &str,
) -> Result<TaskSubmission> {
    let proof = proof.trim();
    if proof.is_empty() {
        return Err(AppError::Validation("proof is required".to_string()));
    }

    let mut tx = db::begin_write(pool).await?;
    let task = tasks::fetch(&mut tx, task_id).await?;
    if !task.is_active {
        return Err(AppError::TaskInactive(task_id));
    }
    accounts::fetch(&mut tx, account_id).await?;

    let now = Utc::now();
    let sql = format!(
        r#"
        INSERT INTO task_submissions
            (id, account_id, task_id, proof, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
        ON CONFLICT (account_id, task_id) DO UPDATE
        SET    proof            = excluded.proof,
               status           = 'pending',
               reviewed_by      = NULL,
               reviewed_at      = NULL,
               rejection_reason = NULL,
               updated_at       = excluded.updated_at
        WHERE  task_submissions.status = 'rejected'
        RETURNING {SUBMISSION_COLUMNS}
        "#
    );
    let stored = sqlx::query_as::<_, TaskSubmission>(&sql)
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(task_id)
        .bind(proof)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(submission) = stored else {
        let (status,): (SubmissionStatus,) = sqlx::query_as(
            "SELECT status FROM task_submissions WHERE account_id = ?1 AND task_id = ?2",
        )
        .bind(account_id)
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
        return Err(AppError::DuplicateSubmission { task_id, status });
    };
    tx.commit().await?;

    info!(submission_id = %submission.id, %account_id, %task_id, "task submission filed");
    Ok(submission)
}

/// Approve a pending submission and credit the task reward, atomically.
///
/// Returns the approved submission and the reward's ledger entry. If the
/// credit fails the approval is rolled back with it.
pub async fn approve(
    pool: &SqlitePool,
    submission_id: Uuid,
    reviewer_id: Uuid,
) -> Result<(TaskSubmission, LedgerEntry)> {
    let mut tx = db::begin_write(pool).await?;
    let submission = transition(
        &mut tx,
        submission_id,
        SubmissionStatus::Approved,
        reviewer_id,
        None,
    )
    .await?;

    let task = tasks::fetch(&mut tx, submission.task_id).await?;
    let entry = wallet::credit_task_reward(&mut tx, submission.account_id, &task).await?;
    tx.commit().await?;

    info!(
        %submission_id,
        %reviewer_id,
        reward = task.reward,
        "submission approved"
    );
    Ok((submission, entry))
}

/// Reject a pending submission. No wallet effect.
pub async fn reject(
    pool: &SqlitePool,
    submission_id: Uuid,
    reviewer_id: Uuid,
    reason: &str,
) -> Result<TaskSubmission> {
    let mut tx = db::begin_write(pool).await?;
    let submission = transition(
        &mut tx,
        submission_id,
        SubmissionStatus::Rejected,
        reviewer_id,
        Some(reason.trim()),
    )
    .await?;
    tx.commit().await?;

    info!(%submission_id, %reviewer_id, "submission rejected");
    Ok(submission)
}

/// The caller's submissions with task details, newest first.
pub async fn for_account(pool: &SqlitePool, account_id: Uuid) -> Result<Vec<SubmissionDetail>> {
    let rows = sqlx::query_as::<_, SubmissionDetail>(&detail_query("s.account_id = ?1"))
        .bind(account_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Review queue for admins, newest first.
pub async fn by_status(
    pool: &SqlitePool,
    status: SubmissionStatus,
) -> Result<Vec<SubmissionDetail>> {
    let rows = sqlx::query_as::<_, SubmissionDetail>(&detail_query("s.status = ?1"))
        .bind(status)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[cfg(test)]
pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<TaskSubmission> {
    let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM task_submissions WHERE id = ?1");
    sqlx::query_as::<_, TaskSubmission>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::SubmissionNotFound(id))
}

/// Move a pending submission to `to`, or explain why it cannot move.
async fn transition(
    tx: &mut Transaction<'_, Sqlite>,
    id: Uuid,
    to: SubmissionStatus,
    reviewer_id: Uuid,
    rejection_reason: Option<&str>,
) -> Result<TaskSubmission> {
    let from = SubmissionStatus::Pending;
    debug_assert!(from.can_transition_to(to));

    let now = Utc::now();
    let sql = format!(
        r#"
        UPDATE task_submissions
        SET    status           = ?1,
               reviewed_by      = ?2,
               reviewed_at      = ?3,
               rejection_reason = ?4,
               updated_at       = ?3
        WHERE  id = ?5 AND status = ?6
        RETURNING {SUBMISSION_COLUMNS}
        "#
    );
    let updated = sqlx::query_as::<_, TaskSubmission>(&sql)
        .bind(to)
        .bind(reviewer_id)
        .bind(now)
        .bind(rejection_reason)
        .bind(id)
        .bind(from)
        .fetch_optional(&mut **tx)
        .await?;

    match updated {
        Some(submission) => Ok(submission),
        None => Err(refusal(tx, id).await),
    }
}

async fn refusal(conn: &mut SqliteConnection, id: Uuid) -> AppError {
    let current: std::result::Result<Option<(SubmissionStatus,)>, sqlx::Error> =
        sqlx::query_as("SELECT status FROM task_submissions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await;
    match current {
        Ok(None) => AppError::SubmissionNotFound(id),
        Ok(Some((status,))) => {
            warn!(submission_id = %id, %status, "review refused, already reviewed");
            AppError::AlreadyReviewed { id, status }
        }
        Err(e) => AppError::Database(e),
    }
}

fn detail_query(filter: &str) -> String {
    format!(
        r#"
        SELECT s.id, s.account_id, s.task_id, s.proof, s.status, s.reviewed_by,
               s.reviewed_at, s.rejection_reason, s.created_at, s.updated_at,
               t.title  AS task_title,
               t.reward AS task_reward,
               a.name   AS account_name,
               a.email  AS account_email
        FROM   task_submissions s
        JOIN   tasks t    ON t.id = s.task_id
        JOIN   accounts a ON a.id = s.account_id
        WHERE  {filter}
        ORDER  BY s.created_at DESC
        "#
    )
}
