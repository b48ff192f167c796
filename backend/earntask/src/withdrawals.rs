//! # Withdrawals
//!
//! ```text
//! Pending ──► Approved ──► Paid
//!    └──────► Rejected
//! ```
//!
//! Requesting only checks the balance; nothing is deducted until approval,
//! which re-checks sufficiency and debits the wallet in the same
//! transaction as the status change. `Paid` records a payout made outside
//! the system and has no wallet effect.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts;
use crate::config::RewardConfig;
use crate::db;
use crate::errors::{AppError, Result};
use crate::types::{LedgerEntry, Withdrawal, WithdrawalDetail, WithdrawalStatus};
use crate::wallet;

const WITHDRAWAL_COLUMNS: &str = "id, account_id, amount, payment_method, payment_details, \
     status, reviewed_by, reviewed_at, rejection_reason, paid_at, created_at, updated_at";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub amount: i64,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_details: Option<String>,
}

/// File a pending withdrawal. The balance is checked but not deducted.
pub async fn request(
    pool: &SqlitePool,
    rewards: &RewardConfig,
    account_id: Uuid,
    req: WithdrawalRequest,
) -> Result<Withdrawal> {
    if req.amount <= 0 || req.amount < rewards.min_withdrawal {
        return Err(AppError::BelowMinimum {
            amount: req.amount,
            minimum: rewards.min_withdrawal,
        });
    }

    let mut tx = db::begin_write(pool).await?;
    let account = accounts::fetch(&mut tx, account_id).await?;
    if req.amount > account.wallet_balance {
        return Err(AppError::InsufficientBalance {
            requested: req.amount,
            available: account.wallet_balance,
        });
    }

    let payment_method = req.payment_method.unwrap_or_default().trim().to_string();
    let payment_details = req.payment_details.unwrap_or_default().trim().to_string();
    let now = Utc::now();
    let sql = format!(
        r#"
        INSERT INTO withdrawals
            (id, account_id, amount, payment_method, payment_details, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)
        RETURNING {WITHDRAWAL_COLUMNS}
        "#
    );
    let withdrawal = sqlx::query_as::<_, Withdrawal>(&sql)
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(req.amount)
        .bind(payment_method)
        .bind(payment_details)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(withdrawal_id = %withdrawal.id, %account_id, amount = req.amount, "withdrawal requested");
    Ok(withdrawal)
}

/// Approve a pending withdrawal and debit the wallet.
///
/// Fails with `InsufficientBalance` if the balance dropped below the amount
/// since the request; the withdrawal then stays `Pending`.
pub async fn approve(
    pool: &SqlitePool,
    withdrawal_id: Uuid,
    reviewer_id: Uuid,
) -> Result<(Withdrawal, LedgerEntry)> {
    let mut tx = db::begin_write(pool).await?;
    let withdrawal = transition(
        &mut tx,
        withdrawal_id,
        WithdrawalStatus::Pending,
        WithdrawalStatus::Approved,
        Review::By {
            reviewer_id,
            reason: None,
        },
    )
    .await?;

    let entry = match wallet::debit_for_withdrawal(
        &mut tx,
        withdrawal.account_id,
        withdrawal.amount,
        withdrawal.id,
    )
    .await
    {
        Ok(entry) => entry,
        Err(e) => {
            warn!(%withdrawal_id, "withdrawal approval rolled back: {e}");
            return Err(e);
        }
    };
    tx.commit().await?;

    info!(%withdrawal_id, %reviewer_id, amount = withdrawal.amount, "withdrawal approved");
    Ok((withdrawal, entry))
}

/// Reject a pending withdrawal. Nothing was deducted, so nothing is refunded.
pub async fn reject(
    pool: &SqlitePool,
    withdrawal_id: Uuid,
    reviewer_id: Uuid,
    reason: &str,
) -> Result<Withdrawal> {
    let mut tx = db::begin_write(pool).await?;
    let withdrawal = transition(
        &mut tx,
        withdrawal_id,
        WithdrawalStatus::Pending,
        WithdrawalStatus::Rejected,
        Review::By {
            reviewer_id,
            reason: Some(reason.trim()),
        },
    )
    .await?;
    tx.commit().await?;

    info!(%withdrawal_id, %reviewer_id, "withdrawal rejected");
    Ok(withdrawal)
}

/// Record that an approved withdrawal has been paid out.
pub async fn mark_paid(pool: &SqlitePool, withdrawal_id: Uuid) -> Result<Withdrawal> {
    let mut tx = db::begin_write(pool).await?;
    let withdrawal = transition(
        &mut tx,
        withdrawal_id,
        WithdrawalStatus::Approved,
        WithdrawalStatus::Paid,
        Review::Payout,
    )
    .await?;
    tx.commit().await?;

    info!(%withdrawal_id, "withdrawal marked paid");
    Ok(withdrawal)
}

/// The caller's withdrawals, newest first.
pub async fn for_account(pool: &SqlitePool, account_id: Uuid) -> Result<Vec<Withdrawal>> {
    let sql = format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE account_id = ?1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query_as::<_, Withdrawal>(&sql)
        .bind(account_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Admin queue with requester details, newest first.
pub async fn by_status(
    pool: &SqlitePool,
    status: WithdrawalStatus,
) -> Result<Vec<WithdrawalDetail>> {
    let rows = sqlx::query_as::<_, WithdrawalDetail>(
        r#"
        SELECT w.id, w.account_id, w.amount, w.payment_method, w.payment_details,
               w.status, w.reviewed_by, w.reviewed_at, w.rejection_reason, w.paid_at,
               w.created_at, w.updated_at,
               a.name           AS account_name,
               a.email          AS account_email,
               a.wallet_balance AS account_balance
        FROM   withdrawals w
        JOIN   accounts a ON a.id = w.account_id
        WHERE  w.status = ?1
        ORDER  BY w.created_at DESC
        "#,
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Withdrawal> {
    let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ?1");
    sqlx::query_as::<_, Withdrawal>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::WithdrawalNotFound(id))
}

enum Review<'a> {
    By {
        reviewer_id: Uuid,
        reason: Option<&'a str>,
    },
    Payout,
}

async fn transition(
    tx: &mut Transaction<'_, Sqlite>,
    id: Uuid,
    from: WithdrawalStatus,
    to: WithdrawalStatus,
    review: Review<'_>,
) -> Result<Withdrawal> {
    debug_assert!(from.can_transition_to(to));

    let now = Utc::now();
    let updated = match review {
        Review::By {
            reviewer_id,
            reason,
        } => {
            let sql = format!(
                r#"
                UPDATE withdrawals
                SET    status           = ?1,
                       reviewed_by      = ?2,
                       reviewed_at      = ?3,
                       rejection_reason = ?4,
                       updated_at       = ?3
                WHERE  id = ?5 AND status = ?6
                RETURNING {WITHDRAWAL_COLUMNS}
                "#
            );
            sqlx::query_as::<_, Withdrawal>(&sql)
                .bind(to)
                .bind(reviewer_id)
                .bind(now)
                .bind(reason)
                .bind(id)
                .bind(from)
                .fetch_optional(&mut **tx)
                .await?
        }
        Review::Payout => {
            let sql = format!(
                r#"
                UPDATE withdrawals
                SET    status     = ?1,
                       paid_at    = ?2,
                       updated_at = ?2
                WHERE  id = ?3 AND status = ?4
                RETURNING {WITHDRAWAL_COLUMNS}
                "#
            );
            sqlx::query_as::<_, Withdrawal>(&sql)
                .bind(to)
                .bind(now)
                .bind(id)
                .bind(from)
                .fetch_optional(&mut **tx)
                .await?
        }
    };

    match updated {
        Some(withdrawal) => Ok(withdrawal),
        None => Err(refusal(tx, id, from).await),
    }
}

async fn refusal(conn: &mut SqliteConnection, id: Uuid, expected: WithdrawalStatus) -> AppError {
    let current: std::result::Result<Option<(WithdrawalStatus,)>, sqlx::Error> =
        sqlx::query_as("SELECT status FROM withdrawals WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await;
    match current {
        Ok(None) => AppError::WithdrawalNotFound(id),
        Ok(Some((status,))) if expected == WithdrawalStatus::Approved => {
            AppError::NotApproved { id, status }
        }
        Ok(Some((status,))) => AppError::AlreadyProcessed { id, status },
        Err(e) => AppError::Database(e),
    }
}
