//! # Wallet
//!
//! The only code path that writes `wallet_balance`, `total_earned` or
//! `total_withdrawn`. Every operation:
//!
//! 1. moves the balance with a single conditional `UPDATE … RETURNING`,
//!    so concurrent operations on one account serialize on the row and
//!    never compute `balance_after` from the same starting value;
//! 2. appends the matching [`LedgerEntry`] on the same connection.
//!
//! All operations take a `&mut Transaction` so they can only run inside a
//! caller-owned unit of work. Callers combine them with status transitions
//! in that transaction; an error anywhere drops it and nothing is applied.
//!
//! Nothing here retries. A failed mutation is returned to the caller.

use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::config::RewardConfig;
use crate::errors::{AppError, Result};
use crate::ledger::{self, NewEntry};
use crate::types::{EntryKind, LedgerEntry, Task};

/// Credit the configured signup bonus to a freshly created account.
pub async fn credit_signup_bonus(
    tx: &mut Transaction<'_, Sqlite>,
    rewards: &RewardConfig,
    account_id: Uuid,
) -> Result<LedgerEntry> {
    credit(
        tx,
        account_id,
        EntryKind::Signup,
        rewards.signup_bonus,
        None,
        "Signup bonus",
    )
    .await
}

/// Credit the configured referral bonus to the referrer.
///
/// The caller has already ruled out self-referral.
pub async fn credit_referral_bonus(
    tx: &mut Transaction<'_, Sqlite>,
    rewards: &RewardConfig,
    referrer_id: Uuid,
) -> Result<LedgerEntry> {
    credit(
        tx,
        referrer_id,
        EntryKind::Referral,
        rewards.referral_bonus,
        None,
        "Referral signup bonus",
    )
    .await
}

/// Credit `task.reward` for an approved submission; the entry references the task.
pub async fn credit_task_reward(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: Uuid,
    task: &Task,
) -> Result<LedgerEntry> {
    credit(
        tx,
        account_id,
        EntryKind::Task,
        task.reward,
        Some(task.id.to_string()),
        "Task completion reward",
    )
    .await
}

/// Deduct an approved withdrawal from the balance.
///
/// This is the authoritative sufficiency check: the balance may have moved
/// since the withdrawal was requested. Adds to `total_withdrawn`, leaves
/// `total_earned` untouched, and appends a negative entry.
pub async fn debit_for_withdrawal(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: Uuid,
    amount: i64,
    withdrawal_id: Uuid,
) -> Result<LedgerEntry> {
    let conn: &mut SqliteConnection = tx;
    if amount <= 0 {
        let available = current_balance(conn, account_id).await?;
        return Err(AppError::InsufficientBalance {
            requested: amount,
            available,
        });
    }

    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET    wallet_balance  = wallet_balance - ?1,
               total_withdrawn = total_withdrawn + ?1,
               updated_at      = ?2
        WHERE  id = ?3 AND wallet_balance >= ?1
        RETURNING wallet_balance
        "#,
    )
    .bind(amount)
    .bind(Utc::now())
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((balance_after,)) = updated else {
        let available = current_balance(conn, account_id).await?;
        return Err(AppError::InsufficientBalance {
            requested: amount,
            available,
        });
    };

    let entry = ledger::append(
        conn,
        NewEntry {
            account_id,
            kind: EntryKind::Withdrawal,
            amount: -amount,
            balance_after,
            reference: Some(withdrawal_id.to_string()),
            description: "Withdrawal".to_string(),
        },
    )
    .await?;

    info!(%account_id, amount, balance_after, "wallet debited for withdrawal {withdrawal_id}");
    Ok(entry)
}

/// Manual correction by an admin.
///
/// Positive amounts count towards `total_earned`. Negative amounts may not
/// take the balance below zero and do not count as withdrawals.
pub async fn apply_admin_adjustment(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: Uuid,
    amount: i64,
    reason: &str,
) -> Result<LedgerEntry> {
    let description = if reason.trim().is_empty() {
        "Admin adjustment".to_string()
    } else {
        format!("Admin adjustment: {}", reason.trim())
    };

    if amount == 0 {
        return Err(AppError::Validation(
            "adjustment amount must not be zero".to_string(),
        ));
    }
    if amount > 0 {
        return credit(
            tx,
            account_id,
            EntryKind::AdminAdjustment,
            amount,
            None,
            &description,
        )
        .await;
    }

    let conn: &mut SqliteConnection = tx;
    let deduction = amount.checked_neg().ok_or_else(|| {
        AppError::Validation(format!("adjustment amount out of range: {amount}"))
    })?;
    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET    wallet_balance = wallet_balance - ?1,
               updated_at     = ?2
        WHERE  id = ?3 AND wallet_balance >= ?1
        RETURNING wallet_balance
        "#,
    )
    .bind(deduction)
    .bind(Utc::now())
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((balance_after,)) = updated else {
        let available = current_balance(conn, account_id).await?;
        return Err(AppError::InsufficientBalance {
            requested: deduction,
            available,
        });
    };

    let entry = ledger::append(
        conn,
        NewEntry {
            account_id,
            kind: EntryKind::AdminAdjustment,
            amount,
            balance_after,
            reference: None,
            description,
        },
    )
    .await?;

    info!(%account_id, amount, balance_after, "admin adjustment applied");
    Ok(entry)
}

async fn credit(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: Uuid,
    kind: EntryKind,
    amount: i64,
    reference: Option<String>,
    description: &str,
) -> Result<LedgerEntry> {
    if amount <= 0 {
        return Err(AppError::Validation(format!(
            "{} credit must be positive, got {amount}",
            kind.as_str()
        )));
    }

    let conn: &mut SqliteConnection = tx;
    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET    wallet_balance = wallet_balance + ?1,
               total_earned   = total_earned + ?1,
               updated_at     = ?2
        WHERE  id = ?3
        RETURNING wallet_balance
        "#,
    )
    .bind(amount)
    .bind(Utc::now())
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?;
    let (balance_after,) = updated.ok_or(AppError::AccountNotFound(account_id))?;

    let entry = ledger::append(
        conn,
        NewEntry {
            account_id,
            kind,
            amount,
            balance_after,
            reference,
            description: description.to_string(),
        },
    )
    .await?;

    info!(%account_id, kind = kind.as_str(), amount, balance_after, "wallet credited");
    Ok(entry)
}

async fn current_balance(conn: &mut SqliteConnection, account_id: Uuid) -> Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT wallet_balance FROM accounts WHERE id = ?1")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|(balance,)| balance)
        .ok_or(AppError::AccountNotFound(account_id))
}
