//! Transaction ledger: append-only record of every balance change.
//!
//! Rows are only ever inserted, by [`crate::wallet`], inside the same
//! transaction that moves the balance. UPDATE and DELETE are refused by
//! triggers in the schema. Entry order is the autoincrement `seq`.

use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::types::{EntryKind, LedgerEntry};

const ENTRY_COLUMNS: &str =
    "seq, id, account_id, kind, amount, balance_after, reference, description, created_at";

/// An entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: Uuid,
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    pub reference: Option<String>,
    pub description: String,
}

/// Insert one entry and return it as stored.
///
/// Only the wallet calls this, with the balance row already updated on the
/// same connection.
pub(crate) async fn append(conn: &mut SqliteConnection, entry: NewEntry) -> Result<LedgerEntry> {
    let sql = format!(
        r#"
        INSERT INTO ledger_entries
            (id, account_id, kind, amount, balance_after, reference, description, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING {ENTRY_COLUMNS}
        "#
    );
    let stored = sqlx::query_as::<_, LedgerEntry>(&sql)
        .bind(Uuid::new_v4())
        .bind(entry.account_id)
        .bind(entry.kind)
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.reference)
        .bind(entry.description)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await?;
    Ok(stored)
}

/// Most recent entries for an account, newest first.
pub async fn recent_for_account(
    pool: &SqlitePool,
    account_id: Uuid,
    limit: i64,
) -> Result<Vec<LedgerEntry>> {
    let sql = format!(
        r#"
        SELECT {ENTRY_COLUMNS}
        FROM   ledger_entries
        WHERE  account_id = ?1
        ORDER  BY seq DESC
        LIMIT  ?2
        "#
    );
    let rows = sqlx::query_as::<_, LedgerEntry>(&sql)
        .bind(account_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Every entry for an account in replay order.
pub async fn history(conn: &mut SqliteConnection, account_id: Uuid) -> Result<Vec<LedgerEntry>> {
    let sql = format!(
        r#"
        SELECT {ENTRY_COLUMNS}
        FROM   ledger_entries
        WHERE  account_id = ?1
        ORDER  BY seq ASC
        "#
    );
    let rows = sqlx::query_as::<_, LedgerEntry>(&sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// An entry whose stored `balance_after` disagrees with the running sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceMismatch {
    pub seq: i64,
    pub entry_id: Uuid,
    pub recorded: i64,
    pub expected: i64,
}

/// Outcome of replaying an account's ledger against its wallet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub account_id: Uuid,
    pub wallet_balance: i64,
    pub replayed_balance: i64,
    pub entry_count: usize,
    pub mismatches: Vec<BalanceMismatch>,
    pub consistent: bool,
}

/// Sum `amount` from zero in order, checking each `balance_after`.
pub fn replay(entries: &[LedgerEntry]) -> (i64, Vec<BalanceMismatch>) {
    let mut running = 0i64;
    let mut mismatches = Vec::new();
    for entry in entries {
        running += entry.amount;
        if entry.balance_after != running {
            mismatches.push(BalanceMismatch {
                seq: entry.seq,
                entry_id: entry.id,
                recorded: entry.balance_after,
                expected: running,
            });
        }
    }
    (running, mismatches)
}

/// Replay an account's ledger and compare it with the stored balance.
///
/// Balance and entries are read inside one transaction so a concurrent
/// credit cannot land between the two reads.
pub async fn reconcile(pool: &SqlitePool, account_id: Uuid) -> Result<Reconciliation> {
    let mut tx = pool.begin().await?;

    let balance: Option<(i64,)> =
        sqlx::query_as("SELECT wallet_balance FROM accounts WHERE id = ?1")
            .bind(account_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (wallet_balance,) = balance.ok_or(AppError::AccountNotFound(account_id))?;

    let entries = history(&mut tx, account_id).await?;
    tx.commit().await?;

    let (replayed_balance, mismatches) = replay(&entries);
    Ok(Reconciliation {
        account_id,
        wallet_balance,
        replayed_balance,
        entry_count: entries.len(),
        consistent: mismatches.is_empty() && replayed_balance == wallet_balance,
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{register_user, test_pool};

    fn entry(seq: i64, amount: i64, balance_after: i64) -> LedgerEntry {
        LedgerEntry {
            seq,
            id: Uuid::new_v4(),
            account_id: Uuid::nil(),
            kind: EntryKind::AdminAdjustment,
            amount,
            balance_after,
            reference: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn replay_accepts_consistent_history() {
        let entries = vec![entry(1, 10, 10), entry(2, 10, 20), entry(3, -15, 5)];
        let (balance, mismatches) = replay(&entries);
        assert_eq!(balance, 5);
        assert!(mismatches.is_empty());
    }

    #[test]
    fn replay_flags_drifted_entry() {
        let entries = vec![entry(1, 10, 10), entry(2, 10, 25), entry(3, 5, 25)];
        let (balance, mismatches) = replay(&entries);
        assert_eq!(balance, 25);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].seq, 2);
        assert_eq!(mismatches[0].recorded, 25);
        assert_eq!(mismatches[0].expected, 20);
    }

    #[tokio::test]
    async fn entries_cannot_be_modified_or_deleted() {
        let pool = test_pool().await;
        let account = register_user(&pool, "immutable@example.com").await;

        let update = sqlx::query("UPDATE ledger_entries SET amount = 1000 WHERE account_id = ?1")
            .bind(account.id)
            .execute(&pool)
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM ledger_entries WHERE account_id = ?1")
            .bind(account.id)
            .execute(&pool)
            .await;
        assert!(delete.is_err());

        let report = reconcile(&pool, account.id).await.unwrap();
        assert!(report.consistent);
        assert_eq!(report.entry_count, 1);
    }

    #[tokio::test]
    async fn reconcile_unknown_account() {
        let pool = test_pool().await;
        let missing = Uuid::new_v4();
        let err = reconcile(&pool, missing).await.unwrap_err();
        assert!(matches!(err, AppError::AccountNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn recent_entries_are_newest_first_and_limited() {
        let pool = test_pool().await;
        let referrer = register_user(&pool, "ref@example.com").await;
        for i in 0..3 {
            crate::test_utils::register_referred(
                &pool,
                &format!("friend{i}@example.com"),
                &referrer.referral_code,
            )
            .await;
        }

        let recent = recent_for_account(&pool, referrer.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].seq > recent[1].seq);
        assert!(recent.iter().all(|e| e.kind == EntryKind::Referral));
        assert_eq!(recent[0].balance_after, 40);
    }
}
