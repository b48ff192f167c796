//! End-to-end wallet flows across registration, task review and payouts.

use tokio::task::JoinSet;
use uuid::Uuid;

use crate::accounts::{self, Registration};
use crate::errors::AppError;
use crate::invariants::{
    assert_account_ledger_consistent, assert_balance_non_negative, assert_totals_monotonic,
};
use crate::ledger;
use crate::submissions;
use crate::test_utils::{
    create_task, file_pool, fund, register_referred, register_user, rewards, seed_admin,
    test_pool,
};
use crate::types::{EntryKind, SubmissionStatus, WithdrawalStatus};
use crate::withdrawals::{self, WithdrawalRequest};

fn withdrawal(amount: i64) -> WithdrawalRequest {
    WithdrawalRequest {
        amount,
        payment_method: Some("upi".to_string()),
        payment_details: Some("a@upi".to_string()),
    }
}

#[tokio::test]
async fn signup_without_referral() {
    let pool = test_pool().await;
    let a = register_user(&pool, "a@example.com").await;

    assert_eq!(a.wallet_balance, 10);
    let entries = ledger::recent_for_account(&pool, a.id, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Signup);
    assert_eq!(entries[0].amount, 10);
    assert_eq!(entries[0].balance_after, 10);
}

#[tokio::test]
async fn referred_signup_credits_both_accounts() {
    let pool = test_pool().await;
    let a = register_user(&pool, "a@example.com").await;
    let b = register_referred(&pool, "b@example.com", &a.referral_code).await;

    assert_eq!(b.wallet_balance, 10);
    let a_after = accounts::get(&pool, a.id).await.unwrap();
    assert_eq!(a_after.wallet_balance, 20);
    assert_totals_monotonic(&a, &a_after);

    let entries = ledger::recent_for_account(&pool, a.id, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].kind, EntryKind::Referral);
    assert_eq!(entries[0].amount, 10);

    assert_account_ledger_consistent(&pool, a.id).await;
    assert_account_ledger_consistent(&pool, b.id).await;
}

#[tokio::test]
async fn approved_task_credits_reward() {
    let pool = test_pool().await;
    let admin = seed_admin(&pool).await;
    let a = register_user(&pool, "a@example.com").await;
    let task = create_task(&pool, admin.id, 10).await;

    let submission = submissions::submit(&pool, a.id, task.id, "https://proof.example/1")
        .await
        .unwrap();
    assert_eq!(submission.status, SubmissionStatus::Pending);

    let (approved, entry) = submissions::approve(&pool, submission.id, admin.id)
        .await
        .unwrap();
    assert_eq!(approved.status, SubmissionStatus::Approved);
    assert_eq!(entry.kind, EntryKind::Task);
    assert_eq!(entry.amount, 10);
    assert_eq!(entry.reference, Some(task.id.to_string()));

    let a_after = accounts::get(&pool, a.id).await.unwrap();
    assert_eq!(a_after.wallet_balance, 20);
    assert_totals_monotonic(&a, &a_after);
    assert_account_ledger_consistent(&pool, a.id).await;
}

#[tokio::test]
async fn withdrawal_is_debited_on_approval_only() {
    let pool = test_pool().await;
    let admin = seed_admin(&pool).await;
    let a = register_user(&pool, "a@example.com").await;
    fund(&pool, a.id, 140).await;

    let pending = withdrawals::request(&pool, &rewards(), a.id, withdrawal(100))
        .await
        .unwrap();
    assert_eq!(pending.status, WithdrawalStatus::Pending);
    assert_eq!(accounts::get(&pool, a.id).await.unwrap().wallet_balance, 150);

    let (approved, entry) = withdrawals::approve(&pool, pending.id, admin.id)
        .await
        .unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(entry.kind, EntryKind::Withdrawal);
    assert_eq!(entry.amount, -100);
    assert_eq!(entry.balance_after, 50);

    let before_paid = accounts::get(&pool, a.id).await.unwrap();
    assert_eq!(before_paid.wallet_balance, 50);
    assert_eq!(before_paid.total_withdrawn, 100);

    let paid = withdrawals::mark_paid(&pool, pending.id).await.unwrap();
    assert_eq!(paid.status, WithdrawalStatus::Paid);
    let after_paid = accounts::get(&pool, a.id).await.unwrap();
    assert_eq!(after_paid.wallet_balance, 50);
    assert_totals_monotonic(&before_paid, &after_paid);
    assert_account_ledger_consistent(&pool, a.id).await;
}

#[tokio::test]
async fn oversized_second_withdrawal_stays_pending() {
    let pool = test_pool().await;
    let admin = seed_admin(&pool).await;
    let a = register_user(&pool, "a@example.com").await;
    fund(&pool, a.id, 140).await;

    let first = withdrawals::request(&pool, &rewards(), a.id, withdrawal(100))
        .await
        .unwrap();
    let second = withdrawals::request(&pool, &rewards(), a.id, withdrawal(150))
        .await
        .unwrap();

    withdrawals::approve(&pool, first.id, admin.id).await.unwrap();

    let err = withdrawals::approve(&pool, second.id, admin.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientBalance {
            requested: 150,
            available: 50
        }
    ));

    let second = withdrawals::get(&pool, second.id).await.unwrap();
    assert_eq!(second.status, WithdrawalStatus::Pending);
    assert_eq!(second.reviewed_by, None);

    let a_after = accounts::get(&pool, a.id).await.unwrap();
    assert_balance_non_negative(&a_after);
    assert_eq!(a_after.wallet_balance, 50);
    assert_account_ledger_consistent(&pool, a.id).await;
}

async fn collect<T: Send + 'static>(mut set: JoinSet<Result<T, AppError>>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined.expect("task panicked") {
            Ok(value) => out.push(value),
            Err(e) => panic!("concurrent write failed: {e}"),
        }
    }
    out
}

#[tokio::test]
async fn concurrent_writes_across_accounts_all_succeed() {
    const USERS: usize = 16;
    let (pool, _dir) = file_pool().await;
    let admin = seed_admin(&pool).await;
    let task = create_task(&pool, admin.id, 10).await;

    let mut signups = JoinSet::new();
    for i in 0..USERS {
        let pool = pool.clone();
        signups.spawn(async move {
            let reg = Registration {
                name: format!("user{i}"),
                email: format!("user{i}@example.com"),
                ..Registration::default()
            };
            accounts::register(&pool, &rewards(), reg).await
        });
    }
    let users = collect(signups).await;
    assert_eq!(users.len(), USERS);

    for user in &users {
        fund(&pool, user.id, 140).await;
    }

    let mut submits = JoinSet::new();
    let mut requests = JoinSet::new();
    for user in &users {
        let (p, account_id, task_id) = (pool.clone(), user.id, task.id);
        submits.spawn(async move {
            submissions::submit(&p, account_id, task_id, "proof")
                .await
                .map(|s| s.id)
        });
        let (p, account_id) = (pool.clone(), user.id);
        requests.spawn(async move {
            withdrawals::request(&p, &rewards(), account_id, withdrawal(100))
                .await
                .map(|w| w.id)
        });
    }
    let submission_ids: Vec<Uuid> = collect(submits).await;
    let withdrawal_ids: Vec<Uuid> = collect(requests).await;

    let mut reviews = JoinSet::new();
    for id in submission_ids {
        let (p, reviewer) = (pool.clone(), admin.id);
        reviews.spawn(async move { submissions::approve(&p, id, reviewer).await.map(|_| ()) });
    }
    for id in withdrawal_ids {
        let (p, reviewer) = (pool.clone(), admin.id);
        reviews.spawn(async move { withdrawals::approve(&p, id, reviewer).await.map(|_| ()) });
    }
    assert_eq!(collect(reviews).await.len(), USERS * 2);

    for user in &users {
        let account = accounts::get(&pool, user.id).await.unwrap();
        // 10 signup + 140 funding + 10 task - 100 withdrawal
        assert_eq!(account.wallet_balance, 60);
        assert_eq!(account.total_withdrawn, 100);
        assert_account_ledger_consistent(&pool, user.id).await;
    }
}
