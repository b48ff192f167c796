//! Assertions over wallet and workflow state, shared by the tests.

use sqlx::SqlitePool;

use crate::accounts;
use crate::ledger;
use crate::types::{Account, SubmissionStatus, WithdrawalStatus};

/// Wallet balance must never be negative.
pub fn assert_balance_non_negative(account: &Account) {
    assert!(
        account.wallet_balance >= 0,
        "account {} has negative balance ({})",
        account.id,
        account.wallet_balance
    );
}

/// Lifetime totals only grow, and earned minus withdrawn never falls
/// below what is still in the wallet.
pub fn assert_totals_monotonic(before: &Account, after: &Account) {
    assert!(
        after.total_earned >= before.total_earned,
        "total_earned went down for {}: {} -> {}",
        after.id,
        before.total_earned,
        after.total_earned
    );
    assert!(
        after.total_withdrawn >= before.total_withdrawn,
        "total_withdrawn went down for {}: {} -> {}",
        after.id,
        before.total_withdrawn,
        after.total_withdrawn
    );
    assert!(
        after.wallet_balance <= after.total_earned - after.total_withdrawn,
        "wallet of {} holds {} but earned {} and withdrew {}",
        after.id,
        after.wallet_balance,
        after.total_earned,
        after.total_withdrawn
    );
}

/// Replaying the account's ledger from zero must reproduce every
/// `balance_after` and end at the stored wallet balance.
pub async fn assert_account_ledger_consistent(pool: &SqlitePool, account_id: uuid::Uuid) {
    let account = accounts::get(pool, account_id)
        .await
        .expect("load account for ledger check");
    assert_balance_non_negative(&account);

    let report = ledger::reconcile(pool, account_id)
        .await
        .expect("reconcile ledger");
    assert!(
        report.mismatches.is_empty(),
        "ledger drift for {account_id}: {:?}",
        report.mismatches
    );
    assert_eq!(
        report.replayed_balance, account.wallet_balance,
        "replayed ledger for {account_id} ends at {}, wallet holds {}",
        report.replayed_balance, account.wallet_balance
    );
    assert!(report.consistent);
}

/// Submissions only move out of pending:
///   Pending -> Approved | Rejected
pub fn assert_valid_submission_transition(from: SubmissionStatus, to: SubmissionStatus) {
    let valid = matches!(
        (from, to),
        (SubmissionStatus::Pending, SubmissionStatus::Approved)
            | (SubmissionStatus::Pending, SubmissionStatus::Rejected)
    );
    assert!(valid, "invalid submission transition: {from} -> {to}");
}

/// Withdrawals move forward only:
///   Pending  -> Approved | Rejected
///   Approved -> Paid
pub fn assert_valid_withdrawal_transition(from: WithdrawalStatus, to: WithdrawalStatus) {
    let valid = matches!(
        (from, to),
        (WithdrawalStatus::Pending, WithdrawalStatus::Approved)
            | (WithdrawalStatus::Pending, WithdrawalStatus::Rejected)
            | (WithdrawalStatus::Approved, WithdrawalStatus::Paid)
    );
    assert!(valid, "invalid withdrawal transition: {from} -> {to}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_tables_agree_with_status_types() {
        use SubmissionStatus as S;
        for from in [S::Pending, S::Approved, S::Rejected] {
            for to in [S::Pending, S::Approved, S::Rejected] {
                if from.can_transition_to(to) {
                    assert_valid_submission_transition(from, to);
                }
            }
        }

        use WithdrawalStatus as W;
        let all = [W::Pending, W::Approved, W::Rejected, W::Paid];
        for from in all {
            for to in all {
                if from.can_transition_to(to) {
                    assert_valid_withdrawal_transition(from, to);
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "invalid withdrawal transition")]
    fn paid_cannot_reopen() {
        assert_valid_withdrawal_transition(WithdrawalStatus::Paid, WithdrawalStatus::Pending);
    }

    #[test]
    #[should_panic(expected = "invalid submission transition")]
    fn approved_cannot_be_rejected() {
        assert_valid_submission_transition(SubmissionStatus::Approved, SubmissionStatus::Rejected);
    }

    fn wallet(balance: i64, earned: i64, withdrawn: i64) -> Account {
        let now = chrono::Utc::now();
        Account {
            id: uuid::Uuid::new_v4(),
            name: "w".to_string(),
            email: "w@example.com".to_string(),
            phone: None,
            role: crate::types::Role::User,
            referral_code: "WALLET23".to_string(),
            referred_by: None,
            wallet_balance: balance,
            total_earned: earned,
            total_withdrawn: withdrawn,
            device_id: None,
            is_blocked: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn totals_accept_debits_below_earnings() {
        // 30 earned, 10 withdrawn, 5 taken back by an admin.
        assert_totals_monotonic(&wallet(10, 20, 0), &wallet(15, 30, 10));
    }

    #[test]
    #[should_panic(expected = "holds")]
    fn balance_above_net_earnings_is_caught() {
        assert_totals_monotonic(&wallet(10, 20, 0), &wallet(25, 30, 10));
    }
}
