//! # Types
//!
//! Records persisted by the service and the lifecycle enums that govern them.
//!
//! ## Ownership
//!
//! [`Account`] is the root record. [`LedgerEntry`], [`TaskSubmission`] and
//! [`Withdrawal`] hold non-owning references (`account_id`) to it, and the
//! two review records also point at the reviewing admin (`reviewed_by`).
//!
//! ## Lifecycles
//!
//! ```text
//! TaskSubmission:  Pending ──► Approved
//!                     └──────► Rejected
//!
//! Withdrawal:      Pending ──► Approved ──► Paid
//!                     └──────► Rejected
//! ```
//!
//! Every other transition is illegal. The transition tables live on the
//! status enums; the stores enforce them with conditional updates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// A user's wallet and referral relationship.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub referral_code: String,
    /// Set once at registration, never changed afterwards.
    pub referred_by: Option<Uuid>,
    /// Never negative; only [`crate::wallet`] writes it.
    pub wallet_balance: i64,
    /// Sum of every positive credit. Withdrawals do not reduce it.
    pub total_earned: i64,
    /// Sum of every approved withdrawal.
    pub total_withdrawn: i64,
    pub device_id: Option<String>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// What caused a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EntryKind {
    Signup,
    Task,
    Referral,
    Withdrawal,
    AdminAdjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Task => "task",
            Self::Referral => "referral",
            Self::Withdrawal => "withdrawal",
            Self::AdminAdjustment => "admin_adjustment",
        }
    }
}

/// One immutable balance change.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Insertion order; replaying entries by `seq` reproduces the balance.
    pub seq: i64,
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub amount: i64,
    pub balance_after: i64,
    /// Id of the causing record (task or withdrawal), if any.
    pub reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub instructions: String,
    pub reward: i64,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An active task as seen by one user, with that user's submission status.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaskWithStatus {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub task: Task,
    pub my_status: Option<SubmissionStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected)
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's proof of having completed a task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub id: Uuid,
    pub account_id: Uuid,
    pub task_id: Uuid,
    pub proof: String,
    pub status: SubmissionStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A submission joined with its task and submitter, for listings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub submission: TaskSubmission,
    pub task_title: String,
    pub task_reward: i64,
    pub account_name: String,
    pub account_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::Paid)
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to pay out part of the wallet balance.
///
/// The balance is only deducted on approval; `Paid` records the manual
/// payout that happens outside the system.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    pub payment_details: String,
    pub status: WithdrawalStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A withdrawal joined with the requesting account, for the admin queue.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub withdrawal: Withdrawal,
    pub account_name: String,
    pub account_email: String,
    pub account_balance: i64,
}
