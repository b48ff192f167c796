//! Application-wide error types.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{SubmissionStatus, WithdrawalStatus};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Task {0} not found")]
    TaskNotFound(Uuid),

    #[error("Submission {0} not found")]
    SubmissionNotFound(Uuid),

    #[error("Withdrawal {0} not found")]
    WithdrawalNotFound(Uuid),

    #[error("Task {0} is not active")]
    TaskInactive(Uuid),

    #[error("Submission {id} already reviewed (status: {status})")]
    AlreadyReviewed { id: Uuid, status: SubmissionStatus },

    #[error("Withdrawal {id} already processed (status: {status})")]
    AlreadyProcessed { id: Uuid, status: WithdrawalStatus },

    #[error("Withdrawal {id} is not approved (status: {status})")]
    NotApproved { id: Uuid, status: WithdrawalStatus },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Minimum withdrawal is {minimum}, requested {amount}")]
    BelowMinimum { amount: i64, minimum: i64 },

    #[error("Submission for task {task_id} already exists (status: {status})")]
    DuplicateSubmission {
        task_id: Uuid,
        status: SubmissionStatus,
    },

    #[error("Email already registered")]
    EmailTaken,

    #[error("This device already has an account")]
    DeviceInUse,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not authorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

/// Coarse classification used at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Validation,
    Duplicate,
    Unauthorized,
    Forbidden,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_)
            | Self::TaskNotFound(_)
            | Self::SubmissionNotFound(_)
            | Self::WithdrawalNotFound(_) => ErrorKind::NotFound,
            Self::TaskInactive(_)
            | Self::AlreadyReviewed { .. }
            | Self::AlreadyProcessed { .. }
            | Self::NotApproved { .. } => ErrorKind::InvalidState,
            Self::InsufficientBalance { .. } | Self::BelowMinimum { .. } | Self::Validation(_) => {
                ErrorKind::Validation
            }
            Self::DuplicateSubmission { .. } | Self::EmailTaken | Self::DeviceInUse => {
                ErrorKind::Duplicate
            }
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Database(_) | Self::Migrate(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }
}

/// `true` when `err` is a UNIQUE constraint violation reported by the store.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

pub type Result<T> = std::result::Result<T, AppError>;
