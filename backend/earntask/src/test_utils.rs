//! Shared fixtures for the in-crate tests.

use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use crate::accounts::{self, Registration};
use crate::config::{Config, RewardConfig};
use crate::db;
use crate::tasks::{self, NewTask};
use crate::types::{Account, Task};

pub const ADMIN_EMAIL: &str = "admin@earntask.com";

/// Fresh migrated in-memory database.
///
/// Each SQLite `:memory:` connection is its own database, so the pool is
/// pinned to one connection that is never recycled.
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("open in-memory sqlite");
    db::migrate(&pool).await.expect("run migrations");
    pool
}

/// Migrated database in a temporary file, opened through `db::init_pool`
/// with its full connection count. Writers on different connections contend
/// for SQLite's lock here, unlike on [`test_pool`].
///
/// Keep the returned directory alive for as long as the pool is used.
pub async fn file_pool() -> (SqlitePool, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("earntask.db");
    let pool = db::init_pool(&format!("sqlite:{}", path.display()))
        .await
        .expect("open file-backed sqlite");
    (pool, dir)
}

pub fn rewards() -> RewardConfig {
    RewardConfig::default()
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        api_port: 0,
        client_url: "http://localhost:5173".to_string(),
        admin_email: Some(ADMIN_EMAIL.to_string()),
        admin_name: "Admin".to_string(),
        rewards: rewards(),
    }
}

fn registration(email: &str) -> Registration {
    let name = email.split('@').next().unwrap_or(email).to_string();
    Registration {
        name,
        email: email.to_string(),
        ..Registration::default()
    }
}

pub async fn register_user(pool: &SqlitePool, email: &str) -> Account {
    accounts::register(pool, &rewards(), registration(email))
        .await
        .expect("register user")
}

pub async fn register_referred(pool: &SqlitePool, email: &str, code: &str) -> Account {
    let reg = Registration {
        referral_code: Some(code.to_string()),
        ..registration(email)
    };
    accounts::register(pool, &rewards(), reg)
        .await
        .expect("register referred user")
}

pub async fn seed_admin(pool: &SqlitePool) -> Account {
    accounts::seed_admin(pool, ADMIN_EMAIL, "Admin")
        .await
        .expect("seed admin")
}

pub async fn create_task(pool: &SqlitePool, admin_id: Uuid, reward: i64) -> Task {
    let new = NewTask {
        title: Some(format!("Task worth {reward}")),
        description: Some("Do the thing".to_string()),
        instructions: Some("Upload a screenshot".to_string()),
        reward: Some(reward),
        is_active: Some(true),
    };
    tasks::create(pool, &rewards(), admin_id, new)
        .await
        .expect("create task")
}

/// Top up a wallet through an admin adjustment.
pub async fn fund(pool: &SqlitePool, account_id: Uuid, amount: i64) {
    accounts::adjust_balance(pool, account_id, amount, "test funding")
        .await
        .expect("fund account");
}

pub async fn ledger_count(pool: &SqlitePool) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_entries")
        .fetch_one(pool)
        .await
        .expect("count ledger entries");
    count
}
