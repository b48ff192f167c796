//! Account store: registration, lookups and the admin roster.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::config::RewardConfig;
use crate::db;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::referral;
use crate::types::{Account, LedgerEntry, Role};
use crate::wallet;

const ACCOUNT_COLUMNS: &str = "id, name, email, phone, role, referral_code, referred_by, \
     wallet_balance, total_earned, total_withdrawn, device_id, is_blocked, created_at, updated_at";

/// Attempts at drawing an unused referral code before giving up.
const CODE_ATTEMPTS: usize = 8;

/// Registration input, as handed over by the sign-up flow.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Create an account, credit the signup bonus and, when a valid referral
/// code was given, the referrer's bonus. One transaction covers all of it.
pub async fn register(
    pool: &SqlitePool,
    rewards: &RewardConfig,
    registration: Registration,
) -> Result<Account> {
    let name = registration.name.trim().to_string();
    let email = registration.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() {
        return Err(AppError::Validation("name and email are required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation(format!("invalid email: {email}")));
    }
    let device_id = non_blank(registration.device_id);

    let mut tx = db::begin_write(pool).await?;

    if email_exists(&mut tx, &email).await? {
        return Err(AppError::EmailTaken);
    }
    if let Some(device) = &device_id {
        let taken: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM accounts WHERE device_id = ?1")
            .bind(device)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(AppError::DeviceInUse);
        }
    }

    let id = Uuid::new_v4();
    let referrer = match registration.referral_code.as_deref() {
        Some(code) => referral::resolve_referral(&mut tx, code, id).await?,
        None => None,
    };
    let referral_code = unused_referral_code(&mut tx).await?;

    insert_account(
        &mut tx,
        NewAccount {
            id,
            name: &name,
            email: &email,
            phone: non_blank(registration.phone).as_deref(),
            role: Role::User,
            referral_code: &referral_code,
            referred_by: referrer,
            device_id: device_id.as_deref(),
        },
    )
    .await?;

    wallet::credit_signup_bonus(&mut tx, rewards, id).await?;
    if let Some(referrer_id) = referrer {
        wallet::credit_referral_bonus(&mut tx, rewards, referrer_id).await?;
    }

    let account = fetch(&mut tx, id).await?;
    tx.commit().await?;

    info!(account_id = %id, referred_by = ?referrer, "account registered");
    Ok(account)
}

/// Create the admin account named by the configuration, unless it exists.
///
/// Admins get no signup bonus.
pub async fn seed_admin(pool: &SqlitePool, email: &str, name: &str) -> Result<Account> {
    let email = email.trim().to_lowercase();
    let mut tx = db::begin_write(pool).await?;

    if let Some(existing) = find_by_email(&mut tx, &email).await? {
        if existing.role != Role::Admin {
            return Err(AppError::Config(format!(
                "{email} is registered as a regular user"
            )));
        }
        info!("Admin already exists: {email}");
        return Ok(existing);
    }

    let id = Uuid::new_v4();
    let referral_code = unused_referral_code(&mut tx).await?;
    insert_account(
        &mut tx,
        NewAccount {
            id,
            name,
            email: &email,
            phone: None,
            role: Role::Admin,
            referral_code: &referral_code,
            referred_by: None,
            device_id: None,
        },
    )
    .await?;
    let account = fetch(&mut tx, id).await?;
    tx.commit().await?;

    info!("Admin created: {email}");
    Ok(account)
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Account> {
    let mut conn = pool.acquire().await?;
    fetch(&mut conn, id).await
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: Uuid) -> Result<Account> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
    sqlx::query_as::<_, Account>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::AccountNotFound(id))
}

/// Regular (non-admin) accounts, newest first.
pub async fn list_users(pool: &SqlitePool) -> Result<Vec<Account>> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE role = ?1 ORDER BY created_at DESC"
    );
    let rows = sqlx::query_as::<_, Account>(&sql)
        .bind(Role::User)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Block or unblock a user. Admin accounts cannot be blocked.
pub async fn set_blocked(pool: &SqlitePool, id: Uuid, blocked: bool) -> Result<Account> {
    let mut tx = db::begin_write(pool).await?;
    let account = fetch(&mut tx, id).await?;
    if blocked && account.is_admin() {
        return Err(AppError::Forbidden("cannot block an admin".to_string()));
    }

    sqlx::query("UPDATE accounts SET is_blocked = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(blocked)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let account = fetch(&mut tx, id).await?;
    tx.commit().await?;

    info!(account_id = %id, blocked, "account block flag changed");
    Ok(account)
}

/// Apply an admin correction to an account's wallet.
pub async fn adjust_balance(
    pool: &SqlitePool,
    id: Uuid,
    amount: i64,
    reason: &str,
) -> Result<(Account, LedgerEntry)> {
    let mut tx = db::begin_write(pool).await?;
    let entry = wallet::apply_admin_adjustment(&mut tx, id, amount, reason).await?;
    let account = fetch(&mut tx, id).await?;
    tx.commit().await?;
    Ok((account, entry))
}

/// What a user sees on their referral page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSummary {
    pub referral_code: String,
    pub referral_link: String,
    pub referred_count: i64,
    pub referral_earnings: i64,
}

pub async fn referral_summary(
    pool: &SqlitePool,
    account: &Account,
    client_url: &str,
) -> Result<ReferralSummary> {
    let (referred_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE referred_by = ?1")
            .bind(account.id)
            .fetch_one(pool)
            .await?;
    let (referral_earnings,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE account_id = ?1 AND kind = 'referral'",
    )
    .bind(account.id)
    .fetch_one(pool)
    .await?;

    Ok(ReferralSummary {
        referral_code: account.referral_code.clone(),
        referral_link: format!("{client_url}/register?ref={}", account.referral_code),
        referred_count,
        referral_earnings,
    })
}

struct NewAccount<'a> {
    id: Uuid,
    name: &'a str,
    email: &'a str,
    phone: Option<&'a str>,
    role: Role,
    referral_code: &'a str,
    referred_by: Option<Uuid>,
    device_id: Option<&'a str>,
}

async fn insert_account(conn: &mut SqliteConnection, account: NewAccount<'_>) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO accounts
            (id, name, email, phone, role, referral_code, referred_by, device_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        "#,
    )
    .bind(account.id)
    .bind(account.name)
    .bind(account.email)
    .bind(account.phone)
    .bind(account.role)
    .bind(account.referral_code)
    .bind(account.referred_by)
    .bind(account.device_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        // Lost a race with a concurrent registration.
        if is_unique_violation(&e) {
            let message = e.to_string();
            if message.contains("device_id") {
                AppError::DeviceInUse
            } else if message.contains("email") {
                AppError::EmailTaken
            } else {
                AppError::Database(e)
            }
        } else {
            AppError::Database(e)
        }
    })?;
    Ok(())
}

async fn email_exists(conn: &mut SqliteConnection, email: &str) -> Result<bool> {
    Ok(find_by_email(conn, email).await?.is_some())
}

async fn find_by_email(conn: &mut SqliteConnection, email: &str) -> Result<Option<Account>> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1");
    let row = sqlx::query_as::<_, Account>(&sql)
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

async fn unused_referral_code(conn: &mut SqliteConnection) -> Result<String> {
    for _ in 0..CODE_ATTEMPTS {
        let code = referral::generate_code();
        let taken: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM accounts WHERE referral_code = ?1")
                .bind(&code)
                .fetch_optional(&mut *conn)
                .await?;
        if taken.is_none() {
            return Ok(code);
        }
    }
    Err(AppError::Validation(
        "could not allocate a unique referral code".to_string(),
    ))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
