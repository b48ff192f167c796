//! Application configuration loaded from environment variables.

use std::str::FromStr;

use serde::Serialize;

use crate::errors::{AppError, Result};

/// Bonus, reward and withdrawal amounts, in whole currency units.
///
/// Passed explicitly into every wallet operation so the amounts are read at
/// call time rather than baked into the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardConfig {
    /// Credited once to every newly registered account.
    pub signup_bonus: i64,
    /// Default reward for tasks created without an explicit one.
    pub task_reward: i64,
    /// Credited to the referrer when a referred account registers.
    pub referral_bonus: i64,
    /// Smallest withdrawal a user may request.
    pub min_withdrawal: i64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            signup_bonus: 10,
            task_reward: 10,
            referral_bonus: 10,
            min_withdrawal: 100,
        }
    }
}

impl RewardConfig {
    /// Reject non-positive amounts; a zero bonus would still append a ledger entry.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("SIGNUP_BONUS", self.signup_bonus),
            ("TASK_REWARD", self.task_reward),
            ("REFERRAL_BONUS", self.referral_bonus),
            ("MIN_WITHDRAWAL", self.min_withdrawal),
        ];
        for (name, value) in fields {
            if value <= 0 {
                return Err(AppError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Frontend base URL, used to build referral links
    pub client_url: String,
    /// Admin account to create at start-up if it does not exist yet
    pub admin_email: Option<String>,
    pub admin_name: String,
    pub rewards: RewardConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = RewardConfig::default();
        let rewards = RewardConfig {
            signup_bonus: parse_or("SIGNUP_BONUS", defaults.signup_bonus)?,
            task_reward: parse_or("TASK_REWARD", defaults.task_reward)?,
            referral_bonus: parse_or("REFERRAL_BONUS", defaults.referral_bonus)?,
            min_withdrawal: parse_or("MIN_WITHDRAWAL", defaults.min_withdrawal)?,
        };
        rewards.validate()?;

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./earntask.db".to_string()),
            api_port: parse_or("API_PORT", 3001)?,
            client_url: env_var("CLIENT_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            admin_email: env_var("ADMIN_EMAIL").ok().filter(|e| !e.trim().is_empty()),
            admin_name: env_var("ADMIN_NAME").unwrap_or_else(|_| "Admin".to_string()),
            rewards,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
