//! EarnTask backend entry point.
//!
//! Loads configuration, opens and migrates the SQLite store, seeds the
//! admin account when one is configured, then serves the REST API until
//! Ctrl-C.

mod accounts;
mod api;
mod auth;
mod config;
mod db;
mod errors;
mod ledger;
mod referral;
mod submissions;
mod tasks;
mod types;
mod wallet;
mod withdrawals;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_flows;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(rewards = ?config.rewards, "configuration loaded");

    let pool = db::init_pool(&config.database_url).await?;

    match &config.admin_email {
        Some(email) => {
            let admin = accounts::seed_admin(&pool, email, &config.admin_name).await?;
            info!(admin_id = %admin.id, "admin account ready");
        }
        None => warn!("ADMIN_EMAIL not set; no admin account seeded"),
    }

    let addr = format!("0.0.0.0:{}", config.api_port);
    let app = api::router(Arc::new(api::ApiState {
        pool: pool.clone(),
        config,
    }));

    info!("API listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
