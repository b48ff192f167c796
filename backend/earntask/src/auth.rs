//! Request extractors for the authenticated caller.
//!
//! Authentication happens upstream; the session layer forwards the
//! authenticated account id in the [`ACCOUNT_HEADER`] header. These
//! extractors only load that account and apply the blocked/admin gates.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::accounts;
use crate::api::ApiState;
use crate::errors::AppError;
use crate::types::Account;

pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Any signed-in, unblocked account.
pub struct Caller(pub Account);

/// A signed-in admin.
pub struct AdminCaller(pub Account);

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or(AppError::Unauthorized)?;

        let account = match accounts::get(&state.pool, id).await {
            Ok(account) => account,
            Err(AppError::AccountNotFound(_)) => return Err(AppError::Unauthorized),
            Err(e) => return Err(e),
        };
        if account.is_blocked {
            return Err(AppError::Forbidden("account is blocked".to_string()));
        }
        Ok(Caller(account))
    }
}

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for AdminCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let Caller(account) = Caller::from_request_parts(parts, state).await?;
        if !account.is_admin() {
            return Err(AppError::Forbidden("admin access required".to_string()));
        }
        Ok(AdminCaller(account))
    }
}
