//! Axum REST API handlers.
//!
//! Thin layer over the core modules: extract the caller, call one core
//! operation, wrap the result. Errors become JSON through
//! [`AppError`]'s `IntoResponse` impl.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::accounts::{self, Registration};
use crate::auth::{AdminCaller, Caller};
use crate::config::{Config, RewardConfig};
use crate::errors::{AppError, ErrorKind};
use crate::ledger;
use crate::submissions;
use crate::tasks::{self, NewTask, TaskUpdate};
use crate::types::{Account, SubmissionStatus, WithdrawalStatus};
use crate::withdrawals::{self, WithdrawalRequest};

/// Newest ledger entries shown to a user.
const TRANSACTIONS_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub config: Config,
}

type ApiResult<T> = Result<T, AppError>;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/config", get(reward_config))
        .route("/api/auth/register", post(register))
        .route("/api/auth/me", get(me))
        .route("/api/users/transactions", get(my_transactions))
        .route("/api/users/referral", get(my_referral))
        .route("/api/users/admin", get(admin_list_users))
        .route("/api/users/admin/:id/block", put(admin_block_user))
        .route("/api/users/admin/:id/unblock", put(admin_unblock_user))
        .route("/api/users/admin/:id/adjust", post(admin_adjust_balance))
        .route("/api/users/admin/:id/audit", get(admin_audit_account))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/submit", post(submit_task))
        .route("/api/tasks/my-submissions", get(my_submissions))
        .route("/api/tasks/admin", get(admin_list_tasks).post(admin_create_task))
        .route("/api/tasks/admin/:id", put(admin_update_task))
        .route("/api/tasks/admin/submissions", get(admin_list_submissions))
        .route(
            "/api/tasks/admin/submissions/:id/approve",
            put(admin_approve_submission),
        )
        .route(
            "/api/tasks/admin/submissions/:id/reject",
            put(admin_reject_submission),
        )
        .route("/api/withdrawals", post(request_withdrawal))
        .route("/api/withdrawals/my", get(my_withdrawals))
        .route("/api/withdrawals/admin", get(admin_list_withdrawals))
        .route(
            "/api/withdrawals/admin/:id/approve",
            put(admin_approve_withdrawal),
        )
        .route(
            "/api/withdrawals/admin/:id/reject",
            put(admin_reject_withdrawal),
        )
        .route("/api/withdrawals/admin/:id/paid", put(admin_mark_paid))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub user: Account,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskBody {
    pub task_id: Uuid,
    pub proof: String,
}

#[derive(Deserialize, Default)]
pub struct ReviewBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct AdjustBody {
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmissionFilter {
    pub status: Option<SubmissionStatus>,
}

#[derive(Deserialize)]
pub struct WithdrawalFilter {
    pub status: Option<WithdrawalStatus>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidState | ErrorKind::Duplicate => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if kind == ErrorKind::Internal {
            error!("request failed: {self}");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                kind,
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────

// Wrappers over axum's extractors whose rejections come back in the same
// JSON error shape as every other failure.

pub struct ApiJson<T>(pub T);

pub struct ApiPath<T>(pub T);

pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(ApiPath(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Public
// ─────────────────────────────────────────────────────────

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/config`
pub async fn reward_config(State(state): State<Arc<ApiState>>) -> Json<RewardConfig> {
    Json(state.config.rewards)
}

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<Arc<ApiState>>,
    ApiJson(body): ApiJson<Registration>,
) -> ApiResult<impl IntoResponse> {
    let user = accounts::register(&state.pool, &state.config.rewards, body).await?;
    Ok((StatusCode::CREATED, Json(AccountResponse { user })))
}

// ─────────────────────────────────────────────────────────
// Signed-in user
// ─────────────────────────────────────────────────────────

/// `GET /api/auth/me`
pub async fn me(Caller(user): Caller) -> Json<AccountResponse> {
    Json(AccountResponse { user })
}

/// `GET /api/users/transactions`
pub async fn my_transactions(
    State(state): State<Arc<ApiState>>,
    Caller(user): Caller,
) -> ApiResult<impl IntoResponse> {
    let transactions = ledger::recent_for_account(&state.pool, user.id, TRANSACTIONS_LIMIT).await?;
    Ok(Json(serde_json::json!({ "transactions": transactions })))
}

/// `GET /api/users/referral`
pub async fn my_referral(
    State(state): State<Arc<ApiState>>,
    Caller(user): Caller,
) -> ApiResult<impl IntoResponse> {
    let summary = accounts::referral_summary(&state.pool, &user, &state.config.client_url).await?;
    Ok(Json(summary))
}

/// `GET /api/tasks`
///
/// Active tasks annotated with the caller's submission status.
pub async fn list_tasks(
    State(state): State<Arc<ApiState>>,
    Caller(user): Caller,
) -> ApiResult<impl IntoResponse> {
    let tasks = tasks::list_active_for(&state.pool, user.id).await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

/// `POST /api/tasks/submit`
pub async fn submit_task(
    State(state): State<Arc<ApiState>>,
    Caller(user): Caller,
    ApiJson(body): ApiJson<SubmitTaskBody>,
) -> ApiResult<impl IntoResponse> {
    let submission = submissions::submit(&state.pool, user.id, body.task_id, &body.proof).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "submission": submission })),
    ))
}

/// `GET /api/tasks/my-submissions`
pub async fn my_submissions(
    State(state): State<Arc<ApiState>>,
    Caller(user): Caller,
) -> ApiResult<impl IntoResponse> {
    let submissions = submissions::for_account(&state.pool, user.id).await?;
    Ok(Json(serde_json::json!({ "submissions": submissions })))
}

/// `POST /api/withdrawals`
pub async fn request_withdrawal(
    State(state): State<Arc<ApiState>>,
    Caller(user): Caller,
    ApiJson(body): ApiJson<WithdrawalRequest>,
) -> ApiResult<impl IntoResponse> {
    if user.is_admin() {
        return Err(AppError::Forbidden(
            "use a user account for withdrawals".to_string(),
        ));
    }
    let withdrawal =
        withdrawals::request(&state.pool, &state.config.rewards, user.id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "withdrawal": withdrawal })),
    ))
}

/// `GET /api/withdrawals/my`
pub async fn my_withdrawals(
    State(state): State<Arc<ApiState>>,
    Caller(user): Caller,
) -> ApiResult<impl IntoResponse> {
    let withdrawals = withdrawals::for_account(&state.pool, user.id).await?;
    Ok(Json(serde_json::json!({ "withdrawals": withdrawals })))
}

// ─────────────────────────────────────────────────────────
// Admin
// ─────────────────────────────────────────────────────────

/// `GET /api/users/admin`
pub async fn admin_list_users(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
) -> ApiResult<impl IntoResponse> {
    let users = accounts::list_users(&state.pool).await?;
    Ok(Json(serde_json::json!({ "users": users })))
}

/// `PUT /api/users/admin/:id/block`
pub async fn admin_block_user(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = accounts::set_blocked(&state.pool, id, true).await?;
    Ok(Json(serde_json::json!({ "user": user, "message": "User blocked" })))
}

/// `PUT /api/users/admin/:id/unblock`
pub async fn admin_unblock_user(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = accounts::set_blocked(&state.pool, id, false).await?;
    Ok(Json(serde_json::json!({ "user": user, "message": "User unblocked" })))
}

/// `POST /api/users/admin/:id/adjust`
pub async fn admin_adjust_balance(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<AdjustBody>,
) -> ApiResult<impl IntoResponse> {
    let reason = body.reason.unwrap_or_default();
    let (user, transaction) = accounts::adjust_balance(&state.pool, id, body.amount, &reason).await?;
    Ok(Json(
        serde_json::json!({ "user": user, "transaction": transaction }),
    ))
}

/// `GET /api/users/admin/:id/audit`
///
/// Replays the account's ledger and reports any drift.
pub async fn admin_audit_account(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let report = ledger::reconcile(&state.pool, id).await?;
    Ok(Json(report))
}

/// `GET /api/tasks/admin`
pub async fn admin_list_tasks(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
) -> ApiResult<impl IntoResponse> {
    let tasks = tasks::list_all(&state.pool).await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

/// `POST /api/tasks/admin`
pub async fn admin_create_task(
    State(state): State<Arc<ApiState>>,
    AdminCaller(admin): AdminCaller,
    ApiJson(body): ApiJson<NewTask>,
) -> ApiResult<impl IntoResponse> {
    let task = tasks::create(&state.pool, &state.config.rewards, admin.id, body).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "task": task }))))
}

/// `PUT /api/tasks/admin/:id`
pub async fn admin_update_task(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<TaskUpdate>,
) -> ApiResult<impl IntoResponse> {
    let task = tasks::update(&state.pool, id, body).await?;
    Ok(Json(serde_json::json!({ "task": task })))
}

/// `GET /api/tasks/admin/submissions?status=pending`
pub async fn admin_list_submissions(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiQuery(filter): ApiQuery<SubmissionFilter>,
) -> ApiResult<impl IntoResponse> {
    let status = filter.status.unwrap_or(SubmissionStatus::Pending);
    let submissions = submissions::by_status(&state.pool, status).await?;
    Ok(Json(serde_json::json!({ "submissions": submissions })))
}

/// `PUT /api/tasks/admin/submissions/:id/approve`
pub async fn admin_approve_submission(
    State(state): State<Arc<ApiState>>,
    AdminCaller(admin): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (submission, transaction) = submissions::approve(&state.pool, id, admin.id).await?;
    Ok(Json(serde_json::json!({
        "submission": submission,
        "transaction": transaction,
        "message": "Approved. Reward credited.",
    })))
}

/// `PUT /api/tasks/admin/submissions/:id/reject`
pub async fn admin_reject_submission(
    State(state): State<Arc<ApiState>>,
    AdminCaller(admin): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
    body: Option<ApiJson<ReviewBody>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body.and_then(|ApiJson(b)| b.reason).unwrap_or_default();
    let submission = submissions::reject(&state.pool, id, admin.id, &reason).await?;
    Ok(Json(serde_json::json!({
        "submission": submission,
        "message": "Rejected",
    })))
}

/// `GET /api/withdrawals/admin?status=pending`
pub async fn admin_list_withdrawals(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiQuery(filter): ApiQuery<WithdrawalFilter>,
) -> ApiResult<impl IntoResponse> {
    let status = filter.status.unwrap_or(WithdrawalStatus::Pending);
    let withdrawals = withdrawals::by_status(&state.pool, status).await?;
    Ok(Json(serde_json::json!({ "withdrawals": withdrawals })))
}

/// `PUT /api/withdrawals/admin/:id/approve`
pub async fn admin_approve_withdrawal(
    State(state): State<Arc<ApiState>>,
    AdminCaller(admin): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (withdrawal, transaction) = withdrawals::approve(&state.pool, id, admin.id).await?;
    Ok(Json(serde_json::json!({
        "withdrawal": withdrawal,
        "transaction": transaction,
        "message": "Approved and deducted from wallet. Mark as paid once the payout is sent.",
    })))
}

/// `PUT /api/withdrawals/admin/:id/reject`
pub async fn admin_reject_withdrawal(
    State(state): State<Arc<ApiState>>,
    AdminCaller(admin): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
    body: Option<ApiJson<ReviewBody>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body.and_then(|ApiJson(b)| b.reason).unwrap_or_default();
    let withdrawal = withdrawals::reject(&state.pool, id, admin.id, &reason).await?;
    Ok(Json(serde_json::json!({
        "withdrawal": withdrawal,
        "message": "Rejected",
    })))
}

/// `PUT /api/withdrawals/admin/:id/paid`
pub async fn admin_mark_paid(
    State(state): State<Arc<ApiState>>,
    AdminCaller(_): AdminCaller,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let withdrawal = withdrawals::mark_paid(&state.pool, id).await?;
    Ok(Json(serde_json::json!({
        "withdrawal": withdrawal,
        "message": "Marked as paid",
    })))
}

// ─────────────────────────────────────────────────────────
// End-to-end tests
// ─────────────────────────────────────────────────────────
