//! Handlers for the `/users` resource: accounts and the point ledger.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use fanout_core::types::{DbId, Points};
use fanout_db::models::status::TransactionType;
use fanout_db::models::user::{CreateUser, User};
use fanout_pipeline::{ledger, PipelineError};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

async fn find_user(state: &AppState, user_id: DbId) -> AppResult<User> {
    let user = state
        .pipeline
        .store
        .find_user(user_id)
        .await
        .map_err(PipelineError::from)?
        .ok_or(PipelineError::NotFound {
            entity: "user",
            id: user_id,
        })?;
    Ok(user)
}

/// POST /api/v1/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> AppResult<impl IntoResponse> {
    if !input.email.contains('@') {
        return Err(AppError::BadRequest("email must be a valid address".into()));
    }
    if input.initial_points < 0 {
        return Err(AppError::BadRequest(
            "initial_points must not be negative".into(),
        ));
    }

    let user = state
        .pipeline
        .store
        .create_user(&input)
        .await
        .map_err(PipelineError::from)?;
    tracing::info!(user_id = user.id, points = user.points, "User created");
    Ok((StatusCode::CREATED, Json(DataResponse { data: user })))
}

/// GET /api/v1/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let user = find_user(&state, user_id).await?;
    Ok(Json(DataResponse { data: user }))
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: DbId,
    pub points: Points,
}

/// GET /api/v1/users/{id}/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let points = ledger::balance(state.pipeline.store.as_ref(), user_id).await?;
    Ok(Json(DataResponse {
        data: BalanceResponse { user_id, points },
    }))
}

/// GET /api/v1/users/{id}/transactions?limit=
///
/// Newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<DbId>,
    Query(params): Query<LimitParams>,
) -> AppResult<impl IntoResponse> {
    let rows = ledger::history(state.pipeline.store.as_ref(), user_id, params.limit).await?;
    Ok(Json(DataResponse { data: rows }))
}

// ---------------------------------------------------------------------------
// Credits
// ---------------------------------------------------------------------------

/// Ledger types a caller may credit directly. Refunds come only from
/// finalization and debits only from task creation.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Purchase,
    Bonus,
}

impl From<CreditKind> for TransactionType {
    fn from(kind: CreditKind) -> Self {
        match kind {
            CreditKind::Purchase => TransactionType::Purchase,
            CreditKind::Bonus => TransactionType::Bonus,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub amount: Points,
    #[serde(rename = "type")]
    pub kind: CreditKind,
    pub description: Option<String>,
}

/// POST /api/v1/users/{id}/credits
pub async fn add_credit(
    State(state): State<AppState>,
    Path(user_id): Path<DbId>,
    Json(input): Json<CreditRequest>,
) -> AppResult<impl IntoResponse> {
    let description = input.description.unwrap_or_else(|| match input.kind {
        CreditKind::Purchase => "Points purchase".to_string(),
        CreditKind::Bonus => "Bonus points".to_string(),
    });
    let receipt = ledger::credit(
        state.pipeline.store.as_ref(),
        user_id,
        input.amount,
        input.kind.into(),
        &description,
        None,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}
