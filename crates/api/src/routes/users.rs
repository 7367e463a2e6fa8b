use axum::routing::{get, post};
use axum::Router;

use crate::handlers::users;
use crate::state::AppState;

/// Routes mounted at `/users`.
///
/// ```text
/// POST   /                     -> create_user
/// GET    /{id}                 -> get_user
/// GET    /{id}/balance         -> get_balance
/// GET    /{id}/transactions    -> list_transactions
/// POST   /{id}/credits         -> add_credit
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(users::create_user))
        .route("/{id}", get(users::get_user))
        .route("/{id}/balance", get(users::get_balance))
        .route("/{id}/transactions", get(users::list_transactions))
        .route("/{id}/credits", post(users::add_credit))
}
