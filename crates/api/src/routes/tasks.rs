use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// POST   /                -> create_task
/// GET    /{id}            -> get_task
/// GET    /{id}/jobs       -> list_jobs
/// POST   /{id}/cancel     -> cancel_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(tasks::create_task))
        .route("/{id}", get(tasks::get_task))
        .route("/{id}/jobs", get(tasks::list_jobs))
        .route("/{id}/cancel", post(tasks::cancel_task))
}
