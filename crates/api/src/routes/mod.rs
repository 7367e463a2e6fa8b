pub mod health;
pub mod tasks;
pub mod users;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /tasks                          create (POST)
/// /tasks/{id}                     get
/// /tasks/{id}/jobs                list jobs
/// /tasks/{id}/cancel              cancel (POST)
///
/// /users                          create (POST)
/// /users/{id}                     get
/// /users/{id}/balance             current points
/// /users/{id}/transactions        ledger history
/// /users/{id}/credits             purchase or bonus credit (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/users", users::router())
}
