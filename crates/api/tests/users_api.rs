//! `/api/v1/users`: accounts, credits and ledger history.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, create_user, get, post_json, test_state};
use serde_json::json;

#[tokio::test]
async fn create_and_fetch_user() {
    let app = build_test_app(test_state());
    let user_id = create_user(app.clone(), 40).await;

    let user = body_json(get(app, &format!("/api/v1/users/{user_id}")).await).await;
    assert_eq!(user["data"]["email"], "ada@example.com");
    assert_eq!(user["data"]["points"], 40);
    assert_eq!(user["data"]["total_generations"], 0);
}

#[tokio::test]
async fn rejects_bad_user_input() {
    let app = build_test_app(test_state());
    let response = post_json(
        app.clone(),
        "/api/v1/users",
        json!({ "email": "not-an-address", "initial_points": 10 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        app,
        "/api/v1/users",
        json!({ "email": "x@example.com", "initial_points": -1 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn credits_show_up_in_history_newest_first() {
    let app = build_test_app(test_state());
    let user_id = create_user(app.clone(), 10).await;

    let response = post_json(
        app.clone(),
        &format!("/api/v1/users/{user_id}/credits"),
        json!({ "amount": 50, "type": "purchase" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["data"]["new_balance"], 60);

    let history = body_json(
        get(app.clone(), &format!("/api/v1/users/{user_id}/transactions?limit=10")).await,
    )
    .await;
    let rows = history["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["type"], "purchase");
    assert_eq!(rows[0]["balance_before"], 10);
    assert_eq!(rows[0]["balance_after"], 60);
    assert_eq!(rows[1]["type"], "bonus");

    let response = post_json(
        app,
        &format!("/api/v1/users/{user_id}/credits"),
        json!({ "amount": 0, "type": "bonus" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_user_is_404() {
    let app = build_test_app(test_state());
    for uri in [
        "/api/v1/users/77",
        "/api/v1/users/77/balance",
        "/api/v1/users/77/transactions",
    ] {
        let response = get(app.clone(), uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}
