//! User accounts and their point balance.

use fanout_core::types::{DbId, Points, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub email: String,
    pub display_name: Option<String>,
    /// Never negative. Changed only through ledger operations.
    pub points: Points,
    pub total_generations: i64,
    pub total_images: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub display_name: Option<String>,
    /// Opening balance, recorded as a `bonus` transaction when positive.
    #[serde(default)]
    pub initial_points: Points,
}
