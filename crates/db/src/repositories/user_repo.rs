//! Repository for the `users` table.

use fanout_core::types::{DbId, Points};
use sqlx::PgConnection;

use crate::models::user::{CreateUser, User};

/// Column list for `users` queries.
const COLUMNS: &str = "\
    id, email, display_name, points, total_generations, total_images, \
    created_at, updated_at";

pub struct UserRepo;

impl UserRepo {
    /// Insert a user with a zero balance. Opening balances go through the ledger.
    pub async fn insert(conn: &mut PgConnection, input: &CreateUser) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (email, display_name) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&input.email)
            .bind(&input.display_name)
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Read the user and hold its row lock until the transaction ends.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn set_points(
        conn: &mut PgConnection,
        id: DbId,
        points: Points,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET points = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(points)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Add one generation and `images` images to the user's statistics.
    pub async fn bump_stats(
        conn: &mut PgConnection,
        id: DbId,
        images: i64,
    ) -> Result<User, sqlx::Error> {
        let query = format!(
            "UPDATE users \
             SET total_generations = total_generations + 1, \
                 total_images = total_images + $2, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(images)
            .fetch_one(conn)
            .await
    }
}
