//! Repository for the append-only `point_transactions` table.

use fanout_core::types::{DbId, Points};
use sqlx::PgConnection;

use crate::models::point_transaction::PointTransaction;
use crate::models::status::TransactionType;

/// Column list for `point_transactions` queries.
const COLUMNS: &str = "\
    id, user_id, amount, type_id, balance_before, balance_after, \
    description, related_task_id, created_at";

/// Maximum page size for history listing.
const MAX_LIMIT: i64 = 200;

pub struct PointTransactionRepo;

impl PointTransactionRepo {
    /// Append a row. `balance_after` is derived from `balance_before + amount`.
    pub async fn append(
        conn: &mut PgConnection,
        user_id: DbId,
        amount: Points,
        tx_type: TransactionType,
        balance_before: Points,
        description: &str,
        related_task_id: Option<DbId>,
    ) -> Result<PointTransaction, sqlx::Error> {
        let query = format!(
            "INSERT INTO point_transactions \
                 (user_id, amount, type_id, balance_before, balance_after, description, related_task_id) \
             VALUES ($1, $2, $3, $4, $4 + $2, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PointTransaction>(&query)
            .bind(user_id)
            .bind(amount)
            .bind(tx_type.id())
            .bind(balance_before)
            .bind(description)
            .bind(related_task_id)
            .fetch_one(conn)
            .await
    }

    /// Point a usage row at the task it paid for, once the task id exists.
    pub async fn link_task(
        conn: &mut PgConnection,
        id: DbId,
        task_id: DbId,
    ) -> Result<PointTransaction, sqlx::Error> {
        let query = format!(
            "UPDATE point_transactions SET related_task_id = $2 WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PointTransaction>(&query)
            .bind(id)
            .bind(task_id)
            .fetch_one(conn)
            .await
    }

    /// Newest first.
    pub async fn list_for_user(
        conn: &mut PgConnection,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<PointTransaction>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM point_transactions \
             WHERE user_id = $1 \
             ORDER BY id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, PointTransaction>(&query)
            .bind(user_id)
            .bind(limit.clamp(0, MAX_LIMIT))
            .fetch_all(conn)
            .await
    }
}
