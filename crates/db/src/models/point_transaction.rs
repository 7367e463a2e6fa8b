//! Append-only ledger rows.

use fanout_core::types::{DbId, Points, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::TransactionType;

/// A row from the `point_transactions` table.
///
/// `balance_after == balance_before + amount` for every row, and successive
/// rows of one user chain (`balance_before` equals the previous `balance_after`).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PointTransaction {
    pub id: DbId,
    pub user_id: DbId,
    pub amount: Points,
    #[sqlx(rename = "type_id", try_from = "i16")]
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub balance_before: Points,
    pub balance_after: Points,
    pub description: String,
    pub related_task_id: Option<DbId>,
    pub created_at: Timestamp,
}

/// A standalone credit (purchase, bonus, manual refund).
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: DbId,
    /// Strictly positive.
    pub amount: Points,
    pub tx_type: TransactionType,
    pub description: String,
    pub related_task_id: Option<DbId>,
}
