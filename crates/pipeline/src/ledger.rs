//! Balance ledger operations.
//!
//! Debits happen only inside task creation
//! ([`fanout_db::Store::create_task_with_debit`]) and refunds only inside
//! task finalization, so both land in the same transaction as the state
//! they pay for. What remains here are the standalone operations.

use fanout_core::types::{DbId, Points};
use fanout_db::models::point_transaction::{LedgerEntry, PointTransaction};
use fanout_db::models::status::TransactionType;
use fanout_db::Store;
use serde::Serialize;

use crate::error::PipelineError;

/// Maximum page size for history queries.
pub const MAX_HISTORY_LIMIT: i64 = 200;

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Result of a ledger movement.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReceipt {
    pub transaction_id: DbId,
    pub new_balance: Points,
}

impl From<&PointTransaction> for LedgerReceipt {
    fn from(tx: &PointTransaction) -> Self {
        Self {
            transaction_id: tx.id,
            new_balance: tx.balance_after,
        }
    }
}

/// Add `amount` points to a user's balance.
pub async fn credit(
    store: &dyn Store,
    user_id: DbId,
    amount: Points,
    tx_type: TransactionType,
    description: &str,
    related_task_id: Option<DbId>,
) -> Result<LedgerReceipt, PipelineError> {
    if amount <= 0 {
        return Err(PipelineError::Validation(format!(
            "credit amount must be positive, got {amount}"
        )));
    }
    if tx_type == TransactionType::Usage {
        return Err(PipelineError::Validation(
            "usage transactions are debits".to_string(),
        ));
    }

    let tx = store
        .credit(&LedgerEntry {
            user_id,
            amount,
            tx_type,
            description: description.to_string(),
            related_task_id,
        })
        .await?;

    tracing::info!(
        user_id,
        amount,
        tx_type = %tx_type,
        new_balance = tx.balance_after,
        "Ledger credit applied",
    );
    Ok(LedgerReceipt::from(&tx))
}

/// Current balance.
pub async fn balance(store: &dyn Store, user_id: DbId) -> Result<Points, PipelineError> {
    store
        .find_user(user_id)
        .await?
        .map(|u| u.points)
        .ok_or(PipelineError::NotFound {
            entity: "user",
            id: user_id,
        })
}

/// Newest transactions first, at most `limit` (clamped to
/// [`MAX_HISTORY_LIMIT`]).
pub async fn history(
    store: &dyn Store,
    user_id: DbId,
    limit: Option<i64>,
) -> Result<Vec<PointTransaction>, PipelineError> {
    if store.find_user(user_id).await?.is_none() {
        return Err(PipelineError::NotFound {
            entity: "user",
            id: user_id,
        });
    }
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(store.list_transactions(user_id, limit).await?)
}
