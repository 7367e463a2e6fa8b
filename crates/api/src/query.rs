use serde::Deserialize;

/// `?limit=` for list endpoints. Clamped by the ledger layer.
#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}
