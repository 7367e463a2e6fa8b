use std::sync::Arc;

use fanout_db::DbPool;
use fanout_pipeline::PipelineContext;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// The generation engine: store, bus and collaborators.
    pub pipeline: PipelineContext,
    /// PostgreSQL pool, absent when running on the in-memory store.
    pub pool: Option<DbPool>,
    pub config: Arc<ServerConfig>,
}
