//! Fan-out image generation engine.
//!
//! A task is one user request spread across several models. Creating it
//! debits the owner's balance once and writes one job per requested image.
//! Jobs then execute independently. When every job has settled, the task is
//! finalized exactly once, and the value of the failed jobs is refunded in
//! the same transaction.
//!
//! Components react to [`fanout_events::PipelineEvent`]s on the shared bus
//! (see [`dispatch`]) or to the clock (see [`reconciler`]). None keeps state
//! between calls; every precondition is re-checked inside the store.

pub mod aggregation;
pub mod aggregator;
pub mod bootstrap;
pub mod cancel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod finalize;
pub mod ledger;
pub mod reconciler;
pub mod side_effects;
pub mod task_factory;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use dispatch::Dispatcher;
pub use error::PipelineError;
pub use finalize::{FinalizationReport, FinalizeTrigger};
pub use task_factory::{create_task, CreateTaskRequest, TaskReceipt};
