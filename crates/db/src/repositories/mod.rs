//! Repository layer: unit structs with associated async functions, one per
//! table. Every function takes a `&mut PgConnection` so it can run on a
//! pooled connection or inside a transaction.

pub mod job_repo;
pub mod point_transaction_repo;
pub mod task_repo;
pub mod user_repo;

pub use job_repo::JobRepo;
pub use point_transaction_repo::PointTransactionRepo;
pub use task_repo::TaskRepo;
pub use user_repo::UserRepo;
