pub mod job;
pub mod point_transaction;
pub mod status;
pub mod task;
pub mod user;
