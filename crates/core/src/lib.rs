//! Domain primitives shared by every fanout crate.
//!
//! Pure functions and constants only: pricing, request validation, retry
//! and backoff policy. No database or network access lives here.

pub mod error;
pub mod generation;
pub mod pricing;
pub mod retry;
pub mod types;
