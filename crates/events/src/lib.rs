//! Event bus and notification delivery for the generation engine.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying [`PipelineEvent`]s.
//! - [`delivery`]: outbound notification channels ([`Notifier`], SMTP email).

pub mod bus;
pub mod delivery;

pub use bus::{EventBus, PipelineEvent};
pub use delivery::email::{EmailConfig, EmailDelivery, EmailError};
pub use delivery::Notifier;
