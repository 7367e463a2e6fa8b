//! External delivery channels for user notifications.

pub mod email;

use async_trait::async_trait;

use self::email::EmailError;

/// Sends a rendered notification to one recipient. Best-effort from the
/// engine's point of view: failures are logged, never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError>;
}
