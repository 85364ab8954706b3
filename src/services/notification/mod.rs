pub mod http;
pub mod memory;

use async_trait::async_trait;

/// Best-effort user notifications. Callers log and drop failures.
#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn notify(&self, user_id: i64, message: &str) -> anyhow::Result<()>;
}
