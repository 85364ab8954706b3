use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::NotificationClient;

#[derive(Default)]
pub struct MemoryNotifications {
    sent: Mutex<Vec<(i64, String)>>,
    failing: AtomicBool,
}

impl MemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationClient for MemoryNotifications {
    async fn notify(&self, user_id: i64, message: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("notification service unavailable");
        }
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notification log lock poisoned"))?
            .push((user_id, message.to_string()));
        Ok(())
    }
}
