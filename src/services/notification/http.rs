use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::NotificationClient;

pub struct HttpNotificationClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpNotificationClient {
    pub fn new(base_url: String, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl NotificationClient for HttpNotificationClient {
    async fn notify(&self, user_id: i64, message: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/send", self.base_url))
            .json(&json!({
                "userId": user_id,
                "content": message,
            }))
            .send()
            .await
            .context("failed to call notification service")?
            .error_for_status()
            .context("notification service returned error")?;

        Ok(())
    }
}
