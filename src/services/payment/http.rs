use anyhow::Context;
use async_trait::async_trait;

use super::PaymentClient;
use crate::models::{ChargeReceipt, ChargeRequest};

pub struct HttpPaymentClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPaymentClient {
    pub fn new(base_url: String, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl PaymentClient for HttpPaymentClient {
    async fn charge(&self, request: &ChargeRequest) -> anyhow::Result<ChargeReceipt> {
        let resp = self
            .client
            .post(format!("{}/process", self.base_url))
            .json(request)
            .send()
            .await
            .context("failed to call payment service")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("payment service error ({}): {}", status, body.trim());
        }

        resp.json::<ChargeReceipt>()
            .await
            .context("failed to parse payment service response")
    }
}
