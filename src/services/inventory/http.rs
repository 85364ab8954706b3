use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;

use super::{InventoryClient, InventoryError};

pub struct HttpInventoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpInventoryClient {
    pub fn new(base_url: String, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

fn transport_error(e: reqwest::Error) -> InventoryError {
    if e.is_timeout() {
        InventoryError::Unavailable("request timed out".to_string())
    } else {
        InventoryError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn available_tickets(&self, event_id: i64) -> Result<i64, InventoryError> {
        let resp = self
            .client
            .get(format!("{}/available/{}", self.base_url, event_id))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(InventoryError::EventNotFound(event_id));
        }
        if !status.is_success() {
            return Err(InventoryError::Unavailable(format!(
                "availability lookup returned {status}"
            )));
        }

        let body = resp.text().await.map_err(transport_error)?;
        body.trim().parse::<i64>().map_err(|_| {
            InventoryError::Unavailable(format!("unexpected availability body: {body:?}"))
        })
    }

    async fn unit_price(&self, event_id: i64) -> Result<Option<Decimal>, InventoryError> {
        let resp = self
            .client
            .get(format!("{}/unit-price/{}", self.base_url, event_id))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(InventoryError::Unavailable(format!(
                "price lookup returned {status}"
            )));
        }

        // The event service answers with a bare decimal. Parse the text so the
        // scale survives (10.00 stays 10.00).
        let body = resp.text().await.map_err(transport_error)?;
        let body = body.trim().trim_matches('"');
        if body.is_empty() || body == "null" {
            return Ok(None);
        }
        Decimal::from_str(body)
            .map(Some)
            .map_err(|_| InventoryError::Unavailable(format!("unexpected price body: {body:?}")))
    }

    async fn reduce_available_tickets(&self, event_id: i64, delta: i64) -> Result<(), InventoryError> {
        let resp = self
            .client
            .post(format!("{}/reduce", self.base_url))
            .query(&[("eventId", event_id), ("ticketsToReduce", delta)])
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(InventoryError::EventNotFound(event_id)),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                let body = resp.text().await.unwrap_or_default();
                Err(InventoryError::Refused(if body.trim().is_empty() {
                    format!("event service returned {status}")
                } else {
                    body.trim().to_string()
                }))
            }
            _ => Err(InventoryError::Unavailable(format!(
                "reduce returned {status}"
            ))),
        }
    }
}
