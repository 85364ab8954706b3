pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::models::{ChargeReceipt, ChargeRequest};

#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Charges `request.amount` for a booking. A declined charge is an `Ok`
    /// receipt with `success == false`; `Err` means the processor could not be
    /// reached or answered garbage.
    async fn charge(&self, request: &ChargeRequest) -> anyhow::Result<ChargeReceipt>;
}
