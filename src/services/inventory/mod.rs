pub mod http;
pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;

#[derive(Debug, Clone, thiserror::Error)]
pub enum InventoryError {
    #[error("event {0} not found")]
    EventNotFound(i64),

    /// The collaborator refused the adjustment, normally because it would
    /// drive availability below zero.
    #[error("adjustment refused: {0}")]
    Refused(String),

    #[error("inventory service unavailable: {0}")]
    Unavailable(String),
}

/// Ticket inventory owned by the event service.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn available_tickets(&self, event_id: i64) -> Result<i64, InventoryError>;

    async fn unit_price(&self, event_id: i64) -> Result<Option<Decimal>, InventoryError>;

    /// Subtracts `delta` from the event's available tickets as one atomic
    /// compare-and-decrement. A negative `delta` gives tickets back. Must fail
    /// with [`InventoryError::Refused`] rather than go below zero.
    async fn reduce_available_tickets(&self, event_id: i64, delta: i64) -> Result<(), InventoryError>;

    async fn restore_tickets(&self, event_id: i64, count: i64) -> Result<(), InventoryError> {
        self.reduce_available_tickets(event_id, -count).await
    }
}
