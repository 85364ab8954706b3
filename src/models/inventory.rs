use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ticket inventory for one event, as owned by the event service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub event_id: i64,
    pub available_tickets: i64,
    pub unit_price: Option<Decimal>,
}
