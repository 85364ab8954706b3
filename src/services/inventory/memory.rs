use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{InventoryClient, InventoryError};
use crate::models::InventoryRecord;

/// In-process inventory with the same admission contract as the event
/// service: every adjustment is checked and applied under one lock and never
/// drives availability negative.
#[derive(Default)]
pub struct MemoryInventory {
    records: Mutex<HashMap<i64, InventoryRecord>>,
    lookup_outage: AtomicBool,
    reservation_outage: AtomicBool,
    restore_outage: AtomicBool,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(self, event_id: i64, available_tickets: i64, unit_price: Option<Decimal>) -> Self {
        self.set_event(event_id, available_tickets, unit_price);
        self
    }

    pub fn set_event(&self, event_id: i64, available_tickets: i64, unit_price: Option<Decimal>) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(
                event_id,
                InventoryRecord {
                    event_id,
                    available_tickets,
                    unit_price,
                },
            );
        }
    }

    pub fn record(&self, event_id: i64) -> Option<InventoryRecord> {
        self.records.lock().ok()?.get(&event_id).cloned()
    }

    pub fn available(&self, event_id: i64) -> Option<i64> {
        self.record(event_id).map(|r| r.available_tickets)
    }

    /// Availability and price lookups fail as if the service were down.
    pub fn set_lookup_outage(&self, down: bool) {
        self.lookup_outage.store(down, Ordering::SeqCst);
    }

    /// Debits (positive deltas) fail as if the service were down.
    pub fn set_reservation_outage(&self, down: bool) {
        self.reservation_outage.store(down, Ordering::SeqCst);
    }

    /// Credits (negative deltas) fail as if the service were down.
    pub fn set_restore_outage(&self, down: bool) {
        self.restore_outage.store(down, Ordering::SeqCst);
    }

    fn lookup(&self, event_id: i64) -> Result<InventoryRecord, InventoryError> {
        if self.lookup_outage.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable("inventory lookup outage".to_string()));
        }
        self.record(event_id)
            .ok_or(InventoryError::EventNotFound(event_id))
    }
}

#[async_trait]
impl InventoryClient for MemoryInventory {
    async fn available_tickets(&self, event_id: i64) -> Result<i64, InventoryError> {
        self.lookup(event_id).map(|r| r.available_tickets)
    }

    async fn unit_price(&self, event_id: i64) -> Result<Option<Decimal>, InventoryError> {
        match self.lookup(event_id) {
            Ok(record) => Ok(record.unit_price),
            Err(InventoryError::EventNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn reduce_available_tickets(&self, event_id: i64, delta: i64) -> Result<(), InventoryError> {
        if delta > 0 && self.reservation_outage.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable("inventory reservation outage".to_string()));
        }
        if delta < 0 && self.restore_outage.load(Ordering::SeqCst) {
            return Err(InventoryError::Unavailable("inventory restore outage".to_string()));
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| InventoryError::Unavailable("inventory lock poisoned".to_string()))?;
        let record = records
            .get_mut(&event_id)
            .ok_or(InventoryError::EventNotFound(event_id))?;

        let remaining = record.available_tickets - delta;
        if remaining < 0 {
            return Err(InventoryError::Refused(format!(
                "only {} tickets left for event {}",
                record.available_tickets, event_id
            )));
        }
        record.available_tickets = remaining;
        Ok(())
    }
}
