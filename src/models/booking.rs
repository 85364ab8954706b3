use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub total_tickets: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
    pub payment_id: Option<String>,
    pub booking_date: NaiveDateTime,
    pub status: BookingStatus,
    pub reconciliation_required: bool,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    /// Whether this booking still has tickets debited from the event's inventory.
    ///
    /// On a failed or cancelled row the reconciliation flag means a restore is
    /// owed. Only the writer that raised the flag gives the tickets back.
    pub fn holds_inventory_claim(&self) -> bool {
        match self.status {
            BookingStatus::Reserved | BookingStatus::Paid | BookingStatus::Confirmed => true,
            BookingStatus::InventoryFailed
            | BookingStatus::PaymentFailed
            | BookingStatus::Cancelled => self.reconciliation_required,
            BookingStatus::Pending => false,
        }
    }

    pub fn row_state(&self) -> RowState {
        RowState::new(self.status, self.reconciliation_required)
    }
}

/// The part of a row that compare-and-set writes: status plus the
/// restore-owed flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowState {
    pub status: BookingStatus,
    pub reconciliation_required: bool,
}

impl RowState {
    pub fn new(status: BookingStatus, reconciliation_required: bool) -> Self {
        Self {
            status,
            reconciliation_required,
        }
    }
}

/// Fields the orchestrator supplies when it creates the provisional row.
/// `id` and `booking_date` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub event_id: i64,
    pub user_id: i64,
    pub total_tickets: i64,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Reserved,
    Paid,
    Confirmed,
    #[serde(rename = "FAILED_INVENTORY")]
    InventoryFailed,
    #[serde(rename = "FAILED_PAYMENT")]
    PaymentFailed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Reserved => "RESERVED",
            BookingStatus::Paid => "PAID",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InventoryFailed => "FAILED_INVENTORY",
            BookingStatus::PaymentFailed => "FAILED_PAYMENT",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(BookingStatus::Pending),
            "RESERVED" => Some(BookingStatus::Reserved),
            "PAID" => Some(BookingStatus::Paid),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "FAILED_INVENTORY" => Some(BookingStatus::InventoryFailed),
            "FAILED_PAYMENT" | "PAYMENT_FAILED" => Some(BookingStatus::PaymentFailed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (*self, next),
            (Pending, Reserved)
                | (Pending, InventoryFailed)
                | (Pending, Cancelled)
                | (Reserved, Paid)
                | (Reserved, InventoryFailed)
                | (Reserved, Confirmed)
                | (Reserved, PaymentFailed)
                | (Reserved, Cancelled)
                | (Paid, Confirmed)
                | (Paid, Cancelled)
                | (Confirmed, Cancelled)
                | (PaymentFailed, Cancelled)
                | (InventoryFailed, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed
                | BookingStatus::InventoryFailed
                | BookingStatus::PaymentFailed
                | BookingStatus::Cancelled
        )
    }
}

/// Body of `POST /api/bookings/book`. Missing ids deserialize to zero and are
/// rejected by validation, not by the JSON extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    #[serde(default)]
    pub event_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub total_tickets: i64,
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl BookingRequest {
    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}
