pub mod booking;
pub mod inventory;
pub mod payment;

pub use booking::{Booking, BookingRequest, BookingStatus, NewBooking, RowState};
pub use inventory::InventoryRecord;
pub use payment::{ChargeReceipt, ChargeRequest};
