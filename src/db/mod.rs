pub mod migrations;
pub mod queries;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use chrono::{NaiveDateTime, SubsecRound, Utc};
use rusqlite::Connection;

use crate::models::{Booking, BookingStatus, NewBooking, RowState};

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("booking {0} not found")]
    NotFound(i64),

    #[error("booking {0} is cancelled")]
    Cancelled(i64),

    #[error("corrupt booking row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("booking store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub reconciliation_required: Option<bool>,
    pub limit: Option<i64>,
}

/// Persistence for booking records.
///
/// `create` assigns the id and the booking date. `update` writes status,
/// payment reference and the reconciliation flag, stamps `updated_at`, and
/// fails with [`StoreError::NotFound`] when the row is missing. `CANCELLED`
/// is final: `update` refuses to move a cancelled row to any other status and
/// reports [`StoreError::Cancelled`].
pub trait BookingStore: Send + Sync {
    fn create(&self, new: &NewBooking) -> Result<Booking, StoreError>;
    fn get(&self, id: i64) -> Result<Option<Booking>, StoreError>;
    fn update(&self, booking: &mut Booking) -> Result<(), StoreError>;
    /// Moves `id` to `next` only if its status and reconciliation flag still
    /// read `expected`. Returns whether the row was written.
    fn compare_and_set(&self, id: i64, expected: RowState, next: RowState) -> Result<bool, StoreError>;
    fn delete(&self, id: i64) -> Result<bool, StoreError>;
    fn list_by_user(&self, user_id: i64) -> Result<Vec<Booking>, StoreError>;
    fn list(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;
}

/// Store timestamps have second precision; truncate so in-memory values
/// compare equal to what is read back.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}

pub struct SqliteBookingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBookingStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(Mutex::new(init_db(path)?))))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl BookingStore for SqliteBookingStore {
    fn create(&self, new: &NewBooking) -> Result<Booking, StoreError> {
        let db = self.lock()?;
        queries::insert_booking(&db, new, BookingStatus::Pending, &now())
    }

    fn get(&self, id: i64) -> Result<Option<Booking>, StoreError> {
        let db = self.lock()?;
        queries::get_booking_by_id(&db, id)
    }

    fn update(&self, booking: &mut Booking) -> Result<(), StoreError> {
        booking.updated_at = now();
        let db = self.lock()?;
        if queries::update_booking(&db, booking)? {
            return Ok(());
        }
        match queries::get_booking_status(&db, booking.id)? {
            None => Err(StoreError::NotFound(booking.id)),
            Some(_) => Err(StoreError::Cancelled(booking.id)),
        }
    }

    fn compare_and_set(&self, id: i64, expected: RowState, next: RowState) -> Result<bool, StoreError> {
        let db = self.lock()?;
        queries::compare_and_set(&db, id, expected, next, &now())
    }

    fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let db = self.lock()?;
        queries::delete_booking(&db, id)
    }

    fn list_by_user(&self, user_id: i64) -> Result<Vec<Booking>, StoreError> {
        let db = self.lock()?;
        queries::get_bookings_for_user(&db, user_id)
    }

    fn list(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let db = self.lock()?;
        queries::get_all_bookings(&db, filter)
    }
}
