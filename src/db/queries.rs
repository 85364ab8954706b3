use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use super::{BookingFilter, StoreError};
use crate::models::{Booking, BookingStatus, NewBooking, RowState};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BOOKING_COLUMNS: &str = "id, event_id, user_id, total_tickets, total_price, payment_id, \
     booking_date, status, reconciliation_required, updated_at";

// ── Bookings ──

pub fn insert_booking(
    conn: &Connection,
    new: &NewBooking,
    status: BookingStatus,
    now: &NaiveDateTime,
) -> Result<Booking, StoreError> {
    let now_str = now.format(TIMESTAMP_FORMAT).to_string();

    conn.execute(
        "INSERT INTO bookings (event_id, user_id, total_tickets, total_price, payment_id, booking_date, status, reconciliation_required, updated_at)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, 0, ?5)",
        params![
            new.event_id,
            new.user_id,
            new.total_tickets,
            new.total_price.to_string(),
            now_str,
            status.as_str(),
        ],
    )?;

    Ok(Booking {
        id: conn.last_insert_rowid(),
        event_id: new.event_id,
        user_id: new.user_id,
        total_tickets: new.total_tickets,
        total_price: new.total_price,
        payment_id: None,
        booking_date: *now,
        status,
        reconciliation_required: false,
        updated_at: *now,
    })
}

pub fn get_booking_by_id(conn: &Connection, id: i64) -> Result<Option<Booking>, StoreError> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes the mutable part of a booking. Identity, quantities, price and
/// booking date are never touched after insert. A cancelled row can only be
/// rewritten as cancelled.
pub fn update_booking(conn: &Connection, booking: &Booking) -> Result<bool, StoreError> {
    let updated_at = booking.updated_at.format(TIMESTAMP_FORMAT).to_string();
    let count = conn.execute(
        "UPDATE bookings SET payment_id = ?1, status = ?2, reconciliation_required = ?3, updated_at = ?4
         WHERE id = ?5 AND (status != 'CANCELLED' OR ?2 = 'CANCELLED')",
        params![
            booking.payment_id,
            booking.status.as_str(),
            booking.reconciliation_required,
            updated_at,
            booking.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_booking_status(conn: &Connection, id: i64) -> Result<Option<BookingStatus>, StoreError> {
    let result = conn.query_row(
        "SELECT status FROM bookings WHERE id = ?1",
        params![id],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(status_str) => BookingStatus::parse(&status_str).map(Some).ok_or_else(|| {
            StoreError::Corrupt {
                id,
                reason: format!("unknown status {status_str:?}"),
            }
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn compare_and_set(
    conn: &Connection,
    id: i64,
    expected: RowState,
    next: RowState,
    now: &NaiveDateTime,
) -> Result<bool, StoreError> {
    let now_str = now.format(TIMESTAMP_FORMAT).to_string();
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, reconciliation_required = ?2, updated_at = ?3
         WHERE id = ?4 AND status = ?5 AND reconciliation_required = ?6",
        params![
            next.status.as_str(),
            next.reconciliation_required,
            now_str,
            id,
            expected.status.as_str(),
            expected.reconciliation_required
        ],
    )?;
    Ok(count > 0)
}

pub fn delete_booking(conn: &Connection, id: i64) -> Result<bool, StoreError> {
    let count = conn.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn get_bookings_for_user(conn: &Connection, user_id: i64) -> Result<Vec<Booking>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = ?1 ORDER BY id ASC"
    ))?;

    let rows = stmt.query_map(params![user_id], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn get_all_bookings(conn: &Connection, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
    let mut sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE 1 = 1");
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![];

    if let Some(status) = filter.status {
        params_vec.push(Box::new(status.as_str()));
        sql.push_str(&format!(" AND status = ?{}", params_vec.len()));
    }
    if let Some(flag) = filter.reconciliation_required {
        params_vec.push(Box::new(flag));
        sql.push_str(&format!(" AND reconciliation_required = ?{}", params_vec.len()));
    }
    sql.push_str(" ORDER BY id ASC");
    if let Some(limit) = filter.limit {
        params_vec.push(Box::new(limit));
        sql.push_str(&format!(" LIMIT ?{}", params_vec.len()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

fn parse_booking_row(row: &rusqlite::Row) -> Result<Booking, StoreError> {
    let id: i64 = row.get(0)?;
    let event_id: i64 = row.get(1)?;
    let user_id: i64 = row.get(2)?;
    let total_tickets: i64 = row.get(3)?;
    let total_price_str: String = row.get(4)?;
    let payment_id: Option<String> = row.get(5)?;
    let booking_date_str: String = row.get(6)?;
    let status_str: String = row.get(7)?;
    let reconciliation_required: bool = row.get(8)?;
    let updated_at_str: String = row.get(9)?;

    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let total_price = Decimal::from_str(&total_price_str)
        .map_err(|e| corrupt(format!("total_price {total_price_str:?}: {e}")))?;
    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| corrupt(format!("unknown status {status_str:?}")))?;
    let booking_date = NaiveDateTime::parse_from_str(&booking_date_str, TIMESTAMP_FORMAT)
        .map_err(|e| corrupt(format!("booking_date {booking_date_str:?}: {e}")))?;
    let updated_at = NaiveDateTime::parse_from_str(&updated_at_str, TIMESTAMP_FORMAT)
        .map_err(|e| corrupt(format!("updated_at {updated_at_str:?}: {e}")))?;

    Ok(Booking {
        id,
        event_id,
        user_id,
        total_tickets,
        total_price,
        payment_id,
        booking_date,
        status,
        reconciliation_required,
        updated_at,
    })
}
