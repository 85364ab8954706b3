use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;

use crate::db::BookingFilter;
use crate::errors::AppError;
use crate::models::{Booking, BookingRequest};
use crate::state::AppState;

// POST /api/bookings/book
pub async fn book_ticket(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<Json<Booking>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    // Dropping this handler (client gone) must not drop the saga halfway,
    // so it runs on its own task and we only wait for it.
    let orchestrator = Arc::clone(&state.orchestrator);
    let saga = tokio::spawn(async move { orchestrator.book_ticket(&request).await });
    let booking = saga
        .await
        .map_err(|e| AppError::Storage(format!("booking task failed: {e}")))??;

    Ok(Json(booking))
}

// GET /api/bookings/all
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let bookings = state.orchestrator.list_bookings(&BookingFilter::default())?;
    Ok(Json(bookings))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.orchestrator.get_booking(id)?))
}

// GET /api/bookings/user/:user_id
pub async fn list_user_bookings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.orchestrator.list_bookings_by_user(user_id)?))
}

// DELETE /api/bookings/:id
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, AppError> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let cancel = tokio::spawn(async move { orchestrator.cancel_booking(id).await });
    let booking = cancel
        .await
        .map_err(|e| AppError::Storage(format!("cancellation task failed: {e}")))??;
    Ok(Json(booking))
}
