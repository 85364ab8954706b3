use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::db::BookingFilter;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub reconciliation: Option<bool>,
    pub limit: Option<i64>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            BookingStatus::parse(s)
                .ok_or_else(|| AppError::Validation(format!("unknown status {s:?}")))?,
        ),
        None => None,
    };

    let filter = BookingFilter {
        status,
        reconciliation_required: query.reconciliation,
        limit: Some(query.limit.unwrap_or(50).clamp(1, 1000)),
    };
    Ok(Json(state.orchestrator.list_bookings(&filter)?))
}

// DELETE /api/admin/bookings/:id
pub async fn purge_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    state.orchestrator.purge_booking(id)?;
    Ok(StatusCode::NO_CONTENT)
}
