use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("insufficient inventory for event {event_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        event_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("ticket price not found for event {0}")]
    PriceNotFound(i64),

    #[error("inventory reservation failed for booking {booking_id}: {reason}")]
    InventoryReservationFailed { booking_id: i64, reason: String },

    #[error("payment failed for booking {booking_id}: {reason}")]
    PaymentFailed { booking_id: i64, reason: String },

    #[error("booking {0} was cancelled while it was being processed")]
    BookingCancelled(i64),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::InsufficientInventory { .. } => "insufficient_inventory",
            AppError::PriceNotFound(_) => "price_not_found",
            AppError::InventoryReservationFailed { .. } => "inventory_reservation_failed",
            AppError::PaymentFailed { .. } => "payment_failed",
            AppError::BookingCancelled(_) => "booking_cancelled",
            AppError::Storage(_) => "storage_error",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
        }
    }

    /// The booking row a failed saga left behind, if one was created.
    pub fn booking_id(&self) -> Option<i64> {
        match self {
            AppError::InventoryReservationFailed { booking_id, .. }
            | AppError::PaymentFailed { booking_id, .. } => Some(*booking_id),
            AppError::BookingCancelled(booking_id) => Some(*booking_id),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InsufficientInventory { .. } => StatusCode::CONFLICT,
            AppError::PriceNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InventoryReservationFailed { .. } => StatusCode::CONFLICT,
            AppError::PaymentFailed { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::BookingCancelled(_) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("booking {id}")),
            StoreError::Cancelled(id) => AppError::BookingCancelled(id),
            other => AppError::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if let Some(booking_id) = self.booking_id() {
            body["bookingId"] = serde_json::json!(booking_id);
        }
        (status, axum::Json(body)).into_response()
    }
}
