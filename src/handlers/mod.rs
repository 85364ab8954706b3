pub mod admin;
pub mod bookings;
pub mod health;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/bookings/book", post(bookings::book_ticket))
        .route("/api/bookings/all", get(bookings::list_bookings))
        .route(
            "/api/bookings/user/:user_id",
            get(bookings::list_user_bookings),
        )
        .route(
            "/api/bookings/:id",
            get(bookings::get_booking).delete(bookings::cancel_booking),
        )
        .route("/api/admin/bookings", get(admin::get_bookings))
        .route("/api/admin/bookings/:id", delete(admin::purge_booking))
        .with_state(state)
}
