use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub event_service_url: String,
    pub payment_service_url: String,
    pub notification_service_url: String,
    pub upstream_timeout: Duration,
    /// Send confirmations on a spawned task instead of before the response.
    pub background_notifications: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8083),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "bookings.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            event_service_url: service_url(
                "EVENT_SERVICE_URL",
                "http://localhost:8082/api/tickets",
            ),
            payment_service_url: service_url(
                "PAYMENT_SERVICE_URL",
                "http://localhost:8084/api/payments",
            ),
            notification_service_url: service_url(
                "NOTIFICATION_SERVICE_URL",
                "http://localhost:8085/api/notifications",
            ),
            upstream_timeout: Duration::from_millis(
                env::var("UPSTREAM_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
            ),
            background_notifications: env::var("BACKGROUND_NOTIFICATIONS")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(true),
        }
    }
}

fn service_url(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
