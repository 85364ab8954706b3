pub mod booking;
pub mod inventory;
pub mod notification;
pub mod payment;

use std::time::Duration;

use anyhow::Context;

/// Shared client for the HTTP collaborators. Every upstream call inherits the
/// same timeout so a hung service surfaces as an error instead of a stall.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .context("failed to build upstream HTTP client")
}
