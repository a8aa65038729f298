// Outreach Infrastructure - HTTP Adapters
// Implements: EmailTransport (Apps Script), CrmPropertyStore (HubSpot)

mod apps_script;
mod hubspot;

pub use apps_script::AppsScriptTransport;
pub use hubspot::HubSpotCrmStore;

use outreach_core::error::AppError;
use outreach_core::port::DeliveryError;
use reqwest::StatusCode;
use std::time::Duration;

/// Default request timeout for outbound calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tag a non-success HTTP status: 429 and 5xx may recover, other 4xx will not
pub(crate) fn delivery_error_for_status(service: &str, status: StatusCode, body: &str) -> DeliveryError {
    let message = format!("{} returned {}: {}", service, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryError::Retryable(message)
    } else {
        DeliveryError::Permanent(message)
    }
}

/// Network-level failures (connect, timeout) are always worth another attempt
pub(crate) fn delivery_error_for_request(service: &str, err: reqwest::Error) -> DeliveryError {
    DeliveryError::Retryable(format!("{} request failed: {}", service, err))
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))
}
