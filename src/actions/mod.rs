use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::error;

use crate::errors::DomainError;

pub mod admin;
pub mod auth;
pub mod events;
pub mod members;
pub mod messages;
pub mod orders;
pub mod products;
pub mod stripe_webhook;

pub use admin::*;
pub use auth::*;
pub use events::*;
pub use members::*;
pub use messages::*;
pub use orders::*;
pub use products::*;
pub use stripe_webhook::*;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct DataListResponse<T: Serialize> {
    pub data: Vec<T>,
}

pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

/// Map a domain error to its HTTP shape. Server-side failures are logged
/// here and surfaced as an opaque message.
pub fn domain_error_response(e: DomainError) -> axum::response::Response {
    let status = e.status();
    if status.is_server_error() {
        error!(error = %e, "Request failed");
        return json_error(status, "Internal error").into_response();
    }
    json_error(status, &e.to_string()).into_response()
}
