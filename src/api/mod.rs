//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (actors, inboxes, collections)
//! - Well-known discovery (WebFinger, host-meta)
//! - Admin API
//! - Metrics (Prometheus)

mod activitypub;
mod admin;
pub mod metrics;
mod wellknown;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::federation::ACTIVITY_JSON;
use crate::metrics::HTTP_REQUESTS_TOTAL;

pub use activitypub::activitypub_router;
pub use admin::admin_router;
pub use metrics::metrics_router;
pub use wellknown::wellknown_router;

/// Render `value` with the ActivityPub media type
pub(crate) fn activity_json(value: &serde_json::Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, ACTIVITY_JSON)],
        value.to_string(),
    )
        .into_response()
}

/// Count a finished request against its route template
pub(crate) fn record_request(method: &str, endpoint: &str, status: StatusCode) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, status.as_str()])
        .inc();
}

/// Count the outcome of a handler result
pub(crate) fn record_result<T>(
    method: &str,
    endpoint: &str,
    result: &Result<T, crate::error::AppError>,
) {
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status_code(),
    };
    record_request(method, endpoint, status);
}
