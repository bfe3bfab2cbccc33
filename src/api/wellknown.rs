//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/host-meta

use axum::{
    Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Deserialize;

use super::record_result;
use crate::AppState;
use crate::error::{AppError, Result};
use crate::federation::{
    WebFingerResponse, generate_host_meta, generate_webfinger_response, parse_address,
};

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/host-meta
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/host-meta", get(host_meta))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for local accounts.
///
/// Query: ?resource=acct:user@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<impl IntoResponse> {
    let result = lookup(&state, &query.resource).await;
    record_result("GET", "/.well-known/webfinger", &result);
    Ok((
        [(header::CONTENT_TYPE, "application/jrd+json")],
        Json(result?),
    ))
}

async fn lookup(state: &AppState, resource: &str) -> Result<WebFingerResponse> {
    if !resource.starts_with("acct:") {
        return Err(AppError::Parse(
            "Resource must start with 'acct:'".to_string(),
        ));
    }

    let (username, host) = parse_address(resource)?;
    let hostname = &state.config.server.hostname;
    if host.is_empty() || !host.eq_ignore_ascii_case(hostname) {
        return Err(AppError::NotFound(format!("{} is not hosted here", resource)));
    }

    let account = state
        .storage
        .accounts
        .get_account_by_name(&username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account {}", username)))?;

    Ok(generate_webfinger_response(
        &account.name,
        hostname,
        &state.config.server.base_url(),
    ))
}

/// GET /.well-known/host-meta
///
/// Returns host-meta XML for WebFinger discovery.
async fn host_meta(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/xrd+xml")],
        generate_host_meta(&state.config.server.base_url()),
    )
}
