//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (activity receiving)
//! - Followers/Following collections

use axum::body::Bytes;
use axum::extract::OriginalUri;
use axum::{
    Router,
    extract::{Path, State},
    response::Response,
    routing::{get, post},
};
use http::HeaderMap;

use super::{activity_json, record_result};
use crate::AppState;
use crate::data::Account;
use crate::data::secrets::resolve_secret;
use crate::error::{AppError, Result};
use crate::metrics::{
    FEDERATION_REQUEST_DURATION_SECONDS, FEDERATION_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS,
};

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:username - Actor profile
/// - POST /users/:username/inbox - Personal inbox
/// - GET /users/:username/followers - Followers collection
/// - GET /users/:username/following - Following collection
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:username", get(actor))
        .route("/users/:username/inbox", post(inbox))
        .route("/users/:username/followers", get(followers))
        .route("/users/:username/following", get(following))
}

async fn local_account(state: &AppState, username: &str) -> Result<Account> {
    state
        .storage
        .accounts
        .get_account_by_name(username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account {}", username)))
}

/// GET /users/:username
///
/// Returns ActivityPub Actor document.
///
/// Content-Type: application/activity+json
async fn actor(State(state): State<AppState>, Path(username): Path<String>) -> Result<Response> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/users/:username"])
        .start_timer();

    let result = actor_document(&state, &username).await;
    record_result("GET", "/users/:username", &result);
    Ok(activity_json(&result?))
}

async fn actor_document(state: &AppState, username: &str) -> Result<serde_json::Value> {
    let account = local_account(state, username).await?;
    let public_key_pem = resolve_secret(&account.public_key_uri).await?;
    let base_url = state.config.server.base_url();
    let actor_url = account.profile_url(&base_url);

    Ok(serde_json::json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "type": "Person",
        "id": actor_url,
        "preferredUsername": account.name,
        "name": account.display_name.clone().unwrap_or_else(|| account.name.clone()),
        "summary": account.summary.clone().unwrap_or_default(),
        "inbox": account.inbox_url(&base_url),
        "followers": account.followers_url(&base_url),
        "following": account.following_url(&base_url),
        "url": actor_url,
        "publicKey": {
            "id": account.key_id(&base_url),
            "owner": actor_url,
            "publicKeyPem": public_key_pem
        }
    }))
}

/// POST /users/:username/inbox
///
/// Receives incoming ActivityPub activities and answers with an Accept.
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/users/:username/inbox"])
        .start_timer();
    let _fed_timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let result = state
        .inbox
        .process(&username, "POST", path, &headers, &body)
        .await;

    let status = match &result {
        Ok(_) => "success".to_string(),
        Err(e) => e.kind().to_string(),
    };
    FEDERATION_REQUESTS_TOTAL
        .with_label_values(&["inbound", &status])
        .inc();
    record_result("POST", "/users/:username/inbox", &result);

    Ok(activity_json(&result?))
}

fn collection(id: String, total_items: u64) -> serde_json::Value {
    serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "OrderedCollection",
        "id": id,
        "totalItems": total_items
    })
}

/// GET /users/:username/followers
async fn followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response> {
    let account = local_account(&state, &username).await?;
    let total = state.storage.followers.count_followers(&account.id).await?;
    let base_url = state.config.server.base_url();
    Ok(activity_json(&collection(account.followers_url(&base_url), total)))
}

/// GET /users/:username/following
async fn following(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response> {
    let account = local_account(&state, &username).await?;
    let total = state.storage.following.count_following(&account.id).await?;
    let base_url = state.config.server.base_url();
    Ok(activity_json(&collection(account.following_url(&base_url), total)))
}
