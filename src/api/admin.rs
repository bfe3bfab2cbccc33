//! Admin API endpoints
//!
//! Provisioning and publishing for local accounts. Every route requires
//! `Authorization: Bearer <admin.token>`; without a configured token the
//! admin API answers 404.

use axum::{
    Json, Router, async_trait,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
    routing::{delete, post},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::data::Account;
use crate::error::{AppError, Result};
use crate::federation::FanOutReport;

/// Create admin router
///
/// Routes:
/// - POST /admin/accounts - Create account
/// - POST /admin/accounts/:name/posts - Publish a post
/// - POST /admin/accounts/:name/boosts - Boost a remote object
/// - POST /admin/accounts/:name/follows - Follow an address
/// - DELETE /admin/accounts/:name/follows/:address - Unfollow an address
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:name/posts", post(publish))
        .route("/accounts/:name/boosts", post(boost))
        .route("/accounts/:name/follows", post(follow))
        .route("/accounts/:name/follows/:address", delete(unfollow))
}

/// Proof that the request carried the admin bearer token
pub struct AdminToken;

fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[async_trait]
impl FromRequestParts<AppState> for AdminToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(expected) = state.config.admin.token.as_deref() else {
            return Err(AppError::NotFound("Admin API is disabled".to_string()));
        };

        let provided = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        match provided {
            Some(token) if tokens_match(token, expected) => Ok(AdminToken),
            _ => Err(AppError::Unauthorized),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    name: String,
    display_name: Option<String>,
    summary: Option<String>,
}

/// Account as shown to administrators; key URIs stay private
#[derive(Debug, Serialize)]
struct AccountView {
    id: String,
    name: String,
    display_name: Option<String>,
    summary: Option<String>,
    address: String,
    url: String,
}

impl AccountView {
    fn new(account: Account, state: &AppState) -> Self {
        Self {
            address: account.address(&state.config.server.hostname),
            url: account.profile_url(&state.config.server.base_url()),
            id: account.id,
            name: account.name,
            display_name: account.display_name,
            summary: account.summary,
        }
    }
}

/// POST /admin/accounts
async fn create_account(
    _admin: AdminToken,
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountView>)> {
    let account = state
        .accounts
        .create_account(&req.name, req.display_name, req.summary)
        .await?;
    Ok((StatusCode::CREATED, Json(AccountView::new(account, &state))))
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    content: String,
    in_reply_to: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    post_id: String,
    activity_id: String,
    mentions: Vec<String>,
    delivery: FanOutReport,
}

/// POST /admin/accounts/:name/posts
async fn publish(
    _admin: AdminToken,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>)> {
    let published = state
        .posts
        .publish(&name, &req.content, req.in_reply_to)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PublishResponse {
            post_id: published.post.id,
            activity_id: published.activity.activity_pub_id,
            mentions: published.tags.into_iter().map(|t| t.name).collect(),
            delivery: published.report,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct BoostRequest {
    object: String,
    author: String,
}

#[derive(Debug, Serialize)]
struct BoostResponse {
    activity_id: String,
    delivery: FanOutReport,
}

/// POST /admin/accounts/:name/boosts
async fn boost(
    _admin: AdminToken,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<BoostRequest>,
) -> Result<(StatusCode, Json<BoostResponse>)> {
    let (activity, report) = state.posts.boost(&name, &req.object, &req.author).await?;
    Ok((
        StatusCode::CREATED,
        Json(BoostResponse {
            activity_id: activity.activity_pub_id,
            delivery: report,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct FollowRequest {
    address: String,
}

/// POST /admin/accounts/:name/follows
async fn follow(
    _admin: AdminToken,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<FollowRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let following = state.accounts.follow(&name, &req.address).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "address": following.address,
            "created_at": following.created_at,
        })),
    ))
}

/// DELETE /admin/accounts/:name/follows/:address
async fn unfollow(
    _admin: AdminToken,
    State(state): State<AppState>,
    Path((name, address)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.accounts.unfollow(&name, &address).await?;
    Ok(StatusCode::NO_CONTENT)
}
