//! Fake remote server for federation unit tests
//!
//! Serves WebFinger, one actor document and that actor's inbox on
//! `127.0.0.1:0`, recording what it receives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use super::actor::ActorResolver;
use super::delivery::ActivityDispatcher;
use super::signature::{SignatureAlgorithm, generate_keypair, sign_request};
use crate::data::secrets::constant_uri;
use crate::data::{Account, Activity, ActivityKind, EntityId, MemoryStore, Storage};

/// Shared 1024-bit keypair; generation is slow in debug builds
pub fn test_keypair() -> &'static (String, String) {
    static KEYS: OnceLock<(String, String)> = OnceLock::new();
    KEYS.get_or_init(|| generate_keypair(1024).expect("test keypair"))
}

struct RemoteState {
    name: String,
    host: String,
    base_url: String,
    public_key_pem: Mutex<String>,
    claimed_id: Mutex<Option<String>>,
    inbox_status: StatusCode,
    inbox_bodies: Mutex<Vec<serde_json::Value>>,
    actor_fetches: AtomicUsize,
}

pub struct FakeRemote {
    pub name: String,
    pub host: String,
    pub base_url: String,
    pub actor_url: String,
    pub private_key_pem: String,
    state: Arc<RemoteState>,
}

impl FakeRemote {
    /// Start a remote hosting `name`, answering inbox POSTs with `inbox_status`
    pub async fn start(name: &str, inbox_status: StatusCode) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake remote");
        let host = listener.local_addr().expect("local addr").to_string();
        let base_url = format!("http://{}", host);
        let (private_key_pem, public_key_pem) = test_keypair().clone();

        let state = Arc::new(RemoteState {
            name: name.to_string(),
            host: host.clone(),
            base_url: base_url.clone(),
            public_key_pem: Mutex::new(public_key_pem),
            claimed_id: Mutex::new(None),
            inbox_status,
            inbox_bodies: Mutex::new(Vec::new()),
            actor_fetches: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/.well-known/webfinger", get(webfinger))
            .route("/users/:name", get(actor))
            .route("/users/:name/inbox", post(inbox))
            .with_state(state.clone());

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            name: name.to_string(),
            actor_url: format!("{}/users/{}", base_url, name),
            host,
            base_url,
            private_key_pem,
            state,
        }
    }

    pub fn address(&self) -> String {
        format!("{}@{}", self.name, self.host)
    }

    pub fn inbox_url(&self) -> String {
        format!("{}/inbox", self.actor_url)
    }

    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.actor_url)
    }

    /// Publish a different key, as after a key rotation
    pub fn set_public_key(&self, pem: &str) {
        *self.state.public_key_pem.lock().unwrap() = pem.to_string();
    }

    /// Serve an actor document whose `id` and key owner are `id`
    /// instead of this actor's own URL
    pub fn set_claimed_id(&self, id: &str) {
        *self.state.claimed_id.lock().unwrap() = Some(id.to_string());
    }

    pub fn inbox_bodies(&self) -> Vec<serde_json::Value> {
        self.state.inbox_bodies.lock().unwrap().clone()
    }

    pub fn actor_fetches(&self) -> usize {
        self.state.actor_fetches.load(Ordering::SeqCst)
    }

    /// Headers and request path of a POST of `body` to `url`, signed by this actor
    pub fn sign_post(&self, url: &str, body: &[u8]) -> (http::HeaderMap, String) {
        self.sign_post_with(&self.private_key_pem, url, body)
    }

    /// Like [`FakeRemote::sign_post`] but with another private key under the same key id
    pub fn sign_post_with(
        &self,
        private_key_pem: &str,
        url: &str,
        body: &[u8],
    ) -> (http::HeaderMap, String) {
        let signed = sign_request(
            "POST",
            url,
            Some(body),
            private_key_pem,
            &self.key_id(),
            SignatureAlgorithm::RsaSha256,
            Duration::from_secs(60),
        )
        .expect("sign request");

        let mut headers = http::HeaderMap::new();
        headers.insert("host", signed.host.parse().expect("host header"));
        headers.insert("date", signed.date.parse().expect("date header"));
        if let Some(digest) = signed.digest {
            headers.insert("digest", digest.parse().expect("digest header"));
        }
        headers.insert("signature", signed.signature.parse().expect("signature header"));

        let url = url::Url::parse(url).expect("request url");
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        (headers, path)
    }
}

#[derive(serde::Deserialize)]
struct WebFingerQuery {
    resource: String,
}

async fn webfinger(
    State(state): State<Arc<RemoteState>>,
    Query(query): Query<WebFingerQuery>,
) -> impl IntoResponse {
    if query.resource != format!("acct:{}@{}", state.name, state.host) {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({
        "subject": query.resource,
        "links": [{
            "rel": "self",
            "type": "application/activity+json",
            "href": format!("{}/users/{}", state.base_url, state.name),
        }]
    }))
    .into_response()
}

async fn actor(State(state): State<Arc<RemoteState>>, Path(name): Path<String>) -> impl IntoResponse {
    if name != state.name {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.actor_fetches.fetch_add(1, Ordering::SeqCst);
    let url = format!("{}/users/{}", state.base_url, state.name);
    let id = state
        .claimed_id
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| url.clone());
    let public_key_pem = state.public_key_pem.lock().unwrap().clone();
    Json(json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": id,
        "type": "Person",
        "preferredUsername": state.name,
        "inbox": format!("{}/inbox", url),
        "publicKey": {
            "id": format!("{}#main-key", url),
            "owner": id,
            "publicKeyPem": public_key_pem,
        }
    }))
    .into_response()
}

async fn inbox(
    State(state): State<Arc<RemoteState>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.inbox_bodies.lock().unwrap().push(body);
    state.inbox_status
}

pub fn memory_storage() -> Storage {
    Storage::from_backend(Arc::new(MemoryStore::new()))
}

/// Add a local account whose keys are the shared test keypair
pub async fn seed_account(storage: &Storage, name: &str) -> Account {
    let (private_key_pem, public_key_pem) = test_keypair();
    let account = Account {
        id: EntityId::new().0,
        name: name.to_string(),
        display_name: None,
        summary: None,
        public_key_uri: constant_uri(public_key_pem),
        private_key_uri: constant_uri(private_key_pem),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    storage.accounts.add_account(&account).await.expect("seed account");
    account
}

/// Dispatcher for `http://local.example` that may federate over loopback
pub fn test_dispatcher(storage: &Storage) -> ActivityDispatcher {
    let client = reqwest::Client::new();
    ActivityDispatcher::new(
        storage.clone(),
        Arc::new(ActorResolver::new(
            client.clone(),
            "local.example",
            true,
            Duration::ZERO,
        )),
        client,
        "http://local.example",
        SignatureAlgorithm::RsaSha256,
        Duration::from_secs(60),
    )
}

/// Store an outbound activity owned by `account_id`
pub async fn seed_activity(storage: &Storage, account_id: &str, body: serde_json::Value) -> Activity {
    let id = EntityId::new().0;
    let activity = Activity {
        activity_pub_id: format!("http://local.example/activities/{}", id),
        id,
        kind: ActivityKind::Post,
        kind_id: EntityId::new().0,
        account_id: account_id.to_string(),
        body: body.to_string(),
        created_at: Utc::now(),
    };
    storage.activities.add_activity(&activity).await.expect("seed activity");
    activity
}
