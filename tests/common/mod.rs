//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::Duration;

use quillpost::data::secrets::constant_uri;
use quillpost::data::{Account, EntityId, storage_registry};
use quillpost::federation::{SignatureAlgorithm, generate_keypair, sign_request};
use quillpost::queue::queue_registry;
use quillpost::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Keypair shared by every test account; generation is slow in debug builds
pub fn shared_keypair() -> &'static (String, String) {
    static KEYS: OnceLock<(String, String)> = OnceLock::new();
    KEYS.get_or_init(|| generate_keypair(1024).expect("test keypair"))
}

/// Configuration for a server reachable at `hostname` over plain http
pub fn test_config(hostname: &str, key_dir: &std::path::Path) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            hostname: hostname.to_string(),
            protocol: "http".to_string(),
        },
        database: config::DatabaseConfig {
            uri: "memory://".to_string(),
        },
        queue: config::QueueConfig {
            uri: "inline://".to_string(),
        },
        federation: config::FederationConfig {
            allow_insecure_transport: true,
            max_delivery_attempts: 3,
            request_timeout_secs: 10,
            ..Default::default()
        },
        accounts: config::AccountsConfig {
            key_dir: Some(key_dir.to_path_buf()),
            key_bits: 1024,
        },
        admin: config::AdminConfig {
            token: Some(ADMIN_TOKEN.to_string()),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub hostname: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting its configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        let temp_dir = TempDir::new().unwrap();

        // Bind first: the public hostname must carry the real port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hostname = listener.local_addr().unwrap().to_string();

        let mut config = test_config(&hostname, temp_dir.path());
        adjust(&mut config);

        let state = AppState::new(config, &storage_registry(), &queue_registry())
            .await
            .unwrap();

        let app = quillpost::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            addr: format!("http://{}", hostname),
            hostname,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get URL for a path on this server
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn actor_url(&self, name: &str) -> String {
        self.url(&format!("/users/{}", name))
    }

    pub fn address(&self, name: &str) -> String {
        format!("{}@{}", name, self.hostname)
    }

    /// Insert an account that uses the shared test keypair
    pub async fn create_account(&self, name: &str) -> Account {
        let (private_key_pem, public_key_pem) = shared_keypair();
        let now = chrono::Utc::now();
        let account = Account {
            id: EntityId::new().0,
            name: name.to_string(),
            display_name: Some(format!("{} (test)", name)),
            summary: None,
            public_key_uri: constant_uri(public_key_pem),
            private_key_uri: constant_uri(private_key_pem),
            created_at: now,
            updated_at: now,
        };
        self.state.storage.accounts.add_account(&account).await.unwrap();
        account
    }

    /// Admin API request with the bearer token set
    pub fn admin(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(&format!("/admin{}", path)))
            .bearer_auth(ADMIN_TOKEN)
    }

    /// POST `activity` to `target`'s inbox, signed as `sender_name` on this server
    pub async fn send_signed(
        &self,
        sender_name: &str,
        target: &TestServer,
        target_name: &str,
        activity: &serde_json::Value,
    ) -> reqwest::Response {
        let url = target.url(&format!("/users/{}/inbox", target_name));
        let body = activity.to_string().into_bytes();
        let (private_key_pem, _) = shared_keypair();
        let signed = sign_request(
            "POST",
            &url,
            Some(&body),
            private_key_pem,
            &format!("{}#main-key", self.actor_url(sender_name)),
            SignatureAlgorithm::RsaSha256,
            Duration::from_secs(60),
        )
        .unwrap();

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/activity+json")
            .header("Date", signed.date)
            .header("Signature", signed.signature);
        if let Some(digest) = signed.digest {
            request = request.header("Digest", digest);
        }
        request.body(body).send().await.unwrap()
    }
}

/// Follow activity from `sender.name` to `target.name`
pub fn follow_activity(
    sender: &TestServer,
    sender_name: &str,
    target: &TestServer,
    target_name: &str,
) -> serde_json::Value {
    serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{}/follows/{}", sender.actor_url(sender_name), EntityId::new().0),
        "type": "Follow",
        "actor": sender.actor_url(sender_name),
        "object": target.actor_url(target_name)
    })
}
