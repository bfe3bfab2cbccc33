//! Remote actor discovery
//!
//! Resolves addresses through WebFinger and fetches actor documents, with
//! the SSRF guard applied to every outbound fetch.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::actor_cache::ActorCache;
use super::address::parse_address;
use super::webfinger::{ACTIVITY_JSON, WebFingerResponse};
use crate::error::{AppError, Result};
use crate::metrics::{FEDERATION_REQUEST_DURATION_SECONDS, FEDERATION_REQUESTS_TOTAL};

/// Remote ActivityPub actor document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type", default = "default_actor_type")]
    pub kind: String,
    pub preferred_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub inbox: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
}

fn default_actor_type() -> String {
    "Person".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: String,
    pub owner: String,
    pub public_key_pem: String,
}

impl Actor {
    /// `preferredUsername@host`, where host (and non-default port) come from the actor id
    pub fn address(&self) -> Result<String> {
        let parsed = url::Url::parse(&self.id)
            .map_err(|e| AppError::Parse(format!("Invalid actor id {}: {}", self.id, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::Parse(format!("Actor id {} has no host", self.id)))?
            .to_ascii_lowercase();

        Ok(match parsed.port() {
            Some(port) => format!("{}@{}:{}", self.preferred_username, host, port),
            None => format!("{}@{}", self.preferred_username, host),
        })
    }
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<()> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Transport(format!("Failed to resolve host {}: {}", host, e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Auth(format!(
                "Host {} resolves to a disallowed address",
                host
            )));
        }
    }

    if !resolved_any {
        return Err(AppError::Transport(format!("No DNS records for {}", host)));
    }

    Ok(())
}

/// Resolves addresses to actors and fetches actor documents
pub struct ActorResolver {
    http_client: reqwest::Client,
    hostname: String,
    allow_insecure: bool,
    cache: Option<ActorCache>,
}

impl ActorResolver {
    /// A zero `cache_ttl` disables the actor cache
    pub fn new(
        http_client: reqwest::Client,
        hostname: impl Into<String>,
        allow_insecure: bool,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            http_client,
            hostname: hostname.into(),
            allow_insecure,
            cache: (!cache_ttl.is_zero()).then(|| ActorCache::new(cache_ttl)),
        }
    }

    fn scheme(&self) -> &'static str {
        if self.allow_insecure { "http" } else { "https" }
    }

    /// Reject destinations we must never fetch from
    ///
    /// Only enforced when insecure transport is off; test and development
    /// setups federate over loopback.
    async fn check_destination(&self, url: &url::Url) -> Result<()> {
        if self.allow_insecure {
            return match url.scheme() {
                "http" | "https" => Ok(()),
                scheme => Err(AppError::Auth(format!("Unsupported URL scheme: {}", scheme))),
            };
        }

        if url.scheme() != "https" {
            return Err(AppError::Auth(format!(
                "Refusing non-https URL {}",
                url
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| AppError::Parse(format!("Missing host in URL {}", url)))?;
        if is_disallowed_host(host) {
            return Err(AppError::Auth(format!("Refusing to fetch from {}", host)));
        }

        let port = url.port_or_known_default().unwrap_or(443);
        validate_resolved_host_ips(host, port).await
    }

    async fn get(&self, url: &url::Url, accept: &str) -> Result<Vec<u8>> {
        self.check_destination(url).await?;

        let started = Instant::now();
        let result = self
            .http_client
            .get(url.clone())
            .header("Accept", accept)
            .send()
            .await;
        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .observe(started.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["outbound", "error"])
                .inc();
            AppError::Transport(format!("Failed to fetch {}: {}", url, e))
        })?;

        let status = response.status();
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", status.as_str()])
            .inc();
        if !status.is_success() {
            return Err(AppError::NotFound(format!(
                "Fetching {} returned HTTP {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Transport(format!("Failed to read {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }

    /// Look up an actor by address through WebFinger
    ///
    /// An address without a host refers to this server.
    pub async fn retrieve_actor(&self, address: &str) -> Result<Actor> {
        let (name, host) = parse_address(address)?;
        let host = if host.is_empty() {
            self.hostname.clone()
        } else {
            host
        };

        let mut webfinger_url =
            url::Url::parse(&format!("{}://{}/.well-known/webfinger", self.scheme(), host))
                .map_err(|e| AppError::Parse(format!("Invalid host {}: {}", host, e)))?;
        webfinger_url
            .query_pairs_mut()
            .append_pair("resource", &format!("acct:{}@{}", name, host));

        let jrd: WebFingerResponse =
            decode(&self.get(&webfinger_url, "application/jrd+json").await?)?;

        let actor_url = jrd.self_link().ok_or_else(|| {
            AppError::NotFound(format!("No ActivityPub self link for {}@{}", name, host))
        })?;

        tracing::debug!(address = %address, actor = %actor_url, "Resolved address");
        self.fetch_actor(actor_url).await
    }

    /// Fetch an actor document by URL, consulting the cache first
    pub async fn fetch_actor(&self, actor_url: &str) -> Result<Actor> {
        if let Some(cache) = &self.cache {
            if let Some(actor) = cache.get(actor_url).await {
                return Ok(actor);
            }
        }

        let url = url::Url::parse(actor_url)
            .map_err(|e| AppError::Parse(format!("Invalid actor URL {}: {}", actor_url, e)))?;
        let actor: Actor = decode(&self.get(&url, ACTIVITY_JSON).await?)?;

        if let Some(cache) = &self.cache {
            cache.insert(actor_url, actor.clone()).await;
        }

        Ok(actor)
    }

    pub async fn is_cached(&self, actor_url: &str) -> bool {
        match &self.cache {
            Some(cache) => cache.contains(actor_url).await,
            None => false,
        }
    }

    pub async fn invalidate(&self, actor_url: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(actor_url).await;
        }
    }

    pub fn cache(&self) -> Option<&ActorCache> {
        self.cache.as_ref()
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| AppError::Parse(format!("Undecodable response: {}", e)))
}
