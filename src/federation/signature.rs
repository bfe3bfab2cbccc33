//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey, pkcs1v15};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use super::actor::{Actor, ActorResolver};
use crate::error::{AppError, Result};

/// Maximum distance between the Date header and our clock
const MAX_DATE_SKEW_SECS: i64 = 300;

/// RSA signature algorithm used for outbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    #[default]
    RsaSha256,
    RsaSha512,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha256 => "rsa-sha256",
            SignatureAlgorithm::RsaSha512 => "rsa-sha512",
        }
    }

    fn sign(&self, private_key: RsaPrivateKey, message: &[u8]) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        match self {
            SignatureAlgorithm::RsaSha256 => pkcs1v15::SigningKey::<Sha256>::new(private_key)
                .sign_with_rng(&mut rng, message)
                .to_vec(),
            SignatureAlgorithm::RsaSha512 => pkcs1v15::SigningKey::<Sha512>::new(private_key)
                .sign_with_rng(&mut rng, message)
                .to_vec(),
        }
    }

    fn verify(&self, public_key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = pkcs1v15::Signature::try_from(signature) else {
            return false;
        };
        match self {
            SignatureAlgorithm::RsaSha256 => {
                pkcs1v15::VerifyingKey::<Sha256>::new(public_key.clone())
                    .verify(message, &signature)
                    .is_ok()
            }
            SignatureAlgorithm::RsaSha512 => {
                pkcs1v15::VerifyingKey::<Sha512>::new(public_key.clone())
                    .verify(message, &signature)
                    .is_ok()
            }
        }
    }

    /// Algorithms to try for an inbound `algorithm` parameter
    fn candidates(name: &str) -> Option<&'static [SignatureAlgorithm]> {
        match name.to_ascii_lowercase().as_str() {
            "rsa-sha256" => Some(&[SignatureAlgorithm::RsaSha256]),
            "rsa-sha512" => Some(&[SignatureAlgorithm::RsaSha512]),
            // hs2019 leaves the digest to the key metadata; try both
            "hs2019" => Some(&[SignatureAlgorithm::RsaSha256, SignatureAlgorithm::RsaSha512]),
            _ => None,
        }
    }
}

/// Generate an RSA keypair, returned as (PKCS#8 private PEM, SPKI public PEM)
///
/// CPU heavy; call from `spawn_blocking`.
pub fn generate_keypair(bits: usize) -> Result<(String, String)> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Key generation failed: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Private key encoding failed: {}", e)))?
        .to_string();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Public key encoding failed: {}", e)))?;

    Ok((private_pem, public_pem))
}

fn decode_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::Config(format!("Invalid private key: {}", e)))
}

fn decode_public_key(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::Parse(format!("Invalid public key: {}", e)))
}

/// Sign an HTTP request
///
/// Creates HTTP Signature header for outgoing requests.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PEM format (PKCS#8 or PKCS#1)
/// * `key_id` - Full URL to the public key (actor#main-key)
/// * `algorithm` - Digest used with PKCS#1 v1.5
/// * `validity` - How long the signature stays valid (`expires - created`)
///
/// # Returns
/// Headers to add: Signature, Date, Host and Digest (if body present)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
    algorithm: SignatureAlgorithm,
    validity: Duration,
) -> Result<SignatureHeaders> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Parse(format!("Invalid URL: {}", e)))?;

    let host = match (parsed_url.host_str(), parsed_url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(AppError::Parse("Missing host in URL".to_string())),
    };

    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    let now = Utc::now();
    let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let created = now.timestamp();
    let expires = created + validity.as_secs() as i64;

    let digest = body.map(generate_digest);

    let mut signing_parts = vec![
        format!(
            "(request-target): {} {}",
            method.to_lowercase(),
            path_and_query
        ),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    let private_key = decode_private_key(private_key_pem)?;
    let signature_b64 = BASE64.encode(algorithm.sign(private_key, signing_string.as_bytes()));

    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"{}\",created={},expires={},headers=\"{}\",signature=\"{}\"",
        key_id,
        algorithm.as_str(),
        created,
        expires,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
        host,
    })
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
    /// Host value covered by the signature
    pub host: String,
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| AppError::Auth(format!("Missing {} header", name)))?
        .to_str()
        .map_err(|_| AppError::Auth(format!("Invalid {} header", name)))
}

/// Verify an HTTP request signature
///
/// # Arguments
/// * `method` - HTTP method
/// * `path` - Request path and query
/// * `headers` - All request headers
/// * `body` - Request body (for digest verification)
/// * `public_key_pem` - RSA public key in PEM format
///
/// # Errors
/// `AppError::Parse` when `public_key_pem` does not decode, otherwise
/// every failure is `AppError::Auth`.
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
) -> Result<()> {
    let parsed = parse_signature_header(header_str(headers, "signature")?)?;

    let algorithms = SignatureAlgorithm::candidates(&parsed.algorithm).ok_or_else(|| {
        AppError::Auth(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        ))
    })?;

    for required in ["(request-target)", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(AppError::Auth(format!(
                "Signed headers must include: {}",
                required
            )));
        }
    }

    if body.is_some() && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(AppError::Auth(
            "Signed headers must include: digest".to_string(),
        ));
    }

    let date = DateTime::parse_from_rfc2822(header_str(headers, "date")?)
        .map_err(|_| AppError::Auth("Invalid Date format".to_string()))?;
    let now = Utc::now().timestamp();
    if (now - date.timestamp()).abs() > MAX_DATE_SKEW_SECS {
        return Err(AppError::Auth(
            "Date header too old or in future".to_string(),
        ));
    }

    if let Some(expires) = parsed.expires {
        if expires < now {
            return Err(AppError::Auth("Signature has expired".to_string()));
        }
    }
    if let Some(created) = parsed.created {
        if created - now > MAX_DATE_SKEW_SECS {
            return Err(AppError::Auth(
                "Signature created in the future".to_string(),
            ));
        }
    }

    if let Some(body_data) = body {
        let digest_str = header_str(headers, "digest")?;
        let expected = generate_digest(body_data);
        let matches = digest_str.split(',').any(|candidate| {
            candidate
                .trim()
                .split_once('=')
                .is_some_and(|(name, value)| {
                    name.eq_ignore_ascii_case("SHA-256")
                        && expected.split_once('=').map(|(_, v)| v) == Some(value)
                })
        });
        if !matches {
            return Err(AppError::Auth("Digest mismatch".to_string()));
        }
    }

    let mut signing_parts = Vec::with_capacity(parsed.headers.len());
    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            "(created)" => parsed
                .created
                .ok_or_else(|| AppError::Auth("Missing created parameter".to_string()))?
                .to_string(),
            "(expires)" => parsed
                .expires
                .ok_or_else(|| AppError::Auth("Missing expires parameter".to_string()))?
                .to_string(),
            name => header_str(headers, name)?.to_string(),
        };
        signing_parts.push(format!("{}: {}", header_name, value));
    }
    let signing_string = signing_parts.join("\n");

    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| AppError::Auth("Invalid signature encoding".to_string()))?;
    let public_key = decode_public_key(public_key_pem)?;

    if algorithms
        .iter()
        .any(|alg| alg.verify(&public_key, signing_string.as_bytes(), &signature_bytes))
    {
        Ok(())
    } else {
        Err(AppError::Auth("Signature verification failed".to_string()))
    }
}

/// Extract keyId from Signature header.
pub fn extract_signature_key_id(headers: &http::HeaderMap) -> Result<String> {
    let parsed = parse_signature_header(header_str(headers, "signature")?)?;
    Ok(parsed.key_id)
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
    pub created: Option<i64>,
    pub expires: Option<i64>,
}

/// Split `a="x,y",b=1` on commas that are not inside quotes
fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",created=...,expires=...,headers="...",signature="..."
/// ```
///
/// `algorithm` defaults to `hs2019` and `headers` to `date` when absent.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;
    let mut created = None;
    let mut expires = None;

    for part in split_params(header) {
        if let Some((key, value)) = part.trim().split_once('=') {
            let value = value.trim().trim_matches('"');

            match key.trim() {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                "created" => {
                    created = Some(value.parse::<i64>().map_err(|_| {
                        AppError::Auth("Invalid created parameter".to_string())
                    })?)
                }
                "expires" => {
                    expires = Some(value.parse::<i64>().map_err(|_| {
                        AppError::Auth("Invalid expires parameter".to_string())
                    })?)
                }
                _ => {}
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::Auth("Missing keyId".to_string()))?,
        algorithm: algorithm.unwrap_or_else(|| "hs2019".to_string()),
        headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
        signature: signature.ok_or_else(|| AppError::Auth("Missing signature".to_string()))?,
        created,
        expires,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Authenticates inbound requests against the sender's published key
#[derive(Clone)]
pub struct SignatureVerifier {
    resolver: Arc<ActorResolver>,
}

impl SignatureVerifier {
    pub fn new(resolver: Arc<ActorResolver>) -> Self {
        Self { resolver }
    }

    /// Verify a request and return the actor owning the signing key
    ///
    /// # Errors
    /// - `Auth` when the signature does not verify
    /// - `Parse` when the key owner publishes no usable key
    /// - `NotFound` when the key id cannot be fetched
    pub async fn verify_request(
        &self,
        method: &str,
        path: &str,
        headers: &http::HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<Actor> {
        let key_id = extract_signature_key_id(headers)?;
        let actor_url = key_id.split('#').next().unwrap_or(&key_id).to_string();

        let was_cached = self.resolver.is_cached(&actor_url).await;
        let actor = self.fetch_key_owner(&actor_url).await?;

        match Self::verify_with(&actor, &actor_url, &key_id, method, path, headers, body) {
            Ok(()) => Ok(actor),
            Err(err) if was_cached => {
                // The key may have rotated since it was cached
                tracing::debug!(key_id = %key_id, error = %err, "Cached key failed, refetching");
                self.resolver.invalidate(&actor_url).await;
                let actor = self.fetch_key_owner(&actor_url).await?;
                Self::verify_with(&actor, &actor_url, &key_id, method, path, headers, body)?;
                Ok(actor)
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_key_owner(&self, actor_url: &str) -> Result<Actor> {
        self.resolver
            .fetch_actor(actor_url)
            .await
            .map_err(|err| match err {
                AppError::Transport(msg) => {
                    AppError::NotFound(format!("Signing key {} unreachable: {}", actor_url, msg))
                }
                other => other,
            })
    }

    fn verify_with(
        actor: &Actor,
        actor_url: &str,
        key_id: &str,
        method: &str,
        path: &str,
        headers: &http::HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<()> {
        // The document may claim any id; only the URL it was served from is trusted
        if actor.id != actor_url {
            return Err(AppError::Auth(format!(
                "Actor document at {} claims id {}",
                actor_url, actor.id
            )));
        }

        let public_key = actor
            .public_key
            .as_ref()
            .ok_or_else(|| AppError::Parse(format!("Actor {} has no publicKey", actor.id)))?;

        if public_key.owner != actor.id {
            return Err(AppError::Auth(format!(
                "Key {} is owned by {}, not {}",
                public_key.id, public_key.owner, actor.id
            )));
        }

        if key_id.contains('#') && public_key.id != key_id {
            return Err(AppError::Auth(
                "Signature keyId does not match actor public key id".to_string(),
            ));
        }

        verify_signature(method, path, headers, body, &public_key.public_key_pem)
    }
}
