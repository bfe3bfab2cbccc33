//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

use crate::federation::SignatureAlgorithm;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub federation: FederationConfig,
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public host name, optionally with port (e.g., "social.example.com")
    pub hostname: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.hostname)
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Backend URI: `sqlite://<path>`, `memory://` or `null://`
    pub uri: String,
}

/// Delivery queue selection
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Backend URI: `inline://`, `channel://?workers=N&capacity=M`, `log://` or `discard://`
    pub uri: String,
}

/// Federation behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Use plain http for discovery and delivery, and skip private-address checks
    pub allow_insecure_transport: bool,
    /// Delivery attempts per (activity, recipient) before giving up
    pub max_delivery_attempts: u32,
    /// Deliver to addresses mentioned in post content
    pub allow_mentions: bool,
    /// Deliver to address-shaped entries of an activity's `cc` list
    pub allow_copy_recipients: bool,
    /// Timeout for every outbound request
    pub request_timeout_secs: u64,
    /// Algorithm for outbound signatures
    pub signature_algorithm: SignatureAlgorithm,
    /// Validity window advertised in outbound signatures
    pub signature_validity_secs: u64,
    /// Remote actor cache TTL, 0 disables the cache
    pub actor_cache_ttl_secs: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            allow_insecure_transport: false,
            max_delivery_attempts: 5,
            allow_mentions: true,
            allow_copy_recipients: true,
            request_timeout_secs: 30,
            signature_algorithm: SignatureAlgorithm::RsaSha256,
            signature_validity_secs: 60,
            actor_cache_ttl_secs: 0,
        }
    }
}

/// Account provisioning
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    /// Directory for generated key files; keys are embedded as constants when unset
    pub key_dir: Option<PathBuf>,
    /// RSA modulus size for generated keys
    pub key_bits: usize,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            key_dir: None,
            key_bits: 2048,
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminConfig {
    /// Bearer token for /admin routes; the admin API is disabled when unset
    pub token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (QUILLPOST__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.hostname", "localhost:8080")?
            .set_default("server.protocol", "http")?
            .set_default("database.uri", "sqlite://data/quillpost.db")?
            .set_default("queue.uri", "inline://")?
            .set_default("federation.allow_insecure_transport", false)?
            .set_default("federation.max_delivery_attempts", 5)?
            .set_default("federation.allow_mentions", true)?
            .set_default("federation.allow_copy_recipients", true)?
            .set_default("federation.request_timeout_secs", 30)?
            .set_default("federation.signature_algorithm", "rsa-sha256")?
            .set_default("federation.signature_validity_secs", 60)?
            .set_default("federation.actor_cache_ttl_secs", 0)?
            .set_default("accounts.key_bits", 2048)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("QUILLPOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.server.hostname.trim().is_empty() {
            return Err(AppError::Config(
                "server.hostname must not be empty".to_string(),
            ));
        }

        let protocol = self.server.protocol.to_ascii_lowercase();
        if protocol != "http" && protocol != "https" {
            return Err(AppError::Config(format!(
                "server.protocol must be http or https, got {}",
                self.server.protocol
            )));
        }

        if self.federation.max_delivery_attempts == 0 {
            return Err(AppError::Config(
                "federation.max_delivery_attempts must be at least 1".to_string(),
            ));
        }

        if self.federation.request_timeout_secs == 0 {
            return Err(AppError::Config(
                "federation.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.accounts.key_bits < 1024 {
            return Err(AppError::Config(
                "accounts.key_bits must be at least 1024".to_string(),
            ));
        }

        if protocol == "http" && !self.federation.allow_insecure_transport {
            if is_local_hostname(&self.server.hostname) {
                tracing::warn!(
                    hostname = %self.server.hostname,
                    "Serving plain http on a local hostname"
                );
            } else {
                return Err(AppError::Config(
                    "server.protocol must be https for non-local hostnames unless federation.allow_insecure_transport is set"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn normalized_host(hostname: &str) -> String {
    let trimmed = hostname.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_hostname(hostname: &str) -> bool {
    let host = normalized_host(hostname);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
