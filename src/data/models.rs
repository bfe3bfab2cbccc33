//! Data models
//!
//! Rust structs representing stored entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Account
// =============================================================================

/// A local identity
///
/// Key material is never stored inline; the key fields are secret URIs
/// resolved through `data::secrets`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    /// Unique local name
    pub name: String,
    pub display_name: Option<String>,
    pub summary: Option<String>,
    /// Secret URI of the PEM public key
    pub public_key_uri: String,
    /// Secret URI of the PEM private key
    pub private_key_uri: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Actor URL, e.g. `https://example.com/users/alice`
    pub fn profile_url(&self, base_url: &str) -> String {
        format!("{}/users/{}", base_url.trim_end_matches('/'), self.name)
    }

    pub fn inbox_url(&self, base_url: &str) -> String {
        format!("{}/inbox", self.profile_url(base_url))
    }

    pub fn followers_url(&self, base_url: &str) -> String {
        format!("{}/followers", self.profile_url(base_url))
    }

    pub fn following_url(&self, base_url: &str) -> String {
        format!("{}/following", self.profile_url(base_url))
    }

    /// Key id advertised in outbound signatures
    pub fn key_id(&self, base_url: &str) -> String {
        format!("{}#main-key", self.profile_url(base_url))
    }

    /// Federated address, e.g. `alice@example.com`
    pub fn address(&self, hostname: &str) -> String {
        format!("{}@{}", self.name, hostname)
    }
}

// =============================================================================
// Post
// =============================================================================

/// Content authored by a local account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: String,
    pub account_id: String,
    /// HTML content
    pub content: String,
    /// URI of the object this replies to
    pub in_reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Note URL under the author's profile
    pub fn url(&self, account: &Account, base_url: &str) -> String {
        format!("{}/posts/{}", account.profile_url(base_url), self.id)
    }
}

// =============================================================================
// Activity / Delivery
// =============================================================================

/// What a stored outbound activity represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ActivityKind {
    Post,
    Boost,
    Follow,
    Undo,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Boost => "boost",
            Self::Follow => "follow",
            Self::Undo => "undo",
        }
    }
}

/// An outbound activity
///
/// `activity_pub_id` is globally unique and never changes once assigned.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    pub id: String,
    pub activity_pub_id: String,
    pub kind: ActivityKind,
    /// Local object this activity represents (post id, followed address, ...)
    pub kind_id: String,
    pub account_id: String,
    /// Serialized activity JSON, sent verbatim
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One delivery attempt of an activity to a recipient
///
/// Rows are append-only. The number of rows for an (activity, recipient)
/// pair bounds the retries; one successful row ends delivery for the pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: String,
    pub activity_id: String,
    /// Recipient address (name@host)
    pub recipient: String,
    /// Resolved inbox URL, when resolution got that far
    pub inbox: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
}

// =============================================================================
// Federation graph
// =============================================================================

/// A remote address following a local account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follower {
    pub id: String,
    pub account_id: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

/// A remote address a local account follows
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Following {
    pub id: String,
    pub account_id: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Content
// =============================================================================

/// A mention attached to a local post
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: String,
    pub post_id: String,
    pub account_id: String,
    /// Mentioned address
    pub name: String,
    /// Mentioned actor URL
    pub href: String,
    /// Always "Mention" for now
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// Remote content accepted through an inbound Create
///
/// Unique on (`note_id`, `author_address`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Note {
    pub id: String,
    /// Receiving local account
    pub account_id: String,
    /// Protocol id of the note
    pub note_id: String,
    pub author_address: String,
    /// Raw JSON object as received
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Scans
// =============================================================================

/// Half-open creation-time window for scans
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Unbounded range
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| *at >= start) && self.end.is_none_or(|end| *at < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account() -> Account {
        Account {
            id: EntityId::new().0,
            name: "alice".to_string(),
            display_name: None,
            summary: None,
            public_key_uri: "constant://?val=pub".to_string(),
            private_key_uri: "constant://?val=priv".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn account_urls_derive_from_base_url() {
        let account = account();
        assert_eq!(
            account.profile_url("https://example.com/"),
            "https://example.com/users/alice"
        );
        assert_eq!(
            account.inbox_url("https://example.com"),
            "https://example.com/users/alice/inbox"
        );
        assert_eq!(
            account.key_id("https://example.com"),
            "https://example.com/users/alice#main-key"
        );
        assert_eq!(account.address("example.com:8443"), "alice@example.com:8443");
    }

    #[test]
    fn time_range_is_half_open() {
        let now = Utc::now();
        let range = TimeRange::between(now, now + Duration::seconds(10));
        assert!(range.contains(&now));
        assert!(!range.contains(&(now + Duration::seconds(10))));
        assert!(!range.contains(&(now - Duration::seconds(1))));
        assert!(TimeRange::all().contains(&now));
    }
}
