//! ActivityPub federation module
//!
//! Handles:
//! - Address parsing and mention scanning
//! - WebFinger and actor fetching (with an optional actor cache)
//! - HTTP Signatures
//! - Activity delivery and fan-out (outbox)
//! - Inbound activity processing (inbox)

mod activity;
mod actor;
mod actor_cache;
mod address;
mod delivery;
mod fanout;
mod inbox;
mod signature;
mod webfinger;

#[cfg(test)]
pub mod test_support;

pub use activity::{InboundActivity, NoteObject};
pub use actor::{Actor, ActorResolver, PublicKey};
pub use actor_cache::{ActorCache, CacheStats};
pub use address::{normalize_address, parse_address, scan_mentions};
pub use delivery::{ActivityDispatcher, DeliveryRecorder, builder};
pub use fanout::{FanOut, FanOutReport};
pub use inbox::InboxProcessor;
pub use signature::{
    SignatureAlgorithm, SignatureHeaders, SignatureVerifier, generate_keypair,
    key_id_matches_actor, parse_signature_header, sign_request, verify_signature,
};
pub use webfinger::{
    ACTIVITY_JSON, WebFingerLink, WebFingerResponse, generate_host_meta,
    generate_webfinger_response,
};
