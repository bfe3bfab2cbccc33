//! Account addresses
//!
//! Parses `acct:name@host` style identities and finds mentions in post text.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AppError, Result};

lazy_static! {
    static ref ADDRESS_RE: Regex =
        Regex::new(r"^(?:acct:)?@?([A-Za-z0-9_.\-]+)(?:@([A-Za-z0-9.\-]+(?::\d+)?))?$")
            .expect("address regex compiles");
    static ref MENTION_RE: Regex = Regex::new(
        r"(?:^|[^\w@/])@([A-Za-z0-9_.\-]+)@([A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*(?::\d+)?)"
    )
    .expect("mention regex compiles");
}

/// Split an address into `(name, host)`
///
/// Accepts `name`, `@name`, `name@host`, `@name@host` and the `acct:`
/// forms of each. `host` is empty for a bare local name.
pub fn parse_address(address: &str) -> Result<(String, String)> {
    let captures = ADDRESS_RE
        .captures(address.trim())
        .ok_or_else(|| AppError::Parse(format!("Invalid address: {}", address)))?;

    let name = captures[1].to_string();
    let host = captures
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    Ok((name, host))
}

/// Normalize an address to `name@host`, filling in `local_host` for bare names
pub fn normalize_address(address: &str, local_host: &str) -> Result<String> {
    let (name, host) = parse_address(address)?;
    if host.is_empty() {
        Ok(format!("{}@{}", name, local_host))
    } else {
        Ok(format!("{}@{}", name, host))
    }
}

/// Find `@name@host` mentions in text or HTML
pub fn scan_mentions(text: &str) -> HashSet<String> {
    // Keep tag boundaries from gluing words together once markup is gone
    let spaced = text.replace('<', " <");
    let cleaned = ammonia::Builder::empty().clean(&spaced).to_string();
    let plain = html_escape::decode_html_entities(&cleaned);

    MENTION_RE
        .captures_iter(&plain)
        .map(|c| format!("{}@{}", &c[1], c[2].to_ascii_lowercase()))
        .collect()
}
