//! Deterministic cache keys for outgoing requests
//!
//! The key is a BLAKE3 digest of the *effective* URL: fragments are dropped
//! and query parameters are sorted, so two spellings of the same request
//! always land on the same cache entry.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Hex-encoded BLAKE3 digest identifying one effective request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
    /// Build the key for a URL string
    pub fn for_url(raw: &str) -> Self {
        let effective = effective_url(raw);
        Self(blake3::hash(effective.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a URL into the form that determines the server's response.
///
/// Unparseable input is returned trimmed so it still hashes stably.
pub fn effective_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    url.to_string()
}
