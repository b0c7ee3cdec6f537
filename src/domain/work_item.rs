//! Work items submitted to the batch enricher

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// One unit of fetch + extract work: a URL plus caller context
/// (category path, region id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: String,
    pub context: BTreeMap<String, String>,
}

impl WorkItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// Identity used for de-duplication and stable output ordering
    pub fn identity_key(&self) -> String {
        canonical_identity(&self.url)
    }
}

impl From<&str> for WorkItem {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for WorkItem {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl AsRef<str> for WorkItem {
    fn as_ref(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{} {:?}", self.url, self.context)
        }
    }
}

/// Canonical URL for identity comparisons: query and fragment stripped,
/// trailing slash trimmed.
pub fn canonical_identity(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string(),
    }
}
