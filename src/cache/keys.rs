//! Cache key definitions.
//!
//! Every rendered route is stored under `<prefix>:<route>`, where the prefix is
//! the configured application name. The key is the exact concatenation, so two
//! distinct routes never share a key.

use std::fmt;

/// Separator between the application prefix and the route path.
pub const KEY_SEPARATOR: char = ':';

/// Key of a rendered page in the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for `route` within the `prefix` namespace.
    pub fn new(prefix: &str, route: &str) -> Self {
        Self(format!("{prefix}{KEY_SEPARATOR}{route}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Normalize a route: trimmed, non-empty, with a leading `/`.
///
/// Returns `None` for blank input.
pub fn normalize_route(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{trimmed}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_prefix_and_route() {
        let key = CacheKey::new("coffee-ssr", "/about");
        assert_eq!(key.as_str(), "coffee-ssr:/about");
        assert_eq!(key.to_string(), "coffee-ssr:/about");
    }

    #[test]
    fn distinct_routes_produce_distinct_keys() {
        assert_ne!(CacheKey::new("app", "/a"), CacheKey::new("app", "/a/"));
        assert_ne!(CacheKey::new("app", "/a"), CacheKey::new("other", "/a"));
    }


    #[test]
    fn normalize_adds_leading_slash() {
        assert_eq!(normalize_route("about").as_deref(), Some("/about"));
        assert_eq!(normalize_route("/contact").as_deref(), Some("/contact"));
        assert_eq!(normalize_route("  /spaced \r").as_deref(), Some("/spaced"));
    }

    #[test]
    fn normalize_rejects_blank() {
        assert_eq!(normalize_route(""), None);
        assert_eq!(normalize_route("   \t"), None);
    }
}
