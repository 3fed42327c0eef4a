//! Cache configuration.
//!
//! Controls the key namespace and the staleness threshold of the render cache.

use super::keys::CacheKey;

pub const DEFAULT_APP_NAME: &str = "coffee-ssr";
/// 40 minutes.
pub const DEFAULT_REFRESH_SECONDS: u64 = 2400;

/// Render cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace prepended to every cache key.
    pub app_name: String,
    /// Entries older than this many seconds are served stale and refreshed.
    pub refresh_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            refresh_seconds: DEFAULT_REFRESH_SECONDS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            app_name: settings.app_name.clone(),
            refresh_seconds: settings.refresh_seconds,
        }
    }
}

impl CacheConfig {
    /// Cache key for a normalized route.
    pub fn key_for(&self, route: &str) -> CacheKey {
        CacheKey::new(&self.app_name, route)
    }
}
