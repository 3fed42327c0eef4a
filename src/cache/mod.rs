//! Render cache.
//!
//! Holds the last rendered HTML per route together with its render time:
//!
//! - **Keys**: `<app_name>:<route>`, see [`CacheKey`]
//! - **Store**: [`CacheStore`] trait with the in-memory [`MemoryStore`]
//! - **Freshness**: decided on read against `refresh_seconds`
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! app_name = "coffee-ssr"
//! refresh_seconds = 2400
//! ```

mod config;
mod keys;
mod store;

pub use config::{CacheConfig, DEFAULT_APP_NAME, DEFAULT_REFRESH_SECONDS};
pub use keys::{CacheKey, KEY_SEPARATOR, normalize_route};
pub use store::{CacheEntry, CacheError, CacheStore, Freshness, MemoryStore, unix_now};
