//! Server-side rendering cache server.
//!
//! Serves a compiled single-page application: static assets straight from the
//! build output, every other path as rendered HTML out of an in-memory
//! stale-while-revalidate cache that is refreshed in the background.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
