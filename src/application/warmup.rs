//! Startup warm-up from the route manifest.

use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::normalize_route;

use super::dispatch::SsrService;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read route manifest `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Ordered, deduplicated set of routes to pre-render. Always contains `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteManifest {
    routes: Vec<String>,
}

impl RouteManifest {
    /// Parse one route per line. Blank lines are skipped, missing leading
    /// slashes are added and repeated routes keep their first position.
    pub fn parse(text: &str) -> Self {
        let mut seen = HashSet::new();
        let mut routes: Vec<String> = text
            .split('\n')
            .filter_map(normalize_route)
            .filter(|route| seen.insert(route.clone()))
            .collect();

        if !seen.contains("/") {
            routes.insert(0, "/".to_string());
        }

        Self { routes }
    }

    /// Load the manifest at `path`. A missing file yields `Ok(None)`.
    pub async fn load(path: &Path) -> Result<Option<Self>, ManifestError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ManifestError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub scheduled: usize,
    pub already_cached: usize,
}

/// Schedules background renders for manifest routes that are not cached yet.
pub struct CacheWarmer {
    service: SsrService,
}

impl CacheWarmer {
    pub fn new(service: SsrService) -> Self {
        Self { service }
    }

    /// Warm from the manifest at `path`. Missing or unreadable manifests are
    /// logged and produce an empty report.
    pub async fn warm_from_manifest(&self, path: &Path) -> WarmupReport {
        match RouteManifest::load(path).await {
            Ok(Some(manifest)) => self.warm_routes(&manifest).await,
            Ok(None) => {
                info!(
                    target = "coffee_ssr::warmup",
                    path = %path.display(),
                    "route manifest not found, skipping initial cache"
                );
                WarmupReport::default()
            }
            Err(err) => {
                warn!(
                    target = "coffee_ssr::warmup",
                    path = %path.display(),
                    error = %err,
                    "route manifest unreadable, skipping initial cache"
                );
                WarmupReport::default()
            }
        }
    }

    /// Hand every uncached route to the refresher, waiting for queue space
    /// rather than dropping routes when the manifest outgrows the queue.
    pub async fn warm_routes(&self, manifest: &RouteManifest) -> WarmupReport {
        let mut report = WarmupReport::default();

        for route in manifest.routes() {
            if self.service.is_cached(route) {
                report.already_cached += 1;
                continue;
            }
            if self.service.refresher().submit(route).await {
                report.scheduled += 1;
            }
        }

        info!(
            target = "coffee_ssr::warmup",
            routes = manifest.len(),
            scheduled = report.scheduled,
            already_cached = report.already_cached,
            "warm-up scheduled"
        );

        report
    }
}
