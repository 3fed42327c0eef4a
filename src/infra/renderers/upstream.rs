//! Upstream engine: fetches the rendered page from another HTTP origin.

use async_trait::async_trait;
use url::Url;

use crate::application::render::{PageRenderer, RenderError, RenderRequest};
use crate::infra::error::InfraError;

pub const BASE_HREF_HEADER: &str = "x-base-href";

const USER_AGENT: &str = concat!("coffee-ssr/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct UpstreamRenderer {
    client: reqwest::Client,
    base_url: Url,
}

impl UpstreamRenderer {
    pub fn new(base_url: Url) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| InfraError::renderer(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
        })
    }

    /// Routes resolve under the base URL path, so `http://origin/ssr/` + `/menu`
    /// becomes `http://origin/ssr/menu`. The route only ever extends the base path;
    /// scheme-like or dot segments cannot move the request to another origin or
    /// above the base.
    fn url_for(&self, route: &str) -> Result<Url, RenderError> {
        let relative = route.trim_start_matches('/');
        if relative.split(['/', '\\']).any(is_dot_segment) {
            return Err(RenderError::engine(format!(
                "route `{route}` escapes the upstream base path"
            )));
        }

        let mut url = self.base_url.clone();
        let path = format!("{}{relative}", url.path());
        url.set_path(&path);
        Ok(url)
    }
}

fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl PageRenderer for UpstreamRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let url = self.url_for(&request.route)?;

        let response = self
            .client
            .get(url.clone())
            .header(BASE_HREF_HEADER, request.base_href.as_str())
            .send()
            .await
            .map_err(|err| RenderError::io(format!("upstream request to {url} failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::engine(format!(
                "upstream {url} returned {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|err| RenderError::io(format!("failed to read upstream body: {err}")))
    }

    fn name(&self) -> &'static str {
        "upstream"
    }
}
