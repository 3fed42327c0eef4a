//! Index-shell engine: serves the build's `index.html` with the base href set per route.

use std::{
    cell::Cell,
    path::{Path, PathBuf},
    rc::Rc,
};

use async_trait::async_trait;
use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use tracing::info;

use crate::application::render::{PageRenderer, RenderError, RenderRequest};
use crate::infra::error::InfraError;

/// Preferred template; written by the build when `index.html` itself is prerendered.
const ORIGINAL_INDEX: &str = "index.original.html";
const INDEX: &str = "index.html";

#[derive(Debug, Clone)]
pub struct ShellRenderer {
    template: String,
}

impl ShellRenderer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Read the index template from the static directory.
    pub async fn load(static_dir: &Path) -> Result<Self, InfraError> {
        let path = template_path(static_dir).await;
        let template = tokio::fs::read_to_string(&path).await.map_err(|err| {
            InfraError::renderer(format!(
                "failed to read index template `{}`: {err}",
                path.display()
            ))
        })?;

        info!(
            target = "coffee_ssr::render::shell",
            template = %path.display(),
            bytes = template.len(),
            "index template loaded"
        );

        Ok(Self::new(template))
    }
}

async fn template_path(static_dir: &Path) -> PathBuf {
    let original = static_dir.join(ORIGINAL_INDEX);
    match tokio::fs::metadata(&original).await {
        Ok(meta) if meta.is_file() => original,
        _ => static_dir.join(INDEX),
    }
}

#[async_trait]
impl PageRenderer for ShellRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        apply_base_href(&self.template, &request.base_href)
    }

    fn name(&self) -> &'static str {
        "shell"
    }
}

/// Point every `<base>` element at `base_href`, inserting one into `<head>` if none exists.
pub fn apply_base_href(html: &str, base_href: &str) -> Result<String, RenderError> {
    let found = Rc::new(Cell::new(false));

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("base", {
                let found = Rc::clone(&found);
                move |el| {
                    found.set(true);
                    el.set_attribute("href", base_href)?;
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::template(err.to_string()))?;

    if found.get() {
        return Ok(rewritten);
    }

    let tag = format!("<base href=\"{}\">", escape_attribute(base_href));
    rewrite_str(
        &rewritten,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", |el| {
                el.prepend(&tag, ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::template(err.to_string()))
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn rewrites_existing_base_href() {
        let html = "<html><head><base href=\"/\"><title>Coffee</title></head><body></body></html>";
        let output = apply_base_href(html, "/menu").expect("rewrite");
        assert!(output.contains("<base href=\"/menu\">"), "{output}");
        assert_eq!(output.matches("<base").count(), 1);
    }

    #[test]
    fn inserts_base_when_missing() {
        let html = "<html><head><title>Coffee</title></head><body></body></html>";
        let output = apply_base_href(html, "/about").expect("rewrite");
        assert!(
            output.contains("<head><base href=\"/about\"><title>"),
            "{output}"
        );
    }

    #[test]
    fn inserted_href_is_escaped() {
        let html = "<html><head></head><body></body></html>";
        let output = apply_base_href(html, "/a\"b").expect("rewrite");
        assert!(output.contains("<base href=\"/a&quot;b\">"), "{output}");
    }

    #[tokio::test]
    async fn prefers_original_index_template() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("index.html"), "<head></head>prerendered").expect("write");
        std::fs::write(dir.path().join("index.original.html"), "<head></head>shell")
            .expect("write");

        let renderer = ShellRenderer::load(dir.path()).await.expect("load");
        let html = renderer
            .render(&RenderRequest::for_route("/"))
            .await
            .expect("render");
        assert!(html.ends_with("shell"), "{html}");
    }

    #[tokio::test]
    async fn missing_template_fails_to_load() {
        let dir = tempdir().expect("tempdir");
        let err = ShellRenderer::load(dir.path()).await.expect_err("missing index");
        assert!(matches!(err, InfraError::Renderer { .. }));
    }
}
