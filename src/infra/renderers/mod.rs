//! Concrete rendering engines behind [`PageRenderer`].

mod command;
mod shell;
mod upstream;

use std::{path::Path, sync::Arc};

use crate::application::render::PageRenderer;
use crate::config::{EngineSettings, RenderSettings};

use super::error::InfraError;

pub use command::{BASE_HREF_ENV, CommandRenderer, ROUTE_ENV};
pub use shell::{ShellRenderer, apply_base_href};
pub use upstream::{BASE_HREF_HEADER, UpstreamRenderer};

/// Build the configured engine. The shell engine reads its template from `static_dir`.
pub async fn build_renderer(
    settings: &RenderSettings,
    static_dir: &Path,
) -> Result<Arc<dyn PageRenderer>, InfraError> {
    let renderer: Arc<dyn PageRenderer> = match &settings.engine {
        EngineSettings::Shell => Arc::new(ShellRenderer::load(static_dir).await?),
        EngineSettings::Command { program, args } => {
            Arc::new(CommandRenderer::new(program.clone(), args.clone()))
        }
        EngineSettings::Upstream { base_url } => {
            Arc::new(UpstreamRenderer::new(base_url.clone())?)
        }
    };
    Ok(renderer)
}
