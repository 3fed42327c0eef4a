//! External-process engine, e.g. a Node SSR entry point printing HTML to stdout.

use std::{io::ErrorKind, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use tokio::{process::Command, time::Instant};
use tracing::{debug, warn};

use crate::application::render::{PageRenderer, RenderError, RenderRequest};

pub const ROUTE_ENV: &str = "SSR_ROUTE";
pub const BASE_HREF_ENV: &str = "SSR_BASE_HREF";

#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl PageRenderer for CommandRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let started_at = Instant::now();

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&request.route)
            .env(ROUTE_ENV, &request.route)
            .env(BASE_HREF_ENV, &request.base_href)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = "coffee_ssr::render::command",
                    program = %self.program.display(),
                    route = %request.route,
                    error = %err,
                    "failed to spawn render command"
                );
                if err.kind() == ErrorKind::NotFound {
                    RenderError::engine(format!(
                        "render command `{}` not found",
                        self.program.display()
                    ))
                } else {
                    RenderError::io(err.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
            return Err(RenderError::engine(format!(
                "render command exited with {exit_code}: {stderr}"
            )));
        }

        let html = String::from_utf8(output.stdout)
            .map_err(|_| RenderError::engine("render command produced non-UTF-8 output"))?;
        if html.trim().is_empty() {
            return Err(RenderError::engine("render command produced no output"));
        }

        debug!(
            target = "coffee_ssr::render::command",
            route = %request.route,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            bytes = html.len(),
            "render command finished"
        );

        Ok(html)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
