//! Configuration layer: typed settings with layered precedence (file → env → `PORT` → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::{
    application::refresh::DEFAULT_REFRESH_CONCURRENCY,
    cache::{DEFAULT_APP_NAME, DEFAULT_REFRESH_SECONDS},
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "coffee-ssr";
const ENV_PREFIX: &str = "COFFEE_SSR";
const PORT_ENV: &str = "PORT";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 4000;
const DEFAULT_STATIC_DIR: &str = "dist/browser";
const DEFAULT_STATIC_MAX_AGE_SECS: u64 = 31_536_000;
const ROUTES_MANIFEST_NAME: &str = "routes.txt";
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Command-line arguments for the coffee-ssr binary.
#[derive(Debug, Parser)]
#[command(
    name = "coffee-ssr",
    version,
    about = "Server-side rendering cache server"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "COFFEE_SSR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(Box<ServeArgs>),
    /// Print the normalized warm-up routes from the route manifest.
    Routes(RoutesArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RoutesArgs {
    /// Read this manifest instead of the configured one.
    #[arg(long = "manifest", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Shell,
    Command,
    Upstream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    Queue,
    Loopback,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Silence all diagnostic output.
    #[arg(
        long = "log-disabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_disabled: Option<bool>,

    /// Override the cache key prefix.
    #[arg(long = "cache-app-name", value_name = "NAME")]
    pub cache_app_name: Option<String>,

    /// Override the staleness threshold.
    #[arg(long = "cache-refresh-seconds", value_name = "SECONDS")]
    pub cache_refresh_seconds: Option<u64>,

    /// Override the static asset directory.
    #[arg(long = "static-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub static_dir: Option<PathBuf>,

    /// Override the route manifest used for warm-up.
    #[arg(long = "routes-manifest", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub routes_manifest: Option<PathBuf>,

    /// Toggle startup warm-up.
    #[arg(
        long = "routes-warmup",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub routes_warmup: Option<bool>,

    /// Override the rendering engine.
    #[arg(long = "render-engine", value_name = "ENGINE")]
    pub render_engine: Option<EngineKind>,

    /// Override the program run by the command engine.
    #[arg(long = "render-command", value_name = "PATH")]
    pub render_command: Option<PathBuf>,

    /// Arguments passed to the command engine before the route (repeatable).
    #[arg(long = "render-arg", value_name = "ARG")]
    pub render_args: Vec<String>,

    /// Override the origin queried by the upstream engine.
    #[arg(long = "render-upstream-url", value_name = "URL")]
    pub render_upstream_url: Option<String>,

    /// Override the render timeout.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Override how background refreshes are dispatched.
    #[arg(long = "refresh-mode", value_name = "MODE")]
    pub refresh_mode: Option<RefreshMode>,

    /// Override the refresh queue capacity.
    #[arg(long = "refresh-queue-capacity", value_name = "COUNT")]
    pub refresh_queue_capacity: Option<usize>,

    /// Override how many queued refreshes render at once.
    #[arg(long = "refresh-concurrency", value_name = "COUNT")]
    pub refresh_concurrency: Option<usize>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub static_files: StaticFileSettings,
    pub routes: RoutesSettings,
    pub render: RenderSettings,
    pub refresh: RefreshSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub app_name: String,
    pub refresh_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct StaticFileSettings {
    pub directory: PathBuf,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct RoutesSettings {
    pub manifest: PathBuf,
    pub warmup: bool,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub engine: EngineSettings,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum EngineSettings {
    Shell,
    Command { program: PathBuf, args: Vec<String> },
    Upstream { base_url: Url },
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub mode: RefreshMode,
    pub queue_capacity: NonZeroUsize,
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → `PORT` → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let port = std::env::var(PORT_ENV).ok();
    load_with_port(cli, port.as_deref())
}

/// Same as [`load`] with the `PORT` variable supplied by the caller.
pub fn load_with_port(cli: &CliArgs, port: Option<&str>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    if let Some(port) = port {
        raw.apply_port_env(port)?;
    }

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Routes(args)) => raw.apply_routes_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    static_files: RawStaticFileSettings,
    routes: RawRoutesSettings,
    render: RawRenderSettings,
    refresh: RawRefreshSettings,
}

impl RawSettings {
    fn apply_port_env(&mut self, value: &str) -> Result<(), LoadError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let port = trimmed
            .parse::<u16>()
            .map_err(|err| LoadError::invalid("PORT", format!("failed to parse: {err}")))?;
        self.server.port = Some(port);
        Ok(())
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(disabled) = overrides.log_disabled {
            self.logging.disabled = Some(disabled);
        }
        if let Some(name) = overrides.cache_app_name.as_ref() {
            self.cache.app_name = Some(name.clone());
        }
        if let Some(seconds) = overrides.cache_refresh_seconds {
            self.cache.refresh_seconds = Some(seconds);
        }
        if let Some(directory) = overrides.static_dir.as_ref() {
            self.static_files.directory = Some(directory.clone());
        }
        if let Some(manifest) = overrides.routes_manifest.as_ref() {
            self.routes.manifest = Some(manifest.clone());
        }
        if let Some(warmup) = overrides.routes_warmup {
            self.routes.warmup = Some(warmup);
        }
        if let Some(engine) = overrides.render_engine {
            self.render.engine = Some(engine);
        }
        if let Some(command) = overrides.render_command.as_ref() {
            self.render.command = Some(command.clone());
        }
        if !overrides.render_args.is_empty() {
            self.render.args = Some(overrides.render_args.clone());
        }
        if let Some(url) = overrides.render_upstream_url.as_ref() {
            self.render.upstream_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
        if let Some(mode) = overrides.refresh_mode {
            self.refresh.mode = Some(mode);
        }
        if let Some(capacity) = overrides.refresh_queue_capacity {
            self.refresh.queue_capacity = Some(capacity);
        }
        if let Some(limit) = overrides.refresh_concurrency {
            self.refresh.concurrency = Some(limit);
        }
    }

    fn apply_routes_overrides(&mut self, args: &RoutesArgs) {
        if let Some(manifest) = args.manifest.as_ref() {
            self.routes.manifest = Some(manifest.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            static_files,
            routes,
            render,
            refresh,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let static_files = build_static_file_settings(static_files)?;
        let routes = build_routes_settings(routes, &static_files.directory);
        let render = build_render_settings(render)?;
        let refresh = build_refresh_settings(refresh)?;

        Ok(Self {
            server,
            logging,
            cache,
            static_files,
            routes,
            render,
            refresh,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let disabled = logging.disabled.unwrap_or(false);

    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };
    let level = if disabled { LevelFilter::OFF } else { level };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings {
        level,
        format,
        disabled,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let app_name = cache
        .app_name
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
    if app_name.is_empty() {
        return Err(LoadError::invalid("cache.app_name", "must not be empty"));
    }

    let refresh_seconds = cache.refresh_seconds.unwrap_or(DEFAULT_REFRESH_SECONDS);
    if i64::try_from(refresh_seconds).is_err() {
        return Err(LoadError::invalid(
            "cache.refresh_seconds",
            "value exceeds supported range",
        ));
    }

    Ok(CacheSettings {
        app_name,
        refresh_seconds,
    })
}

fn build_static_file_settings(
    static_files: RawStaticFileSettings,
) -> Result<StaticFileSettings, LoadError> {
    let directory = static_files
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "static_files.directory",
            "path must not be empty",
        ));
    }

    let max_age = Duration::from_secs(
        static_files
            .max_age_seconds
            .unwrap_or(DEFAULT_STATIC_MAX_AGE_SECS),
    );

    Ok(StaticFileSettings { directory, max_age })
}

fn build_routes_settings(routes: RawRoutesSettings, static_dir: &Path) -> RoutesSettings {
    let manifest = routes
        .manifest
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| default_manifest_path(static_dir));

    RoutesSettings {
        manifest,
        warmup: routes.warmup.unwrap_or(true),
    }
}

/// The manifest sits next to the static directory, one level up.
fn default_manifest_path(static_dir: &Path) -> PathBuf {
    match static_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(ROUTES_MANIFEST_NAME),
        _ => PathBuf::from(ROUTES_MANIFEST_NAME),
    }
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let engine = match render.engine.unwrap_or(EngineKind::Shell) {
        EngineKind::Shell => EngineSettings::Shell,
        EngineKind::Command => {
            let program = render
                .command
                .filter(|path| !path.as_os_str().is_empty())
                .ok_or_else(|| {
                    LoadError::invalid("render.command", "required for the command engine")
                })?;
            EngineSettings::Command {
                program,
                args: render.args.unwrap_or_default(),
            }
        }
        EngineKind::Upstream => {
            let raw_url = render.upstream_url.ok_or_else(|| {
                LoadError::invalid("render.upstream_url", "required for the upstream engine")
            })?;
            let base_url = Url::parse(raw_url.trim()).map_err(|err| {
                LoadError::invalid("render.upstream_url", format!("failed to parse: {err}"))
            })?;
            if !matches!(base_url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "render.upstream_url",
                    "scheme must be http or https",
                ));
            }
            EngineSettings::Upstream { base_url }
        }
    };

    let timeout = match render.timeout_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "render.timeout_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => None,
    };

    Ok(RenderSettings { engine, timeout })
}

fn build_refresh_settings(refresh: RawRefreshSettings) -> Result<RefreshSettings, LoadError> {
    let queue_capacity = NonZeroUsize::new(
        refresh.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
    )
    .ok_or_else(|| LoadError::invalid("refresh.queue_capacity", "must be greater than zero"))?;
    let concurrency = NonZeroUsize::new(
        refresh.concurrency.unwrap_or(DEFAULT_REFRESH_CONCURRENCY),
    )
    .ok_or_else(|| LoadError::invalid("refresh.concurrency", "must be greater than zero"))?;

    Ok(RefreshSettings {
        mode: refresh.mode.unwrap_or(RefreshMode::Queue),
        queue_capacity,
        concurrency,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
    disabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    app_name: Option<String>,
    refresh_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStaticFileSettings {
    directory: Option<PathBuf>,
    max_age_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRoutesSettings {
    manifest: Option<PathBuf>,
    warmup: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    engine: Option<EngineKind>,
    command: Option<PathBuf>,
    args: Option<Vec<String>>,
    upstream_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRefreshSettings {
    mode: Option<RefreshMode>,
    queue_capacity: Option<usize>,
    concurrency: Option<usize>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
