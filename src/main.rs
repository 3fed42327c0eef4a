use std::{process, sync::Arc};

use coffee_ssr::{
    application::{
        dispatch::SsrService,
        error::AppError,
        refresh::Refresher,
        render::RenderInvoker,
        warmup::{CacheWarmer, RouteManifest},
    },
    cache::{CacheConfig, CacheStore, MemoryStore},
    config::{self, RefreshMode},
    infra::{
        assets::StaticAssets,
        error::InfraError,
        http::{self, HttpState},
        renderers::build_renderer,
        telemetry,
    },
};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Routes(_) => run_routes(settings).await,
    }
}

struct ApplicationContext {
    http_state: HttpState,
    warmer: CacheWarmer,
    refresh_worker: Option<JoinHandle<()>>,
}

async fn build_application_context(
    settings: &config::Settings,
    port: u16,
) -> Result<ApplicationContext, AppError> {
    let renderer = build_renderer(&settings.render, &settings.static_files.directory).await?;
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let invoker = RenderInvoker::new(renderer, store, CacheConfig::from(&settings.cache))
        .with_timeout(settings.render.timeout);

    let (refresher, refresh_worker) = match settings.refresh.mode {
        RefreshMode::Queue => {
            let (refresher, worker) =
                Refresher::queue(invoker.clone(), settings.refresh.queue_capacity.get());
            let worker = worker.with_concurrency(settings.refresh.concurrency);
            (refresher, Some(tokio::spawn(worker.run())))
        }
        RefreshMode::Loopback => (Refresher::loopback(port)?, None),
    };

    info!(
        target = "coffee_ssr::startup",
        engine = invoker.engine_name(),
        refresh_mode = refresher.mode(),
        app_name = %settings.cache.app_name,
        refresh_seconds = settings.cache.refresh_seconds,
        "render pipeline ready"
    );

    let ssr = SsrService::new(invoker, refresher);
    let assets = StaticAssets::new(
        settings.static_files.directory.clone(),
        settings.static_files.max_age,
    );

    Ok(ApplicationContext {
        http_state: HttpState {
            ssr: ssr.clone(),
            assets,
        },
        warmer: CacheWarmer::new(ssr),
        refresh_worker,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    // Bound before warm-up so loopback refreshes have somewhere to connect.
    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;
    let local_addr = listener
        .local_addr()
        .map_err(InfraError::from)?;

    let app = build_application_context(&settings, local_addr.port()).await?;

    // Warm-up waits for queue space, so it runs beside the server instead of ahead of it.
    let warmup = settings.routes.warmup.then(|| {
        let warmer = app.warmer;
        let manifest = settings.routes.manifest.clone();
        tokio::spawn(async move {
            warmer.warm_from_manifest(&manifest).await;
        })
    });

    info!(
        target = "coffee_ssr::startup",
        addr = %local_addr,
        static_dir = %settings.static_files.directory.display(),
        "server listening"
    );

    let router = http::build_router(app.http_state);
    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    for handle in [warmup, app.refresh_worker].into_iter().flatten() {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_routes(settings: config::Settings) -> Result<(), AppError> {
    let path = &settings.routes.manifest;
    let manifest = RouteManifest::load(path)
        .await?
        .ok_or_else(|| {
            AppError::validation(format!("route manifest `{}` not found", path.display()))
        })?;

    for route in manifest.routes() {
        println!("{route}");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(target = "coffee_ssr::startup", "shutdown signal received");
}
