//! Background refresh of stale or missing routes.
//!
//! Scheduling never blocks the caller and never reports the render outcome
//! back to it. Two transports are available:
//!
//! - **queue**: a bounded in-process channel drained by [`RefreshWorker`],
//!   which renders up to a fixed number of routes at once
//! - **loopback**: a detached `POST /recache` against the local listener

use std::{num::NonZeroUsize, sync::Arc};

use dashmap::DashSet;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinSet,
};
use tracing::{debug, info, warn};
use url::Url;

use super::render::RenderInvoker;

const LOOPBACK_USER_AGENT: &str = concat!("coffee-ssr/", env!("CARGO_PKG_VERSION"));

/// Queued routes rendered at the same time unless configured otherwise.
pub const DEFAULT_REFRESH_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh queue is full")]
    QueueFull,
    #[error("refresh queue is closed")]
    QueueClosed,
    #[error("invalid loopback endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("failed to build loopback client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("loopback request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("loopback recache returned {status}")]
    Status { status: reqwest::StatusCode },
}

/// A route waiting to be re-rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTask {
    pub route: String,
}

#[derive(Serialize)]
struct RecacheBody<'a> {
    route: &'a str,
}

#[derive(Clone)]
enum Transport {
    Queue {
        sender: mpsc::Sender<RefreshTask>,
        pending: Arc<DashSet<String>>,
    },
    Loopback {
        client: reqwest::Client,
        endpoint: Url,
    },
}

/// Handle used to schedule fire-and-forget re-renders.
#[derive(Clone)]
pub struct Refresher {
    transport: Transport,
}

impl Refresher {
    /// In-process queue of at most `capacity` pending routes.
    ///
    /// The returned worker must be spawned for scheduled routes to be rendered.
    pub fn queue(invoker: RenderInvoker, capacity: usize) -> (Self, RefreshWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(DashSet::new());
        let worker = RefreshWorker {
            invoker,
            receiver,
            pending: Arc::clone(&pending),
            concurrency: DEFAULT_REFRESH_CONCURRENCY,
        };
        let refresher = Self {
            transport: Transport::Queue { sender, pending },
        };
        (refresher, worker)
    }

    /// Re-render through `POST http://127.0.0.1:<port>/recache`.
    pub fn loopback(port: u16) -> Result<Self, RefreshError> {
        let endpoint = Url::parse(&format!("http://127.0.0.1:{port}/recache"))?;
        Self::loopback_to(endpoint)
    }

    /// Re-render through `POST` against an explicit recache endpoint.
    pub fn loopback_to(endpoint: Url) -> Result<Self, RefreshError> {
        let client = reqwest::Client::builder()
            .user_agent(LOOPBACK_USER_AGENT)
            .build()
            .map_err(RefreshError::Client)?;
        Ok(Self {
            transport: Transport::Loopback { client, endpoint },
        })
    }

    pub fn mode(&self) -> &'static str {
        match self.transport {
            Transport::Queue { .. } => "queue",
            Transport::Loopback { .. } => "loopback",
        }
    }

    /// Schedule a re-render of `route` without waiting for it.
    ///
    /// Returns `false` when the route could not be handed off. Routes already
    /// waiting in the queue count as scheduled.
    pub fn schedule(&self, route: &str) -> bool {
        let outcome = match &self.transport {
            Transport::Queue { sender, pending } => enqueue(sender, pending, route),
            Transport::Loopback { client, endpoint } => {
                spawn_loopback(client, endpoint, route);
                Ok(())
            }
        };
        self.record(route, outcome)
    }

    /// Like [`schedule`](Self::schedule), but waits for queue space instead of
    /// dropping the route. Fails only once the worker is gone.
    pub async fn submit(&self, route: &str) -> bool {
        let outcome = match &self.transport {
            Transport::Queue { sender, pending } => enqueue_waiting(sender, pending, route).await,
            Transport::Loopback { client, endpoint } => {
                spawn_loopback(client, endpoint, route);
                Ok(())
            }
        };
        self.record(route, outcome)
    }

    fn record(&self, route: &str, outcome: Result<(), RefreshError>) -> bool {
        match outcome {
            Ok(()) => {
                counter!("coffee_ssr_refresh_scheduled_total").increment(1);
                debug!(
                    target = "coffee_ssr::refresh",
                    route = %route,
                    mode = self.mode(),
                    "refresh scheduled"
                );
                true
            }
            Err(err) => {
                counter!("coffee_ssr_refresh_failed_total").increment(1);
                warn!(
                    target = "coffee_ssr::refresh",
                    route = %route,
                    error = %err,
                    "refresh dropped"
                );
                false
            }
        }
    }

    /// Routes waiting in the queue. Always zero in loopback mode.
    pub fn pending_len(&self) -> usize {
        match &self.transport {
            Transport::Queue { pending, .. } => pending.len(),
            Transport::Loopback { .. } => 0,
        }
    }
}

fn enqueue(
    sender: &mpsc::Sender<RefreshTask>,
    pending: &DashSet<String>,
    route: &str,
) -> Result<(), RefreshError> {
    if !pending.insert(route.to_string()) {
        return Ok(());
    }

    let task = RefreshTask {
        route: route.to_string(),
    };
    sender.try_send(task).map_err(|err| {
        pending.remove(route);
        match err {
            mpsc::error::TrySendError::Full(_) => RefreshError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => RefreshError::QueueClosed,
        }
    })
}

async fn enqueue_waiting(
    sender: &mpsc::Sender<RefreshTask>,
    pending: &DashSet<String>,
    route: &str,
) -> Result<(), RefreshError> {
    if !pending.insert(route.to_string()) {
        return Ok(());
    }

    let task = RefreshTask {
        route: route.to_string(),
    };
    sender.send(task).await.map_err(|_| {
        pending.remove(route);
        RefreshError::QueueClosed
    })
}

fn spawn_loopback(client: &reqwest::Client, endpoint: &Url, route: &str) {
    let client = client.clone();
    let endpoint = endpoint.clone();
    let route = route.to_string();
    tokio::spawn(async move {
        if let Err(err) = post_recache(&client, endpoint, &route).await {
            counter!("coffee_ssr_refresh_failed_total").increment(1);
            warn!(
                target = "coffee_ssr::refresh",
                route = %route,
                error = %err,
                "background refresh failed"
            );
        }
    });
}

async fn post_recache(
    client: &reqwest::Client,
    endpoint: Url,
    route: &str,
) -> Result<(), RefreshError> {
    let response = client
        .post(endpoint)
        .json(&RecacheBody { route })
        .send()
        .await
        .map_err(RefreshError::Request)?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(RefreshError::Status { status })
    }
}

/// Drains the refresh queue. Each route renders in its own task, at most
/// `concurrency` at a time, so one slow render never holds up the rest.
pub struct RefreshWorker {
    invoker: RenderInvoker,
    receiver: mpsc::Receiver<RefreshTask>,
    pending: Arc<DashSet<String>>,
    concurrency: usize,
}

impl RefreshWorker {
    pub fn with_concurrency(mut self, limit: NonZeroUsize) -> Self {
        self.concurrency = limit.get();
        self
    }

    /// Run until every [`Refresher`] handle has been dropped and in-flight
    /// renders have finished.
    pub async fn run(mut self) {
        info!(
            target = "coffee_ssr::refresh",
            concurrency = self.concurrency,
            "refresh worker started"
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut renders = JoinSet::new();

        while let Some(task) = self.receiver.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            while renders.try_join_next().is_some() {}

            let invoker = self.invoker.clone();
            let pending = Arc::clone(&self.pending);
            renders.spawn(async move {
                let _permit = permit;
                refresh_route(&invoker, &pending, &task.route).await;
            });
        }

        while renders.join_next().await.is_some() {}

        info!(target = "coffee_ssr::refresh", "refresh worker stopped");
    }
}

async fn refresh_route(invoker: &RenderInvoker, pending: &DashSet<String>, route: &str) {
    let result = invoker.render_and_cache(route).await;
    pending.remove(route);

    if let Err(err) = result {
        counter!("coffee_ssr_refresh_failed_total").increment(1);
        warn!(
            target = "coffee_ssr::refresh",
            route = %route,
            error = %err,
            "background refresh failed, keeping cached copy"
        );
    }
}
